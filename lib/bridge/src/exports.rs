//! The boundary table: one function per call the guest can make.
//!
//! Each export takes guest addresses only. Paths are read as NUL-terminated
//! byte strings bounded by [`BridgeConfig::max_path_len`] and handed to the
//! host without assuming an encoding. Results come back as a `u32` status
//! and out-parameters are written little-endian. The outer `Err` is reserved
//! for faults the guest cannot recover from (bad pointers, missing
//! terminators, exhausted heap); the host is expected to trap on it.
//!
//! [`BridgeConfig::max_path_len`]: crate::BridgeConfig::max_path_len

use std::path::PathBuf;

use tracing::{Span, field, instrument};

use crate::facade::Bridge;
use crate::memory::{GuestAllocator, GuestMemory, GuestPtr, MemoryAccessError, read_c_bytes};
use crate::resolve::host_path;
use crate::status::StatusCode;
use crate::{BridgeError, Reply};

/// ### `is_exist()`
/// Returns 1 if anything exists at the path, 0 otherwise.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn is_exist<M>(bridge: &Bridge<M>, path: GuestPtr) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    Ok(bridge.is_exist(&path).into())
}

/// ### `is_file()`
/// Returns 1 if the path is a regular file, 0 otherwise.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn is_file<M>(bridge: &Bridge<M>, path: GuestPtr) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    Ok(bridge.is_file(&path).into())
}

/// ### `is_directory()`
/// Returns 1 if the path is a directory, 0 otherwise.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn is_directory<M>(bridge: &Bridge<M>, path: GuestPtr) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    Ok(bridge.is_directory(&path).into())
}

/// ### `get_file_size()`
/// Writes the size of a regular file to `out` as a `u64`.
///
/// `out` is only written on success.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn get_file_size<M>(
    bridge: &mut Bridge<M>,
    path: GuestPtr,
    out: GuestPtr,
) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    let reply = bridge.get_file_size(&path);
    if let Ok(size) = reply {
        out.write_u64(bridge.memory_mut(), size)?;
    }
    Ok(wire_status(&reply))
}

/// ### `load_file()`
/// Loads a whole file into a freshly allocated guest buffer and writes its
/// address to `out`.
///
/// `out` is cleared to null before anything else happens, so it is null on
/// every non-OK status. The guest owns the buffer on success.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn load_file<M>(
    bridge: &mut Bridge<M>,
    path: GuestPtr,
    out: GuestPtr,
) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    out.write_u32(bridge.memory_mut(), GuestPtr::NULL.into())?;

    let reply = bridge.load_file(&path)?;
    if let Ok(buffer) = reply {
        out.write_u32(bridge.memory_mut(), buffer.ptr().into())?;
    }
    Ok(wire_status(&reply))
}

/// ### `get_num_dir_entries()`
/// Writes the recursive entry count of a directory to `out` as a `u64`.
///
/// `out` is only written on success.
#[instrument(level = "trace", skip_all, fields(path = field::Empty), ret)]
pub fn get_num_dir_entries<M>(
    bridge: &mut Bridge<M>,
    path: GuestPtr,
    out: GuestPtr,
) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    let reply = bridge.get_num_dir_entries(&path);
    if let Ok(count) = reply {
        out.write_u64(bridge.memory_mut(), count)?;
    }
    Ok(wire_status(&reply))
}

/// ### `get_dir_entry_name_by_index()`
/// Allocates the name of the `index`th entry of a directory listing as a
/// NUL-terminated string and writes its address to `out`.
///
/// `out` is null on every non-OK status.
#[instrument(level = "trace", skip_all, fields(path = field::Empty, index = index), ret)]
pub fn get_dir_entry_name_by_index<M>(
    bridge: &mut Bridge<M>,
    path: GuestPtr,
    index: u64,
    out: GuestPtr,
) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let path = read_path(bridge, path)?;
    out.write_u32(bridge.memory_mut(), GuestPtr::NULL.into())?;

    let reply = bridge.get_dir_entry_name_by_index(&path, index)?;
    if let Ok(buffer) = reply {
        out.write_u32(bridge.memory_mut(), buffer.ptr().into())?;
    }
    Ok(wire_status(&reply))
}

/// ### `get_combined_path()`
/// Joins `count` guest strings, whose addresses are stored as consecutive
/// little-endian `u32`s at `segments`, with `/` and returns the address of
/// the freshly allocated result.
#[instrument(level = "trace", skip_all, fields(count = count), ret)]
pub fn get_combined_path<M>(
    bridge: &mut Bridge<M>,
    count: u32,
    segments: GuestPtr,
) -> Result<u32, BridgeError>
where
    M: GuestMemory + GuestAllocator,
{
    let max_len = bridge.config().max_path_len;
    let parts = (0..count)
        .map(|i| {
            let slot = i
                .checked_mul(4)
                .ok_or(MemoryAccessError::Overflow)
                .and_then(|offset| segments.add(offset))?;
            let ptr = GuestPtr::new(slot.read_u32(bridge.memory())?);
            read_c_bytes(bridge.memory(), ptr, max_len)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let buffer = bridge.combined_path(&parts)?;
    Ok(buffer.ptr().into())
}

fn read_path<M>(bridge: &Bridge<M>, ptr: GuestPtr) -> Result<PathBuf, MemoryAccessError>
where
    M: GuestMemory + GuestAllocator,
{
    let bytes = read_c_bytes(bridge.memory(), ptr, bridge.config().max_path_len)?;
    let path = host_path(&bytes).into_owned();
    Span::current().record("path", field::display(path.display()));
    Ok(path)
}

fn wire_status<T>(reply: &Reply<T>) -> u32 {
    match reply {
        Ok(_) => StatusCode::Ok.into(),
        Err(status) => (*status).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeConfig;
    use crate::memory::{LinearMemory, read_c_string};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn bridge_in(temp: &TempDir) -> Bridge<LinearMemory> {
        let config = BridgeConfig::default().with_base_dir(temp.path());
        Bridge::new(LinearMemory::new(0x10000), config)
    }

    fn out_slot(bridge: &mut Bridge<LinearMemory>) -> GuestPtr {
        bridge.memory_mut().alloc(8).unwrap()
    }

    #[test]
    fn predicates_answer_zero_or_one() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"x").unwrap();
        let mut bridge = bridge_in(&temp);
        let file = bridge.memory_mut().store_c_string("a.txt").unwrap();
        let root = bridge.memory_mut().store_c_string(".").unwrap();

        assert_eq!(is_exist(&bridge, file).unwrap(), 1);
        assert_eq!(is_file(&bridge, file).unwrap(), 1);
        assert_eq!(is_directory(&bridge, file).unwrap(), 0);
        assert_eq!(is_file(&bridge, root).unwrap(), 0);
        assert_eq!(is_directory(&bridge, root).unwrap(), 1);
    }

    #[test]
    fn file_size_is_written_little_endian() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"hello").unwrap();
        let mut bridge = bridge_in(&temp);
        let path = bridge.memory_mut().store_c_string("a.txt").unwrap();
        let out = out_slot(&mut bridge);

        assert_eq!(get_file_size(&mut bridge, path, out).unwrap(), 0);
        let mut raw = [0u8; 8];
        bridge.memory().read(out.offset().into(), &mut raw).unwrap();
        assert_eq!(u64::from_le_bytes(raw), 5);
    }

    #[test]
    fn failed_load_leaves_null_out_pointer() {
        let temp = TempDir::new().unwrap();
        let mut bridge = bridge_in(&temp);
        let path = bridge.memory_mut().store_c_string("missing.bin").unwrap();
        let out = out_slot(&mut bridge);
        out.write_u32(bridge.memory_mut(), 0xdead_beef).unwrap();

        let status = load_file(&mut bridge, path, out).unwrap();
        assert_eq!(status, u32::from(StatusCode::PathNoExist));
        assert_eq!(out.read_u32(bridge.memory()).unwrap(), 0);
    }

    #[test]
    fn bad_pointers_are_fatal() {
        let temp = TempDir::new().unwrap();
        let mut bridge = bridge_in(&temp);
        let path = bridge.memory_mut().store_c_string(".").unwrap();
        let beyond = GuestPtr::new(0x10000);

        assert!(matches!(
            is_exist(&bridge, GuestPtr::NULL),
            Err(BridgeError::Memory(MemoryAccessError::NullPointer))
        ));
        assert!(matches!(
            get_num_dir_entries(&mut bridge, path, beyond),
            Err(BridgeError::Memory(MemoryAccessError::HeapOutOfBounds))
        ));
        assert!(matches!(
            get_combined_path(&mut bridge, 2, beyond),
            Err(BridgeError::Memory(MemoryAccessError::HeapOutOfBounds))
        ));
    }

    #[test]
    fn non_utf8_paths_are_looked_up_not_faulted() {
        let temp = TempDir::new().unwrap();
        let mut bridge = bridge_in(&temp);
        let path = bridge.memory_mut().store_c_string(b"/tmp/\xff").unwrap();
        let relative = bridge.memory_mut().store_c_string(b"\xffmissing").unwrap();
        let out = out_slot(&mut bridge);

        for ptr in [path, relative] {
            assert_eq!(is_exist(&bridge, ptr).unwrap(), 0);
            assert_eq!(
                get_file_size(&mut bridge, ptr, out).unwrap(),
                u32::from(StatusCode::PathNoExist)
            );
        }
    }

    #[test]
    fn unterminated_path_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut config = BridgeConfig::default().with_base_dir(temp.path());
        config.max_path_len = 4;
        let mut bridge = Bridge::new(LinearMemory::new(0x10000), config);
        let path = bridge.memory_mut().store_c_string("toolong").unwrap();

        assert!(matches!(
            is_exist(&bridge, path),
            Err(BridgeError::Memory(MemoryAccessError::Unterminated(4)))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn read_failure_clears_the_out_pointer() {
        let temp = TempDir::new().unwrap();
        let mut bridge = bridge_in(&temp);
        let path = bridge.memory_mut().store_c_string("/proc/self/status").unwrap();
        let out = out_slot(&mut bridge);
        out.write_u32(bridge.memory_mut(), 0xdead_beef).unwrap();
        let live = bridge.memory().live_allocations();

        let status = load_file(&mut bridge, path, out).unwrap();
        assert_eq!(status, u32::from(StatusCode::ReadFile));
        assert_eq!(out.read_u32(bridge.memory()).unwrap(), 0);
        assert_eq!(bridge.memory().live_allocations(), live);
    }

    #[test]
    fn combined_path_reads_a_pointer_array() {
        let temp = TempDir::new().unwrap();
        let mut bridge = bridge_in(&temp);
        let memory = bridge.memory_mut();
        let a = memory.store_c_string("a").unwrap();
        let b = memory.store_c_string("b").unwrap();
        let array = memory.alloc(8).unwrap();
        array.write_u32(memory, a.into()).unwrap();
        array.add(4).unwrap().write_u32(memory, b.into()).unwrap();

        let joined = GuestPtr::new(get_combined_path(&mut bridge, 2, array).unwrap());
        assert_eq!(read_c_string(bridge.memory(), joined, 16).unwrap(), "a/b");
        assert!(matches!(
            get_combined_path(&mut bridge, 0, array),
            Err(BridgeError::NoPathSegments)
        ));
    }
}
