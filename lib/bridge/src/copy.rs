//! Bounded copies from the host into guest buffers.
//!
//! Both entry points either deliver their whole result into the buffer or
//! report failure; a file is never silently truncated into a guest.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::memory::{GuestBuffer, GuestMemory};
use crate::resolve::PathResolver;

/// Reads the file at `path` into `buffer`.
///
/// The path is re-validated here rather than trusted from an earlier size
/// query. At most `capacity + 1` bytes are read, so a file that grew past
/// the buffer is detected without loading it whole.
pub fn copy_file_into<M: GuestMemory + ?Sized>(
    resolver: &PathResolver,
    path: impl AsRef<Path>,
    memory: &mut M,
    buffer: GuestBuffer,
) -> bool {
    let resolved = resolver.resolve(path);
    let capacity = u64::from(buffer.capacity());

    let metadata = match std::fs::metadata(&resolved) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => {
            debug!(path = %resolved.display(), "not a regular file, refusing to copy");
            return false;
        }
        Err(err) => {
            debug!(path = %resolved.display(), %err, "cannot stat file");
            return false;
        }
    };

    if metadata.len() > capacity {
        debug!(
            path = %resolved.display(),
            size = metadata.len(),
            capacity,
            "file does not fit the destination buffer"
        );
        return false;
    }

    let file = match File::open(&resolved) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %resolved.display(), %err, "failed to open file");
            return false;
        }
    };

    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    if let Err(err) = file.take(capacity + 1).read_to_end(&mut bytes) {
        warn!(path = %resolved.display(), %err, "failed to read file");
        return false;
    }

    if bytes.len() as u64 > capacity {
        warn!(
            path = %resolved.display(),
            capacity,
            "file grew while it was being read"
        );
        return false;
    }

    match buffer.write_at(memory, 0, &bytes) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %resolved.display(), %err, "failed to copy file into guest memory");
            false
        }
    }
}

/// Copies the bytes of `source` into `buffer` as a NUL-terminated string.
///
/// If the string does not fit it is cut so that the terminator lands on the
/// last byte of the buffer. A zero-capacity buffer cannot hold even the
/// terminator: nothing is written and `false` is returned.
pub fn copy_str_into<M: GuestMemory + ?Sized>(
    memory: &mut M,
    buffer: GuestBuffer,
    source: &[u8],
) -> bool {
    let capacity = buffer.capacity() as usize;
    if capacity == 0 {
        return false;
    }

    let copy_len = source.len().min(capacity);
    let terminator = copy_len.min(capacity - 1);

    let mut staged = Vec::with_capacity(terminator + 1);
    staged.extend_from_slice(&source[..terminator]);
    staged.push(0);

    match buffer.write_at(memory, 0, &staged) {
        Ok(()) => true,
        Err(err) => {
            warn!(%err, "failed to copy string into guest memory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GuestAllocator, GuestPtr, LinearMemory};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn buffer(memory: &mut LinearMemory, capacity: u32) -> GuestBuffer {
        let ptr = memory.alloc(capacity).unwrap();
        GuestBuffer::new(ptr, capacity)
    }

    #[test]
    fn string_fits_with_terminator() {
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 8);
        assert!(copy_str_into(&mut memory, buf, b"abc"));
        assert_eq!(&buf.to_vec(&memory).unwrap()[..4], b"abc\0");
    }

    #[test]
    fn long_string_is_truncated_and_terminated() {
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 4);
        assert!(copy_str_into(&mut memory, buf, b"abcdef"));
        assert_eq!(buf.to_vec(&memory).unwrap(), b"abc\0".to_vec());

        // Exactly `capacity` bytes long still loses its last byte to the terminator.
        let buf = buffer(&mut memory, 3);
        assert!(copy_str_into(&mut memory, buf, b"xyz"));
        assert_eq!(buf.to_vec(&memory).unwrap(), b"xy\0".to_vec());
    }

    #[test]
    fn zero_capacity_buffer_is_never_written() {
        let mut memory = LinearMemory::new(0x2000);
        let ptr = memory.alloc(4).unwrap();
        memory.write(ptr.offset().into(), b"keep").unwrap();

        assert!(!copy_str_into(&mut memory, GuestBuffer::new(ptr, 0), b"abc"));
        assert_eq!(GuestBuffer::new(ptr, 4).to_vec(&memory).unwrap(), b"keep".to_vec());
    }

    #[test]
    fn string_buffer_outside_memory_fails() {
        let mut memory = LinearMemory::new(0x1000);
        let buf = GuestBuffer::new(GuestPtr::new(0xfff), 4);
        assert!(!copy_str_into(&mut memory, buf, b"abc"));
    }

    #[test]
    fn file_copies_into_an_exact_buffer() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.bin"), b"payload").unwrap();
        let resolver = PathResolver::new(Some(temp.path().to_path_buf()));
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 7);

        assert!(copy_file_into(&resolver, "f.bin", &mut memory, buf));
        assert_eq!(buf.to_vec(&memory).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn file_larger_than_buffer_is_rejected_without_writing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.bin"), b"payload").unwrap();
        let resolver = PathResolver::new(Some(temp.path().to_path_buf()));
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 6);

        assert!(!copy_file_into(&resolver, "f.bin", &mut memory, buf));
        assert_eq!(buf.to_vec(&memory).unwrap(), vec![0; 6]);
    }

    #[test]
    fn directories_and_missing_paths_are_not_copied() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new(Some(temp.path().to_path_buf()));
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 64);

        assert!(!copy_file_into(&resolver, ".", &mut memory, buf));
        assert!(!copy_file_into(&resolver, "missing", &mut memory, buf));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn file_that_yields_more_than_its_size_is_rejected() {
        // procfs reports a length of 0 for files that do have content.
        let resolver = PathResolver::default();
        let mut memory = LinearMemory::new(0x2000);
        let buf = buffer(&mut memory, 0);
        let sentinel = GuestBuffer::new(buf.ptr(), 8);
        sentinel.write_at(&mut memory, 0, b"\xaa").unwrap();

        assert_eq!(resolver.file_size("/proc/self/status"), Some(0));
        assert!(!copy_file_into(&resolver, "/proc/self/status", &mut memory, buf));
        assert_eq!(sentinel.to_vec(&memory).unwrap()[0], 0xaa);
    }
}
