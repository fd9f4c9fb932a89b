//! Guest memory model.
//!
//! The guest owns a flat linear memory that the host can only touch through
//! [`GuestMemory`]. Addresses handed across the boundary are plain `u32`
//! offsets ([`GuestPtr`]); a [`GuestBuffer`] pairs one with the capacity the
//! guest declared for it, and every write through it is clamped to that
//! capacity before it reaches the memory itself.

use std::collections::BTreeMap;

use thiserror::Error;

/// Error returned when a guest address cannot be accessed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MemoryAccessError {
    /// The access touched bytes past the end of the memory or buffer.
    #[error("out of bounds memory access")]
    HeapOutOfBounds,
    /// An address calculation overflowed.
    #[error("address calculation overflow")]
    Overflow,
    /// The guest passed a null pointer where data was required.
    #[error("null guest pointer")]
    NullPointer,
    /// A guest string was not valid UTF-8.
    #[error("string is not valid utf-8")]
    NonUtf8String,
    /// A guest string had no terminator within the allowed length.
    #[error("string is not nul-terminated within {0} bytes")]
    Unterminated(u32),
}

/// Error returned by a [`GuestAllocator`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("guest heap exhausted while allocating {0} bytes")]
    OutOfMemory(u32),
    #[error("guest address {0:#x} is not a live allocation")]
    InvalidFree(u32),
}

/// Byte-level access to a guest's linear memory.
pub trait GuestMemory {
    /// Size of the memory in bytes.
    fn size(&self) -> u64;

    /// Fills `buf` from `offset`. Fails without touching `buf` if any byte
    /// lies outside the memory.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryAccessError>;

    /// Writes `data` at `offset`. Fails without writing if any byte lies
    /// outside the memory.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), MemoryAccessError>;
}

/// Allocator living on the guest side of the boundary.
///
/// Buffers the bridge hands to a guest come from here, and the guest gives
/// them back through the same allocator once it is done with them.
pub trait GuestAllocator {
    /// Reserves `size` bytes and returns their address.
    ///
    /// The region must be zeroed and the address non-null, including for
    /// `size == 0`: a zero-length file still gets a distinct buffer.
    fn alloc(&mut self, size: u32) -> Result<GuestPtr, AllocError>;

    /// Releases an address previously returned by [`GuestAllocator::alloc`].
    /// Anything else is an [`AllocError::InvalidFree`].
    fn free(&mut self, ptr: GuestPtr) -> Result<(), AllocError>;
}

/// An address in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GuestPtr(u32);

impl GuestPtr {
    /// Address `0`, never a valid allocation.
    pub const NULL: GuestPtr = GuestPtr(0);

    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub const fn offset(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `bytes` further on, or [`MemoryAccessError::Overflow`] if
    /// it would wrap.
    pub fn add(self, bytes: u32) -> Result<Self, MemoryAccessError> {
        self.0
            .checked_add(bytes)
            .map(Self)
            .ok_or(MemoryAccessError::Overflow)
    }

    /// Reads a little-endian `u32` stored at this address.
    pub fn read_u32<M: GuestMemory + ?Sized>(self, memory: &M) -> Result<u32, MemoryAccessError> {
        let mut raw = [0u8; 4];
        memory.read(self.0.into(), &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Stores `value` little-endian at this address. Nothing is written if
    /// any of the four bytes is out of bounds.
    pub fn write_u32<M: GuestMemory + ?Sized>(
        self,
        memory: &mut M,
        value: u32,
    ) -> Result<(), MemoryAccessError> {
        memory.write(self.0.into(), &value.to_le_bytes())
    }

    /// Stores `value` little-endian at this address. Nothing is written if
    /// any of the eight bytes is out of bounds.
    pub fn write_u64<M: GuestMemory + ?Sized>(
        self,
        memory: &mut M,
        value: u64,
    ) -> Result<(), MemoryAccessError> {
        memory.write(self.0.into(), &value.to_le_bytes())
    }
}

impl From<GuestPtr> for u32 {
    fn from(ptr: GuestPtr) -> Self {
        ptr.0
    }
}

/// A guest region: base address plus the capacity the guest vouched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestBuffer {
    ptr: GuestPtr,
    capacity: u32,
}

impl GuestBuffer {
    pub const fn new(ptr: GuestPtr, capacity: u32) -> Self {
        Self { ptr, capacity }
    }

    pub const fn ptr(&self) -> GuestPtr {
        self.ptr
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Writes `data` at `offset` bytes into the buffer.
    ///
    /// The whole write is rejected if it would end past `capacity`, even when
    /// the underlying memory is large enough.
    pub fn write_at<M: GuestMemory + ?Sized>(
        &self,
        memory: &mut M,
        offset: u32,
        data: &[u8],
    ) -> Result<(), MemoryAccessError> {
        let end = u64::from(offset)
            .checked_add(data.len() as u64)
            .ok_or(MemoryAccessError::Overflow)?;
        if end > u64::from(self.capacity) {
            tracing::warn!(
                "attempted to write ({} bytes) beyond the bounds of a guest buffer ({} > {})",
                data.len(),
                end,
                self.capacity
            );
            return Err(MemoryAccessError::HeapOutOfBounds);
        }
        let start = u64::from(self.ptr.0) + u64::from(offset);
        memory.write(start, data)
    }

    /// Copies the whole buffer out of guest memory.
    pub fn to_vec<M: GuestMemory + ?Sized>(&self, memory: &M) -> Result<Vec<u8>, MemoryAccessError> {
        let mut out = vec![0u8; self.capacity as usize];
        memory.read(self.ptr.0.into(), &mut out)?;
        Ok(out)
    }
}

/// Reads the bytes of a NUL-terminated string from guest memory, scanning
/// at most `max_len` bytes (terminator excluded). The bytes are returned as
/// they are; no encoding is assumed.
pub fn read_c_bytes<M: GuestMemory + ?Sized>(
    memory: &M,
    ptr: GuestPtr,
    max_len: u32,
) -> Result<Vec<u8>, MemoryAccessError> {
    const CHUNK: u64 = 64;

    if ptr.is_null() {
        return Err(MemoryAccessError::NullPointer);
    }

    let start = u64::from(ptr.0);
    let limit = u64::from(max_len) + 1;
    let mut bytes = Vec::new();
    let mut chunk = [0u8; CHUNK as usize];

    while (bytes.len() as u64) < limit {
        let cursor = start + bytes.len() as u64;
        let available = memory.size().saturating_sub(cursor);
        if available == 0 {
            return Err(MemoryAccessError::HeapOutOfBounds);
        }
        let wanted = CHUNK
            .min(available)
            .min(limit - bytes.len() as u64) as usize;
        memory.read(cursor, &mut chunk[..wanted])?;

        if let Some(nul) = chunk[..wanted].iter().position(|b| *b == 0) {
            bytes.extend_from_slice(&chunk[..nul]);
            return Ok(bytes);
        }
        bytes.extend_from_slice(&chunk[..wanted]);
    }

    Err(MemoryAccessError::Unterminated(max_len))
}

/// Like [`read_c_bytes`], for strings that must also be valid UTF-8.
pub fn read_c_string<M: GuestMemory + ?Sized>(
    memory: &M,
    ptr: GuestPtr,
    max_len: u32,
) -> Result<String, MemoryAccessError> {
    let bytes = read_c_bytes(memory, ptr, max_len)?;
    String::from_utf8(bytes).map_err(|_| MemoryAccessError::NonUtf8String)
}

/// An in-process guest: a zeroed byte vector plus a first-fit allocator.
///
/// The first [`LinearMemory::NULL_PAGE`] bytes are never handed out so that
/// address `0` can keep meaning "no allocation".
#[derive(Debug, Clone)]
pub struct LinearMemory {
    data: Vec<u8>,
    live: BTreeMap<u32, u32>,
}

impl LinearMemory {
    pub const NULL_PAGE: u32 = 0x1000;
    const ALIGN: u64 = 8;

    pub fn new(size: u32) -> Self {
        Self {
            data: vec![0; size.max(Self::NULL_PAGE) as usize],
            live: BTreeMap::new(),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn allocation_size(&self, ptr: GuestPtr) -> Option<u32> {
        self.live.get(&ptr.0).copied()
    }

    /// Allocates and fills a NUL-terminated copy of `value`.
    pub fn store_c_string(&mut self, value: impl AsRef<[u8]>) -> Result<GuestPtr, AllocError> {
        let value = value.as_ref();
        let len = u32::try_from(value.len() + 1).map_err(|_| AllocError::OutOfMemory(u32::MAX))?;
        let ptr = self.alloc(len)?;
        let start = ptr.0 as usize;
        self.data[start..start + value.len()].copy_from_slice(value);
        Ok(ptr)
    }

    fn align_up(value: u64) -> u64 {
        value.div_ceil(Self::ALIGN) * Self::ALIGN
    }
}

impl GuestMemory for LinearMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryAccessError> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(MemoryAccessError::Overflow)?;
        if end > self.size() {
            return Err(MemoryAccessError::HeapOutOfBounds);
        }
        buf.copy_from_slice(&self.data[offset as usize..end as usize]);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), MemoryAccessError> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(MemoryAccessError::Overflow)?;
        if end > self.size() {
            tracing::warn!(
                "attempted to write ({} bytes) beyond the bounds of guest memory ({} > {})",
                data.len(),
                end,
                self.size()
            );
            return Err(MemoryAccessError::HeapOutOfBounds);
        }
        self.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

impl GuestAllocator for LinearMemory {
    fn alloc(&mut self, size: u32) -> Result<GuestPtr, AllocError> {
        // Zero-sized requests still get a distinct, non-null address.
        let needed = u64::from(size.max(1));
        let mut cursor = u64::from(Self::NULL_PAGE);

        for (&addr, &len) in &self.live {
            if u64::from(addr) >= cursor + needed {
                break;
            }
            cursor = Self::align_up(u64::from(addr) + u64::from(len.max(1)));
        }

        if cursor + needed > self.size() {
            return Err(AllocError::OutOfMemory(size));
        }

        let addr = cursor as u32;
        self.data[cursor as usize..(cursor + needed) as usize].fill(0);
        self.live.insert(addr, size);
        tracing::trace!(addr, size, "guest alloc");
        Ok(GuestPtr(addr))
    }

    fn free(&mut self, ptr: GuestPtr) -> Result<(), AllocError> {
        match self.live.remove(&ptr.0) {
            Some(size) => {
                tracing::trace!(addr = ptr.0, size, "guest free");
                Ok(())
            }
            None => Err(AllocError::InvalidFree(ptr.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut memory = LinearMemory::new(0x2000);
        let a = memory.alloc(3).unwrap();
        let b = memory.alloc(16).unwrap();
        assert_eq!(a.offset(), LinearMemory::NULL_PAGE);
        assert_eq!(b.offset(), LinearMemory::NULL_PAGE + 8);
        assert_eq!(memory.live_allocations(), 2);
    }

    #[test]
    fn freed_space_is_reused() {
        let mut memory = LinearMemory::new(0x2000);
        let a = memory.alloc(32).unwrap();
        let _b = memory.alloc(32).unwrap();
        memory.free(a).unwrap();
        let c = memory.alloc(24).unwrap();
        assert_eq!(c, a);
        assert_eq!(memory.free(GuestPtr::new(0x1234)), Err(AllocError::InvalidFree(0x1234)));
    }

    #[test]
    fn exhausted_heap_reports_out_of_memory() {
        let mut memory = LinearMemory::new(0x1100);
        assert!(memory.alloc(0x80).is_ok());
        assert_eq!(memory.alloc(0x100), Err(AllocError::OutOfMemory(0x100)));
    }

    #[test]
    fn buffer_writes_are_clamped_to_capacity() {
        let mut memory = LinearMemory::new(0x2000);
        let ptr = memory.alloc(4).unwrap();
        let buffer = GuestBuffer::new(ptr, 4);

        assert_eq!(
            buffer.write_at(&mut memory, 2, b"abc"),
            Err(MemoryAccessError::HeapOutOfBounds)
        );
        // A rejected write leaves the region untouched.
        assert_eq!(buffer.to_vec(&memory).unwrap(), vec![0, 0, 0, 0]);

        buffer.write_at(&mut memory, 1, b"abc").unwrap();
        assert_eq!(buffer.to_vec(&memory).unwrap(), b"\0abc".to_vec());
    }

    #[test]
    fn buffer_past_end_of_memory_is_rejected() {
        let mut memory = LinearMemory::new(0x1000);
        let buffer = GuestBuffer::new(GuestPtr::new(0xffe), 8);
        assert_eq!(
            buffer.write_at(&mut memory, 0, b"12345678"),
            Err(MemoryAccessError::HeapOutOfBounds)
        );
    }

    #[test]
    fn c_strings_are_read_up_to_the_terminator() {
        let mut memory = LinearMemory::new(0x2000);
        let long = "x".repeat(100);
        let ptr = memory.store_c_string(&long).unwrap();
        assert_eq!(read_c_string(&memory, ptr, 4096).unwrap(), long);
        assert_eq!(
            read_c_string(&memory, ptr, 10),
            Err(MemoryAccessError::Unterminated(10))
        );
        assert_eq!(
            read_c_string(&memory, GuestPtr::NULL, 10),
            Err(MemoryAccessError::NullPointer)
        );
    }

    #[test]
    fn raw_bytes_are_read_without_decoding() {
        let mut memory = LinearMemory::new(0x2000);
        let ptr = memory.store_c_string(b"/tmp/\xff").unwrap();
        assert_eq!(read_c_bytes(&memory, ptr, 64).unwrap(), b"/tmp/\xff".to_vec());
        assert_eq!(
            read_c_string(&memory, ptr, 64),
            Err(MemoryAccessError::NonUtf8String)
        );
    }

    #[test]
    fn zero_sized_allocations_are_distinct_and_non_null() {
        let mut memory = LinearMemory::new(0x2000);
        let a = memory.alloc(0).unwrap();
        let b = memory.alloc(0).unwrap();
        assert!(!a.is_null());
        assert_ne!(a, b);
        assert_eq!(memory.allocation_size(a), Some(0));
    }

    #[test]
    fn unterminated_string_at_end_of_memory_faults() {
        let mut memory = LinearMemory::new(0x1000);
        memory.write(0xffc, b"abcd").unwrap();
        assert_eq!(
            read_c_string(&memory, GuestPtr::new(0xffc), 4096),
            Err(MemoryAccessError::HeapOutOfBounds)
        );
    }

    #[test]
    fn integers_are_little_endian() {
        let mut memory = LinearMemory::new(0x1000);
        let ptr = GuestPtr::new(0x10);
        ptr.write_u64(&mut memory, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(ptr.read_u32(&memory).unwrap(), 0x0506_0708);
        assert_eq!(
            GuestPtr::new(0xffe).write_u32(&mut memory, 1),
            Err(MemoryAccessError::HeapOutOfBounds)
        );
    }
}
