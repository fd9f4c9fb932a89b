//! Host filesystem access for sandboxed guests.
//!
//! A guest running in its own linear memory cannot see the host
//! filesystem. This crate answers a small, fixed set of questions about it
//! on the guest's behalf (does a path exist, how large is a file, what is
//! in a directory) and marshals the answers back into guest memory through
//! bounds-checked buffers.
//!
//! The layers, from the boundary inwards:
//!
//! - [`exports`]: the boundary table, taking raw guest addresses.
//! - [`Bridge`]: the same operations over host types, with status codes.
//! - [`resolve`], [`copy`], [`enumerate`] and [`path`]: the building blocks.
//! - [`memory`]: the guest memory and allocator contract, plus
//!   [`LinearMemory`], an in-process guest used by the CLI and the tests.
//!
//! ```
//! use hostfs_bridge::{Bridge, BridgeConfig, LinearMemory, StatusCode};
//!
//! let mut bridge = Bridge::new(LinearMemory::new(0x10000), BridgeConfig::default());
//! assert_eq!(
//!     bridge.get_file_size("definitely/not/here.bin"),
//!     Err(StatusCode::PathNoExist)
//! );
//! let joined = bridge.combined_path(&["mods", "data.bin"]).unwrap();
//! assert_eq!(joined.capacity(), "mods/data.bin".len() as u32 + 1);
//! ```

pub mod config;
pub mod copy;
pub mod enumerate;
pub mod exports;
pub mod facade;
pub mod memory;
pub mod path;
pub mod resolve;
pub mod status;

use thiserror::Error;

pub use crate::config::{BridgeConfig, ConfigError};
pub use crate::enumerate::{DirSnapshot, ListingMode};
pub use crate::facade::Bridge;
pub use crate::memory::{
    AllocError, GuestAllocator, GuestBuffer, GuestMemory, GuestPtr, LinearMemory,
    MemoryAccessError,
};
pub use crate::resolve::{PathClass, PathResolver};
pub use crate::status::StatusCode;

/// Result of a guest-facing operation: the value, or the status the guest
/// will see instead.
pub type Reply<T> = Result<T, StatusCode>;

/// A failure the guest cannot be told about through a [`StatusCode`].
///
/// These abort the call; the host decides whether the guest survives it.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("guest memory access failed: {0}")]
    Memory(#[from] MemoryAccessError),
    #[error("guest allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("no path segments to combine")]
    NoPathSegments,
}
