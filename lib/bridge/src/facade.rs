//! The guest-facing operations, expressed over host types.
//!
//! [`Bridge`] classifies every path before touching it, so the first
//! applicable status wins: a missing path is always `ERR_PATH_NO_EXIST`, a
//! path of the wrong kind is `EXPECTED_FILE` or `EXPECTED_DIR`, and only then
//! are size limits and read failures considered.

use std::path::Path;

use tracing::{debug, instrument};

use crate::config::BridgeConfig;
use crate::copy::{copy_file_into, copy_str_into};
use crate::enumerate::{self, DirSnapshot};
use crate::memory::{AllocError, GuestAllocator, GuestBuffer, GuestMemory};
use crate::path::join_segments;
use crate::resolve::{PathClass, PathResolver};
use crate::status::{StatusCode, log_status};
use crate::{BridgeError, Reply};

/// Host side of the bridge, bound to one guest's memory.
#[derive(Debug)]
pub struct Bridge<M> {
    memory: M,
    resolver: PathResolver,
    config: BridgeConfig,
}

impl<M> Bridge<M>
where
    M: GuestMemory + GuestAllocator,
{
    pub fn new(memory: M, config: BridgeConfig) -> Self {
        let resolver = PathResolver::new(config.base_dir.clone());
        Self {
            memory,
            resolver,
            config,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn is_exist(&self, path: impl AsRef<Path>) -> bool {
        self.resolver.exists(path)
    }

    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.resolver.is_file(path)
    }

    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn is_directory(&self, path: impl AsRef<Path>) -> bool {
        self.resolver.is_directory(path)
    }

    /// Exact size in bytes of the regular file at `path`.
    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn get_file_size(&self, path: impl AsRef<Path>) -> Reply<u64> {
        let path = path.as_ref();
        let reply = self.file_size(path);
        self.report(path, &reply);
        reply
    }

    /// Allocates a guest buffer of exactly the file's size and fills it.
    ///
    /// On any non-OK status nothing is left allocated.
    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn load_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Reply<GuestBuffer>, BridgeError> {
        let path = path.as_ref();
        let reply = self.try_load_file(path)?;
        self.report(path, &reply);
        Ok(reply)
    }

    /// Number of entries below the directory at `path`, recursively.
    #[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), ret)]
    pub fn get_num_dir_entries(&self, path: impl AsRef<Path>) -> Reply<u64> {
        let path = path.as_ref();
        let reply = match self.resolver.classify(path) {
            PathClass::Missing => Err(StatusCode::PathNoExist),
            PathClass::Directory => Ok(u64::from(enumerate::count(
                &self.resolver,
                path,
                self.config.listing,
            ))),
            PathClass::File | PathClass::Other => Err(StatusCode::ExpectedDir),
        };
        self.report(path, &reply);
        reply
    }

    /// Allocates a NUL-terminated copy of the `index`th entry name below
    /// `path`. An index past the end reports `ERR_PATH_NO_EXIST` without
    /// allocating.
    #[instrument(
        level = "trace",
        skip_all,
        fields(path = %path.as_ref().display(), index = index),
        ret
    )]
    pub fn get_dir_entry_name_by_index(
        &mut self,
        path: impl AsRef<Path>,
        index: u64,
    ) -> Result<Reply<GuestBuffer>, BridgeError> {
        let path = path.as_ref();
        let reply = self.try_dir_entry_name(path, index)?;
        self.report(path, &reply);
        Ok(reply)
    }

    /// Joins `segments` with `/` into a fresh NUL-terminated guest string.
    #[instrument(level = "trace", skip_all, fields(segments = segments.len()), ret)]
    pub fn combined_path<S: AsRef<[u8]>>(
        &mut self,
        segments: &[S],
    ) -> Result<GuestBuffer, BridgeError> {
        let mut staged = join_segments(segments).ok_or(BridgeError::NoPathSegments)?;
        staged.push(0);

        let capacity =
            u32::try_from(staged.len()).map_err(|_| AllocError::OutOfMemory(u32::MAX))?;
        let buffer = GuestBuffer::new(self.memory.alloc(capacity)?, capacity);
        if let Err(err) = buffer.write_at(&mut self.memory, 0, &staged) {
            self.memory.free(buffer.ptr())?;
            return Err(err.into());
        }
        Ok(buffer)
    }

    fn file_size(&self, path: &Path) -> Reply<u64> {
        match self.resolver.classify(path) {
            PathClass::Missing => Err(StatusCode::PathNoExist),
            // Removed or replaced since it was classified.
            PathClass::File => self
                .resolver
                .file_size(path)
                .ok_or(StatusCode::PathNoExist),
            PathClass::Directory | PathClass::Other => Err(StatusCode::ExpectedFile),
        }
    }

    fn try_load_file(&mut self, path: &Path) -> Result<Reply<GuestBuffer>, BridgeError> {
        let size = match self.file_size(path) {
            Ok(size) => size,
            Err(status) => return Ok(Err(status)),
        };
        if size > self.config.max_file_size {
            return Ok(Err(StatusCode::FileTooLarge));
        }
        // Whatever the configured limit, a 32-bit guest cannot address more.
        let Ok(capacity) = u32::try_from(size) else {
            return Ok(Err(StatusCode::FileTooLarge));
        };

        let buffer = GuestBuffer::new(self.memory.alloc(capacity)?, capacity);
        if copy_file_into(&self.resolver, path, &mut self.memory, buffer) {
            return Ok(Ok(buffer));
        }

        debug!(addr = buffer.ptr().offset(), "releasing buffer after failed read");
        self.memory.free(buffer.ptr())?;
        Ok(Err(StatusCode::ReadFile))
    }

    fn try_dir_entry_name(
        &mut self,
        path: &Path,
        index: u64,
    ) -> Result<Reply<GuestBuffer>, BridgeError> {
        let snapshot = match self.resolver.classify(path) {
            PathClass::Missing => return Ok(Err(StatusCode::PathNoExist)),
            PathClass::File | PathClass::Other => return Ok(Err(StatusCode::ExpectedDir)),
            PathClass::Directory => {
                DirSnapshot::capture(&self.resolver, path, self.config.listing)
            }
        };
        // The snapshot that sized the entry is the one it is copied from.
        let Some(name) = snapshot.as_ref().and_then(|snapshot| snapshot.get(index)) else {
            return Ok(Err(StatusCode::PathNoExist));
        };

        let capacity =
            u32::try_from(name.len() + 1).map_err(|_| AllocError::OutOfMemory(u32::MAX))?;
        let buffer = GuestBuffer::new(self.memory.alloc(capacity)?, capacity);
        if copy_str_into(&mut self.memory, buffer, name) {
            return Ok(Ok(buffer));
        }

        self.memory.free(buffer.ptr())?;
        Ok(Err(StatusCode::Unknown))
    }

    fn report<T>(&self, path: &Path, reply: &Reply<T>) {
        let status = match reply {
            Ok(_) => StatusCode::Ok,
            Err(status) => *status,
        };
        log_status(path, status, self.config.max_file_size);
    }
}
