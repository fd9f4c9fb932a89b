//! Recursive, index-addressable directory listings.
//!
//! A [`DirSnapshot`] is recomputed for every query and lives no longer than
//! the call that captured it. Two snapshots of an unchanged tree are equal,
//! which is what keeps a guest's `count` and `name by index` calls in step.

use std::path::Path;

use serde::Deserialize;
use tracing::trace;
use walkdir::WalkDir;

use crate::path::SEPARATOR;
use crate::resolve::{PathResolver, guest_bytes};

/// Which walk results make it into a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    /// Everything that is not a directory: files, symlinks, special files.
    #[default]
    Files,
    /// Directories are listed too, each before its own contents.
    All,
}

impl ListingMode {
    fn admits(self, entry: &walkdir::DirEntry) -> bool {
        match self {
            ListingMode::Files => !entry.file_type().is_dir(),
            ListingMode::All => true,
        }
    }
}

/// Every entry below a directory, as `/`-separated relative paths sorted by
/// byte order.
///
/// Names are kept as the host's raw bytes, so a name that is not valid
/// UTF-8 still reaches the guest as something it can pass back in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirSnapshot {
    entries: Vec<Vec<u8>>,
}

impl DirSnapshot {
    /// Walks `dir_path`, or returns `None` if it does not resolve to a directory.
    pub fn capture(
        resolver: &PathResolver,
        dir_path: impl AsRef<Path>,
        mode: ListingMode,
    ) -> Option<Self> {
        let root = resolver.resolve(dir_path);
        if !root.is_dir() {
            return None;
        }
        Some(Self::walk(&root, mode))
    }

    fn walk(root: &Path, mode: ListingMode) -> Self {
        let mut entries: Vec<Vec<u8>> = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if mode.admits(&entry) => relative_name(root, entry.path()),
                Ok(_) => None,
                Err(err) => {
                    // Entries removed mid-walk or unreadable subtrees.
                    trace!(%err, "skipping directory entry");
                    None
                }
            })
            .collect();
        entries.sort_unstable();
        trace!(root = %root.display(), count = entries.len(), "captured directory snapshot");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&[u8]> {
        let index = usize::try_from(index).ok()?;
        self.entries.get(index).map(Vec::as_slice)
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<Vec<u8>> {
    let relative = path.strip_prefix(root).ok()?;
    let mut name = Vec::new();
    for component in relative.components() {
        if !name.is_empty() {
            name.push(SEPARATOR);
        }
        name.extend_from_slice(&guest_bytes(component.as_os_str()));
    }
    (!name.is_empty()).then_some(name)
}

/// Number of entries below `dir_path`; 0 if it is not a directory.
pub fn count(resolver: &PathResolver, dir_path: impl AsRef<Path>, mode: ListingMode) -> u32 {
    DirSnapshot::capture(resolver, dir_path, mode)
        .map(|snapshot| u32::try_from(snapshot.len()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Byte length of the entry at `index`; 0 if out of range or not a directory.
pub fn name_length(
    resolver: &PathResolver,
    dir_path: impl AsRef<Path>,
    mode: ListingMode,
    index: u64,
) -> u32 {
    DirSnapshot::capture(resolver, dir_path, mode)
        .and_then(|snapshot| snapshot.get(index).map(<[u8]>::len))
        .map(|len| u32::try_from(len).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

pub fn name_at(
    resolver: &PathResolver,
    dir_path: impl AsRef<Path>,
    mode: ListingMode,
    index: u64,
) -> Option<Vec<u8>> {
    DirSnapshot::capture(resolver, dir_path, mode)?
        .get(index)
        .map(<[u8]>::to_vec)
}
