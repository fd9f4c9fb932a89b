//! Path resolution and classification.
//!
//! Guest paths are never used raw: they are resolved to a weakly canonical
//! host path first (the longest existing prefix canonicalized, the rest
//! normalized lexically), then classified from a fresh `stat`.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// What a resolved path currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathClass {
    Missing,
    File,
    Directory,
    /// Exists, but is neither a regular file nor a directory (device, socket, fifo).
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    base_dir: Option<PathBuf>,
}

impl PathResolver {
    /// Relative guest paths are joined onto `base_dir` when one is given,
    /// otherwise they are taken relative to the host working directory.
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let raw = path.as_ref();
        match &self.base_dir {
            Some(base) if raw.is_relative() && !raw.as_os_str().is_empty() => {
                weakly_canonical(&base.join(raw))
            }
            _ => weakly_canonical(raw),
        }
    }

    pub fn classify(&self, path: impl AsRef<Path>) -> PathClass {
        classify_resolved(&self.resolve(path))
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.classify(path) != PathClass::Missing
    }

    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.classify(path) == PathClass::File
    }

    pub fn is_directory(&self, path: impl AsRef<Path>) -> bool {
        self.classify(path) == PathClass::Directory
    }

    /// Exact byte length of a regular file, `None` for anything else.
    pub fn file_size(&self, path: impl AsRef<Path>) -> Option<u64> {
        match fs::metadata(self.resolve(path)) {
            Ok(metadata) if metadata.is_file() => Some(metadata.len()),
            _ => None,
        }
    }
}

/// The host path named by raw guest bytes.
///
/// Unix paths are arbitrary bytes and are taken as-is. Elsewhere the bytes
/// are decoded as UTF-8, with invalid sequences replaced.
#[cfg(unix)]
pub fn host_path(bytes: &[u8]) -> Cow<'_, Path> {
    use std::os::unix::ffi::OsStrExt;

    Cow::Borrowed(Path::new(OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
pub fn host_path(bytes: &[u8]) -> Cow<'_, Path> {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(path) => Cow::Borrowed(Path::new(path)),
        Cow::Owned(path) => Cow::Owned(PathBuf::from(path)),
    }
}

/// The bytes a guest sees for a host name; the inverse of [`host_path`].
#[cfg(unix)]
pub fn guest_bytes(name: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;

    Cow::Borrowed(name.as_bytes())
}

#[cfg(not(unix))]
pub fn guest_bytes(name: &OsStr) -> Cow<'_, [u8]> {
    match name.to_string_lossy() {
        Cow::Borrowed(name) => Cow::Borrowed(name.as_bytes()),
        Cow::Owned(name) => Cow::Owned(name.into_bytes()),
    }
}

pub(crate) fn classify_resolved(path: &Path) -> PathClass {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => PathClass::File,
        Ok(metadata) if metadata.is_dir() => PathClass::Directory,
        Ok(_) => PathClass::Other,
        Err(_) => PathClass::Missing,
    }
}

/// Canonicalizes the longest prefix of `path` that exists and appends the
/// remaining components, normalized. Never fails: a path with no existing
/// prefix comes back lexically normalized.
pub fn weakly_canonical(path: &Path) -> PathBuf {
    let mut head: Vec<Component<'_>> = path.components().collect();
    let mut tail: Vec<Component<'_>> = Vec::new();

    while !head.is_empty() {
        let prefix: PathBuf = head.iter().collect();
        if let Ok(canonical) = dunce::canonicalize(&prefix) {
            let mut out = canonical;
            out.extend(tail.iter().rev());
            return normalize_path(&out);
        }
        if let Some(component) = head.pop() {
            tail.push(component);
        }
    }

    normalize_path(path)
}

// Copied from cargo
// https://github.com/rust-lang/cargo/blob/fede83ccf973457de319ba6fa0e36ead454d2e20/src/cargo/util/paths.rs#L61
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => {}
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn resolver_in(temp: &TempDir) -> PathResolver {
        PathResolver::new(Some(temp.path().to_path_buf()))
    }

    #[test]
    fn classifies_files_directories_and_missing_paths() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        let resolver = resolver_in(&temp);

        assert_eq!(resolver.classify("a.txt"), PathClass::File);
        assert_eq!(resolver.classify("sub"), PathClass::Directory);
        assert_eq!(resolver.classify("nope"), PathClass::Missing);
        assert_eq!(resolver.classify(""), PathClass::Missing);

        assert!(resolver.is_file("a.txt"));
        assert!(!resolver.is_directory("a.txt"));
        assert!(resolver.is_directory("sub"));
        assert!(!resolver.exists("nope/deeper"));
    }

    #[test]
    fn file_size_is_exact_for_regular_files_only() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"hello").unwrap();
        let resolver = resolver_in(&temp);

        assert_eq!(resolver.file_size("a.txt"), Some(5));
        assert_eq!(resolver.file_size("."), None);
        assert_eq!(resolver.file_size("missing.txt"), None);
    }

    #[test]
    fn resolution_is_idempotent() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        let resolver = resolver_in(&temp);

        let once = resolver.resolve("sub/../sub/./missing/../file");
        let twice = resolver.resolve(&once);
        assert_eq!(once, twice);
        assert!(once.ends_with("sub/file"));
    }

    #[test]
    fn absolute_paths_ignore_the_base_dir() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        std::fs::write(other.path().join("b.txt"), b"").unwrap();
        let resolver = resolver_in(&temp);

        let absolute = other.path().join("b.txt");
        assert!(resolver.is_file(&absolute));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_resolve_to_their_target() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("real")).unwrap();
        std::fs::write(temp.path().join("real/data.bin"), [1u8, 2, 3]).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling")).unwrap();
        let resolver = resolver_in(&temp);

        assert_eq!(resolver.resolve("link/data.bin"), resolver.resolve("real/data.bin"));
        assert_eq!(resolver.file_size("link/data.bin"), Some(3));
        assert_eq!(resolver.classify("dangling"), PathClass::Missing);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_names_are_resolved_byte_for_byte() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(host_path(b"\xffname.bin")), b"x").unwrap();
        let resolver = resolver_in(&temp);

        assert!(resolver.is_file(host_path(b"\xffname.bin")));
        assert!(!resolver.exists(host_path(b"\xfename.bin")));
        assert_eq!(
            guest_bytes(host_path(b"\xffname.bin").as_os_str()).as_ref(),
            b"\xffname.bin"
        );
    }

    #[cfg(unix)]
    #[test]
    fn devices_are_neither_files_nor_directories() {
        let resolver = PathResolver::default();
        assert_eq!(resolver.classify("/dev/null"), PathClass::Other);
        assert!(resolver.exists("/dev/null"));
        assert!(!resolver.is_file("/dev/null"));
        assert!(!resolver.is_directory("/dev/null"));
    }
}
