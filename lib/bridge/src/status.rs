//! The closed set of status codes every guest-facing call reports.

use std::fmt;
use std::path::Path;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, warn};

const MIB: f64 = 1024.0 * 1024.0;

/// Outcome of a guest-facing operation, as seen by the guest.
///
/// The discriminants are the wire values and must stay in sync with the
/// guest-side header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    Unknown = 1,
    PathNoExist = 2,
    /// Reserved: missing paths are reported as [`StatusCode::PathNoExist`].
    FileNoExist = 3,
    /// Reserved: missing paths are reported as [`StatusCode::PathNoExist`].
    DirNoExist = 4,
    ExpectedFile = 5,
    ExpectedDir = 6,
    FileTooLarge = 7,
    ReadFile = 8,
}

impl StatusCode {
    pub const fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    pub const fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Unknown => "ERR_UNKNOWN",
            StatusCode::PathNoExist => "ERR_PATH_NO_EXIST",
            StatusCode::FileNoExist => "ERR_FILE_NO_EXIST",
            StatusCode::DirNoExist => "ERR_DIR_NO_EXIST",
            StatusCode::ExpectedFile => "EXPECTED_FILE",
            StatusCode::ExpectedDir => "EXPECTED_DIR",
            StatusCode::FileTooLarge => "ERR_FILE_TOO_LARGE",
            StatusCode::ReadFile => "ERR_READ_FILE",
        }
    }

    /// Human-readable account of this status for `path`.
    pub fn describe(self, path: impl AsRef<Path>, max_file_size: u64) -> String {
        let path = path.as_ref().display();
        match self {
            StatusCode::Ok => format!("operation on {path} completed successfully"),
            StatusCode::Unknown => format!("unspecified error while processing {path}"),
            StatusCode::PathNoExist => format!("nothing exists at {path}"),
            StatusCode::FileNoExist => format!("no file at {path}"),
            StatusCode::DirNoExist => format!("no directory at {path}"),
            StatusCode::ExpectedFile => format!("expected a file, but {path} is not a file"),
            StatusCode::ExpectedDir => {
                format!("expected a directory, but {path} is not a directory")
            }
            StatusCode::FileTooLarge => format!(
                "{path} is too large, files are limited to {:.2} MiB",
                max_file_size as f64 / MIB
            ),
            StatusCode::ReadFile => format!("failed while reading {path}"),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Narrates `status` for `path` on the log sink.
pub fn log_status(path: &Path, status: StatusCode, max_file_size: u64) {
    let message = status.describe(path, max_file_size);
    if status.is_ok() {
        debug!(%status, "{message}");
    } else {
        warn!(%status, "{message}");
    }
}
