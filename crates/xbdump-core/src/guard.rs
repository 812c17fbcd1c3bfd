//! Output destination checks.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Please specify an output file using --output option")]
    EmptyPath,

    #[error("Output file already exists: '{}'", .0.display())]
    AlreadyExists(PathBuf),
}

/// Check that `path` is usable as a dump destination.
///
/// Performs no I/O beyond an existence check, so a failure never leaves
/// anything behind.
pub fn validate(path: &Path, overwrite_allowed: bool) -> Result<(), GuardError> {
    if path.as_os_str().is_empty() {
        return Err(GuardError::EmptyPath);
    }
    // symlink_metadata so a dangling link still counts as an existing entry
    if !overwrite_allowed && path.symlink_metadata().is_ok() {
        return Err(GuardError::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}
