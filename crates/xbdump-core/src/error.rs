//! Top-level dump error.

use thiserror::Error;

use crate::backend::ResolveError;
use crate::flash::FlashError;
use crate::guard::GuardError;
use crate::query::QueryError;
use crate::snapshot::SnapshotError;

/// Process exit code for a canceled dump (Linux `ECANCELED`).
pub const EXIT_CANCELED: i32 = 125;

/// Any reason a dump did not complete.
///
/// Every variant means the same thing to the caller: the operation was
/// canceled. The variants only drive the human-readable message.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Output(#[from] GuardError),

    #[error("Please specify a valid option to determine the type of dump")]
    NoDumpMode,

    #[error("Failed to read device configuration: {0}")]
    Query(#[from] QueryError),

    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error("Failed to write config dump: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl DumpError {
    /// Caused by how the tool was invoked rather than by the device.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            DumpError::Resolve(_) | DumpError::Output(_) | DumpError::NoDumpMode
        )
    }

    /// The operator should be shown the command help.
    pub fn wants_help(&self) -> bool {
        matches!(
            self,
            DumpError::Output(GuardError::EmptyPath) | DumpError::NoDumpMode
        )
    }
}
