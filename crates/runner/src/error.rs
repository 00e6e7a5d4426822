//! Fatal run outcomes
//!
//! Every variant ends the run. Each one maps to its own process exit code so
//! CI can tell a bad test definition from a VM that never got where it was
//! expected to.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Stage '{stage}': reference image '{}' not found", .path.display())]
    ReferenceMissing { stage: String, path: PathBuf },

    #[error("Stage '{stage}': reference image '{}' is not a file", .path.display())]
    ReferenceNotFile { stage: String, path: PathBuf },

    #[error("Stage '{stage}': reference image '{}' could not be decoded: {source}", .path.display())]
    ReferenceUnreadable {
        stage: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Stage '{stage}' timed out after {:.2}s ({polls} polls)", .timeout.as_secs_f64())]
    Timeout {
        stage: String,
        timeout: Duration,
        polls: u32,
    },

    #[error("Stage '{from}' leads to '{name}', but no stage with that name exists")]
    UnknownStage { from: String, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::ReferenceMissing { .. } => exit_code::REFERENCE_MISSING,
            RunError::ReferenceNotFile { .. } => exit_code::REFERENCE_NOT_FILE,
            RunError::ReferenceUnreadable { .. } => exit_code::REFERENCE_UNREADABLE,
            RunError::Timeout { .. } => exit_code::TIMEOUT,
            RunError::UnknownStage { .. } => exit_code::UNKNOWN_STAGE,
            RunError::Io(_) => exit_code::INTERNAL,
        }
    }

    /// Whether the failure comes from the test definition rather than the VM
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, RunError::Timeout { .. } | RunError::Io(_))
    }
}

/// Exit statuses shared by the harness binaries
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const REFERENCE_MISSING: i32 = 2;
    pub const REFERENCE_NOT_FILE: i32 = 3;
    pub const REFERENCE_UNREADABLE: i32 = 4;
    pub const TIMEOUT: i32 = 5;
    pub const INVALID_DEFINITION: i32 = 6;
    pub const MACHINE_UNREACHABLE: i32 = 7;
    pub const UNKNOWN_STAGE: i32 = 10;
}

pub type RunResult<T> = Result<T, RunError>;
