//! Error types for ostester

use thiserror::Error;

/// Result type alias using the shared ostester Error
pub type Result<T> = std::result::Result<T, Error>;

/// Shared error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("QMP error: {0}")]
    Qmp(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid action in stage '{stage}': {reason}\n{descriptor}")]
    InvalidAction {
        stage: String,
        descriptor: String,
        reason: String,
    },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },
}
