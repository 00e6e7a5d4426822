//! ostester Common Library
//!
//! Stage definitions, the QMP client and the error type shared by the
//! runner and the command line front end.

pub mod error;
pub mod qmp;
pub mod stages;

pub use error::{Error, Result};
pub use stages::{Action, MouseButton, NextStage, Stage, StageSet, Subpath};

/// ostester version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
