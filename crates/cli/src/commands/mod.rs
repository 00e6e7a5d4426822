//! CLI Commands

pub mod check;
pub mod run;

use ostester_runner::{exit_code, RunError};
use std::path::PathBuf;

/// Failures that map to a dedicated exit status
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid stage file {}: {source}", .path.display())]
    Definition {
        path: PathBuf,
        #[source]
        source: ostester_common::Error,
    },

    #[error("cannot reach QEMU monitor at {}: {source}", .socket.display())]
    Unreachable {
        socket: PathBuf,
        #[source]
        source: ostester_common::Error,
    },

    #[error("{count} transition(s) name an unknown stage")]
    UnresolvedTransitions { count: usize },
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Definition { .. } => exit_code::INVALID_DEFINITION,
            CommandError::Unreachable { .. } => exit_code::MACHINE_UNREACHABLE,
            CommandError::UnresolvedTransitions { .. } => exit_code::UNKNOWN_STAGE,
        }
    }
}

/// Process status for a failed command
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CommandError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<RunError>() {
            return e.exit_code();
        }
    }
    exit_code::INTERNAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::time::Duration;

    #[test]
    fn test_run_errors_keep_their_code_through_context() {
        let err: anyhow::Result<()> = Err(RunError::Timeout {
            stage: "login".to_string(),
            timeout: Duration::from_secs(3),
            polls: 12,
        })
        .context("stage run failed");
        assert_eq!(exit_code_for(&err.unwrap_err()), exit_code::TIMEOUT);
    }

    #[test]
    fn test_command_error_codes() {
        let definition = anyhow::Error::new(CommandError::Definition {
            path: PathBuf::from("stages.yaml"),
            source: ostester_common::Error::InvalidConfig("no stages".to_string()),
        });
        assert_eq!(exit_code_for(&definition), exit_code::INVALID_DEFINITION);

        let unreachable = anyhow::Error::new(CommandError::Unreachable {
            socket: PathBuf::from("/tmp/qmp.sock"),
            source: ostester_common::Error::Timeout { seconds: 30 },
        });
        assert_eq!(exit_code_for(&unreachable), exit_code::MACHINE_UNREACHABLE);

        let unresolved = anyhow::Error::new(CommandError::UnresolvedTransitions { count: 2 });
        assert_eq!(exit_code_for(&unresolved), exit_code::UNKNOWN_STAGE);
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(exit_code_for(&err), exit_code::INTERNAL);
    }
}
