//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for a run. Read from an optional TOML file; command line flags
/// override individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// QMP socket of the VM under test
    pub qmp_socket: PathBuf,

    /// How long to keep retrying the QMP connection
    pub connect_timeout_s: u64,

    /// Pause between unmatched screenshots
    pub poll_interval_ms: u64,

    /// Where screenshots are written (system temp dir when unset)
    pub capture_dir: Option<PathBuf>,

    /// Enables diff image and sample dumps
    pub debug_dir: Option<PathBuf>,

    /// JSON run report destination
    pub report: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            qmp_socket: PathBuf::from("/tmp/ostester-qmp.sock"),
            connect_timeout_s: 30,
            poll_interval_ms: 250,
            capture_dir: None,
            debug_dir: None,
            report: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, or defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Capture directory, falling back to the system temp dir
    pub fn capture_dir(&self) -> PathBuf {
        self.capture_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
