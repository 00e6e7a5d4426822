//! Stage runs against a live VM

use anyhow::{Context, Result};
use clap::Args;
use ostester_common::StageSet;
use ostester_runner::{DiffDumpSink, QmpMachine, RunnerConfig, StageRunner};
use std::path::PathBuf;
use tracing::{info, warn};

use super::CommandError;
use crate::config::HarnessConfig;
use crate::output::{print_report, print_success, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Stage definition file (YAML)
    #[arg(long, env = "OSTESTER_STAGES")]
    pub stages: PathBuf,

    /// QMP socket of the VM under test
    #[arg(long, env = "OSTESTER_QMP_SOCKET")]
    pub qmp_socket: Option<PathBuf>,

    /// Harness configuration file (TOML)
    #[arg(short, long, default_value = "ostester.toml")]
    pub config: PathBuf,

    /// Seconds to keep retrying the QMP connection
    #[arg(long)]
    pub connect_timeout_s: Option<u64>,

    /// Dump diff images and comparison samples here
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Pause between unmatched screenshots
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Where screenshots are written
    #[arg(long)]
    pub capture_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Config file values with command line overrides applied
    fn resolve(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::load(&self.config)
            .with_context(|| format!("reading {}", self.config.display()))?;
        if let Some(socket) = &self.qmp_socket {
            config.qmp_socket = socket.clone();
        }
        if let Some(timeout) = self.connect_timeout_s {
            config.connect_timeout_s = timeout;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        if self.capture_dir.is_some() {
            config.capture_dir = self.capture_dir.clone();
        }
        if self.debug_dir.is_some() {
            config.debug_dir = self.debug_dir.clone();
        }
        if self.report.is_some() {
            config.report = self.report.clone();
        }
        Ok(config)
    }
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<()> {
    let config = args.resolve()?;

    let stages = StageSet::from_file(&args.stages).map_err(|source| CommandError::Definition {
        path: args.stages.clone(),
        source,
    })?;
    info!(
        "Loaded {} stage(s) from {}, entry stage '{}'",
        stages.len(),
        args.stages.display(),
        stages.entry().name
    );

    let machine = QmpMachine::connect(&config.qmp_socket, config.connect_timeout_s)
        .await
        .map_err(|source| CommandError::Unreachable {
            socket: config.qmp_socket.clone(),
            source,
        })?;
    match machine.status().await {
        Ok(status) if !status.running => {
            warn!("VM is not running (status: {})", status.status)
        }
        Ok(status) => info!("VM status: {}", status.status),
        Err(e) => warn!("Cannot query VM status: {}", e),
    }

    let runner_config = RunnerConfig {
        poll_interval: config.poll_interval(),
        capture_dir: config.capture_dir(),
        ..Default::default()
    };
    let mut runner = StageRunner::with_config(machine, runner_config);
    if let Some(dir) = &config.debug_dir {
        let sink = DiffDumpSink::new(dir)
            .with_context(|| format!("creating debug directory {}", dir.display()))?;
        runner = runner.with_telemetry(Box::new(sink));
    }

    let result = runner.run(&stages).await;
    runner.machine().close().await;
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if e.is_configuration_error() {
                warn!("{} needs fixing before the run can pass", args.stages.display());
            }
            return Err(e.into());
        }
    };

    if let Some(path) = &config.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    print_report(&report, format);
    print_success(&format!("All {} stage(s) passed", report.stages.len()));
    Ok(())
}
