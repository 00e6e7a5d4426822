//! Stage orchestration
//!
//! Walks the stage graph from the first stage: wait for one of the stage's
//! screens, perform its actions, follow the matched path to the next stage.

use ostester_common::{NextStage, Stage, StageSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::dispatch::ActionDispatcher;
use crate::error::{RunError, RunResult};
use crate::machine::Machine;
use crate::sync::{VisualSync, DEFAULT_POLL_INTERVAL};
use crate::telemetry::{NoopSink, TelemetrySink};

/// What happened in one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub matched_path: usize,
    pub next_stage: String,
    pub polls: u32,
    pub mse: f64,
    pub ssim: f64,
    pub failed_actions: usize,
    pub duration_ms: u64,
}

/// Result of a run that reached its terminal stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub stages: Vec<StageRecord>,
    pub duration_ms: u64,
}

/// Main stage runner
pub struct StageRunner<M> {
    machine: M,
    config: RunnerConfig,
    telemetry: Box<dyn TelemetrySink>,
}

impl<M: Machine> StageRunner<M> {
    /// Create a runner with default configuration
    pub fn new(machine: M) -> Self {
        Self::with_config(machine, RunnerConfig::default())
    }

    pub fn with_config(machine: M, config: RunnerConfig) -> Self {
        Self {
            machine,
            config,
            telemetry: Box::new(NoopSink),
        }
    }

    pub fn with_telemetry(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run from the first stage until a path leads to the terminal state
    pub async fn run(&mut self, stages: &StageSet) -> RunResult<RunReport> {
        let start = Instant::now();
        std::fs::create_dir_all(&self.config.capture_dir)?;

        let mut records = Vec::new();
        let mut current = stages.entry();
        loop {
            let (record, next) = self.run_stage(current).await?;
            records.push(record);

            match next {
                NextStage::Terminate => break,
                NextStage::Continue(name) => {
                    current = stages.get(&name).ok_or_else(|| RunError::UnknownStage {
                        from: current.name.clone(),
                        name: name.clone(),
                    })?;
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run {} finished: {} stage(s) in {} ms",
            self.config.run_id,
            records.len(),
            duration_ms
        );

        if let Err(e) = std::fs::remove_file(self.config.capture_path()) {
            debug!("Capture file not removed: {}", e);
        }

        Ok(RunReport {
            run_id: self.config.run_id.clone(),
            stages: records,
            duration_ms,
        })
    }

    /// Wait for the stage's screen, then perform its actions
    async fn run_stage(&mut self, stage: &Stage) -> RunResult<(StageRecord, NextStage)> {
        let start = Instant::now();
        info!("Running stage '{}'", stage.name);

        let capture_path = self.config.capture_path();
        let outcome = VisualSync::new(
            &self.machine,
            self.telemetry.as_mut(),
            &capture_path,
            self.config.poll_interval,
        )
        .await_stage(stage)
        .await?;

        let failed_actions = ActionDispatcher::new(&self.machine)
            .perform_actions(stage)
            .await;

        let next = outcome.path.next_stage.clone();
        let duration = start.elapsed();
        info!(
            "Stage '{}' finished after {:.2}s. Next stage is: '{}'",
            stage.name,
            duration.as_secs_f64(),
            next
        );

        let record = StageRecord {
            name: stage.name.clone(),
            matched_path: outcome.index,
            next_stage: next.to_string(),
            polls: outcome.polls,
            mse: outcome.mse,
            ssim: outcome.ssim,
            failed_actions,
            duration_ms: duration.as_millis() as u64,
        };
        Ok((record, next))
    }
}

/// Configuration for the stage runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pause between unmatched polls
    pub poll_interval: Duration,

    /// Where screenshots are written
    pub capture_dir: PathBuf,

    /// Identifies this run in file names and reports
    pub run_id: String,
}

impl RunnerConfig {
    /// File the synchronization loop captures into
    pub fn capture_path(&self) -> PathBuf {
        self.capture_dir.join(format!("{}_check.png", self.run_id))
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            capture_dir: std::env::temp_dir(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
