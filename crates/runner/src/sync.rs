//! Visual synchronization
//!
//! Polls the machine's display until one of a stage's paths matches or the
//! stage's timeout runs out.

use image::RgbImage;
use ostester_common::{Stage, Subpath};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{RunError, RunResult};
use crate::machine::Machine;
use crate::telemetry::{ComparisonSample, TelemetrySink};
use crate::visual;

/// Interval between unmatched polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The path that matched and how it scored
#[derive(Debug, Clone)]
pub struct SyncOutcome<'s> {
    pub path: &'s Subpath,
    pub index: usize,
    pub polls: u32,
    pub mse: f64,
    pub ssim: f64,
}

struct Hit {
    index: usize,
    mse: f64,
    ssim: f64,
}

pub struct VisualSync<'a, M: ?Sized> {
    machine: &'a M,
    telemetry: &'a mut dyn TelemetrySink,
    capture_path: &'a Path,
    poll_interval: Duration,
}

impl<'a, M: Machine + ?Sized> VisualSync<'a, M> {
    pub fn new(
        machine: &'a M,
        telemetry: &'a mut dyn TelemetrySink,
        capture_path: &'a Path,
        poll_interval: Duration,
    ) -> Self {
        Self {
            machine,
            telemetry,
            capture_path,
            poll_interval,
        }
    }

    /// Block until a path of `stage` matches. Reference images are checked
    /// and decoded before the first capture.
    pub async fn await_stage<'s>(&mut self, stage: &'s Stage) -> RunResult<SyncOutcome<'s>> {
        let references = load_references(stage)?;
        let timeout = stage.timeout();
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            if let Some(hit) = self.poll_once(stage, &references, polls).await {
                info!("Stage '{}' matched path {}", stage.name, hit.index);
                return Ok(SyncOutcome {
                    path: &stage.paths[hit.index],
                    index: hit.index,
                    polls,
                    mse: hit.mse,
                    ssim: hit.ssim,
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(RunError::Timeout {
                    stage: stage.name.clone(),
                    timeout,
                    polls,
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Capture once and walk the paths in order. The first path whose
    /// thresholds hold wins; later ones are not scored.
    async fn poll_once(
        &mut self,
        stage: &Stage,
        references: &[RgbImage],
        poll: u32,
    ) -> Option<Hit> {
        if let Err(e) = self.machine.take_screenshot(self.capture_path).await {
            warn!("Screenshot failed for stage '{}': {}", stage.name, e);
            return None;
        }
        let capture = match visual::load_rgb(self.capture_path) {
            Ok(capture) => capture,
            Err(e) => {
                warn!(
                    "Cannot read screenshot {}: {}",
                    self.capture_path.display(),
                    e
                );
                return None;
            }
        };
        debug!("Screenshot taken ({}x{})", capture.width(), capture.height());

        for (index, (path, reference)) in stage.paths.iter().zip(references).enumerate() {
            let score = visual::compare(&capture, reference);
            let matched = path.accepts(score.mse, score.ssim);
            info!(
                "Stage '{}' path {}: MSE {:.4}, SSIM {:.4}, match: {}",
                stage.name, index, score.mse, score.ssim, matched
            );

            self.telemetry.record(&ComparisonSample {
                stage: &stage.name,
                path_index: index,
                poll,
                reference,
                capture: &capture,
                diff: &score.diff,
                mse: score.mse,
                ssim: score.ssim,
                matched,
            });

            if matched {
                return Some(Hit {
                    index,
                    mse: score.mse,
                    ssim: score.ssim,
                });
            }
        }
        None
    }
}

/// Check and decode every reference image of `stage`, in path order
pub fn load_references(stage: &Stage) -> RunResult<Vec<RgbImage>> {
    stage
        .paths
        .iter()
        .map(|path| {
            let file = path.check_file();
            if !file.exists() {
                return Err(RunError::ReferenceMissing {
                    stage: stage.name.clone(),
                    path: file.to_path_buf(),
                });
            }
            if !file.is_file() {
                return Err(RunError::ReferenceNotFile {
                    stage: stage.name.clone(),
                    path: file.to_path_buf(),
                });
            }
            visual::load_rgb(file).map_err(|source| RunError::ReferenceUnreadable {
                stage: stage.name.clone(),
                path: file.to_path_buf(),
                source,
            })
        })
        .collect()
}
