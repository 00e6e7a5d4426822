//! Comparison telemetry
//!
//! The synchronization loop reports every comparison it makes to a
//! [`TelemetrySink`]. Sinks observe only; nothing they do feeds back into
//! matching.

use chrono::Utc;
use image::RgbImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One capture scored against one candidate
#[derive(Debug, Clone, Copy)]
pub struct ComparisonSample<'a> {
    pub stage: &'a str,
    pub path_index: usize,
    pub poll: u32,
    pub reference: &'a RgbImage,
    pub capture: &'a RgbImage,
    pub diff: &'a RgbImage,
    pub mse: f64,
    pub ssim: f64,
    pub matched: bool,
}

pub trait TelemetrySink: Send {
    fn record(&mut self, sample: &ComparisonSample<'_>);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record(&mut self, _sample: &ComparisonSample<'_>) {}
}

#[derive(Debug, Serialize)]
struct SampleLine<'a> {
    timestamp: String,
    seq: u64,
    stage: &'a str,
    path_index: usize,
    poll: u32,
    mse: f64,
    ssim: f64,
    matched: bool,
    capture_sha256: String,
    diff_image: String,
}

/// Writes each difference image as PNG plus one JSON line per comparison
/// to `samples.jsonl` in a debug directory
pub struct DiffDumpSink {
    dir: PathBuf,
    log: File,
    seq: u64,
}

#[derive(Debug, thiserror::Error)]
enum SinkError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DiffDumpSink {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("samples.jsonl"))?;
        debug!("Writing comparison telemetry to {}", dir.display());
        Ok(Self {
            dir,
            log,
            seq: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_sample(&mut self, sample: &ComparisonSample<'_>) -> Result<(), SinkError> {
        let file_name = format!(
            "{:06}-{}-{}-diff.png",
            self.seq,
            sanitize(sample.stage),
            sample.path_index
        );
        sample.diff.save(self.dir.join(&file_name))?;

        let line = SampleLine {
            timestamp: Utc::now().to_rfc3339(),
            seq: self.seq,
            stage: sample.stage,
            path_index: sample.path_index,
            poll: sample.poll,
            mse: sample.mse,
            ssim: sample.ssim,
            matched: sample.matched,
            capture_sha256: hash_pixels(sample.capture),
            diff_image: file_name,
        };
        serde_json::to_writer(&mut self.log, &line)?;
        self.log.write_all(b"\n")?;
        Ok(())
    }
}

impl TelemetrySink for DiffDumpSink {
    fn record(&mut self, sample: &ComparisonSample<'_>) {
        if let Err(e) = self.write_sample(sample) {
            warn!("Failed to write telemetry sample {}: {}", self.seq, e);
        }
        self.seq += 1;
    }
}

fn hash_pixels(img: &RgbImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(img.width().to_le_bytes());
    hasher.update(img.height().to_le_bytes());
    hasher.update(img.as_raw());
    hex::encode(hasher.finalize())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
