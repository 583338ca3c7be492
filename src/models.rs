use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// A discovered input file waiting for (or undergoing) processing
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub path: PathBuf,
    pub discovered_at: OffsetDateTime,
}

impl ProcessingJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    /// Time elapsed since the file was discovered
    pub fn age(&self) -> Duration {
        let age = OffsetDateTime::now_utc() - self.discovered_at;
        age.try_into().unwrap_or_default()
    }
}

/// Immutable snapshot of everything a batch needs to know about how files are processed.
///
/// Built by the orchestrator once per batch and shared read-only with the
/// dispatcher and the naming policy.
#[derive(Debug, Clone)]
pub struct ProcessingParameters {
    /// Registry id of the backend (e.g. "flood", "rembg")
    pub backend_id: String,
    /// Sub-variant of the backend; only rembg-family backends put it into file names
    pub variant: Option<String>,
    /// Quality label used in output names ("default" when unset)
    pub quality: String,
    /// Resolved device the backend runs on
    pub device: String,
    pub overwrite_existing: bool,
    pub preserve_original: bool,
    /// Worker pool size; 1 means strictly sequential processing
    pub concurrency: usize,
    /// Accepted extensions, compared case-insensitively
    pub extensions: Vec<String>,
    pub stability_timeout: Duration,
    pub output_dir: PathBuf,
    pub processed_dir: PathBuf,
}

/// Progress signal for one attempted (non-skipped) file
#[derive(Debug, Clone)]
pub struct JobReport {
    pub input: PathBuf,
    /// Written artifact, `None` on failure
    pub output: Option<PathBuf>,
    pub success: bool,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn success(input: &Path, output: PathBuf, elapsed: Duration) -> Self {
        Self {
            input: input.to_path_buf(),
            output: Some(output),
            success: true,
            elapsed,
        }
    }

    pub fn failure(input: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output: None,
            success: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Result of one `run_batch` call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Eligible files never dispatched because shutdown was requested
    pub cancelled: usize,
    /// Sum of successful job durations in this batch, in seconds
    pub total_time: f64,
    /// Mean successful job duration in this batch, in seconds
    pub avg_time: f64,
}

impl BatchSummary {
    /// Number of files that produced an output
    pub fn processed(&self) -> usize {
        self.succeeded
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}
