use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::ImageFormat;
use tracing::{debug, error, info, warn};

use crate::backends::TransformBackend;
use crate::core::{ProcessingStats, ShutdownSignal, is_stable, naming};
use crate::error::{FileError, PipelineError};
use crate::models::{BatchSummary, JobReport, ProcessingJob, ProcessingParameters};

/// Progress callback, invoked once per attempted file on the worker that finished it
pub type ProgressFn = dyn Fn(&JobReport) + Send + Sync;

/// Outcome of one dispatched job
#[derive(Debug)]
enum JobOutcome {
    Succeeded(Duration),
    Failed(FileError),
}

/// Releases the backend when the batch ends, however it ends
struct BackendGuard<'a> {
    backend: &'a mut dyn TransformBackend,
}

impl Drop for BackendGuard<'_> {
    fn drop(&mut self) {
        self.backend.release();
        debug!("Backend {} released", self.backend.name());
    }
}

/// Runs a bounded set of files through one backend.
///
/// Files are partitioned into eligible and skipped before any work starts.
/// With `concurrency == 1` eligible files are processed in input order;
/// otherwise a fixed pool of workers pulls them from a shared queue. A
/// failing file is recorded and never aborts the rest of the batch.
pub struct BatchDispatcher {
    params: ProcessingParameters,
    stats: Arc<ProcessingStats>,
    shutdown: ShutdownSignal,
}

impl BatchDispatcher {
    pub fn new(
        params: ProcessingParameters,
        stats: Arc<ProcessingStats>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            params,
            stats,
            shutdown,
        }
    }

    /// Process `paths` with `backend`.
    ///
    /// The backend is initialized once before the first file and released
    /// exactly once when the batch ends. Only batch-level problems (backend
    /// initialization) are returned as errors.
    pub fn run_batch(
        &self,
        backend: &mut dyn TransformBackend,
        paths: &[PathBuf],
        on_progress: Option<&ProgressFn>,
    ) -> Result<BatchSummary, PipelineError> {
        if paths.is_empty() {
            return Ok(BatchSummary::default());
        }

        backend.initialize().map_err(|e| PipelineError::Init {
            backend: backend.name().to_string(),
            reason: format!("{:#}", e),
        })?;
        let guard = BackendGuard { backend };
        let backend: &dyn TransformBackend = &*guard.backend;

        let (eligible, skipped) = self.partition(paths);
        info!(
            "Batch of {} files: {} eligible, {} skipped",
            paths.len(),
            eligible.len(),
            skipped
        );

        let eligible_count = eligible.len();
        let outcomes = if self.params.concurrency <= 1 {
            self.run_sequential(backend, eligible, on_progress)
        } else {
            self.run_parallel(backend, eligible, on_progress)
        };

        let mut summary = BatchSummary {
            skipped,
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome {
                JobOutcome::Succeeded(elapsed) => {
                    summary.succeeded += 1;
                    summary.total_time += elapsed.as_secs_f64();
                }
                JobOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary.cancelled = eligible_count - outcomes.len();
        if summary.succeeded > 0 {
            summary.avg_time = summary.total_time / summary.succeeded as f64;
        }

        drop(guard);
        Ok(summary)
    }

    /// Split into eligible jobs and a skip count
    fn partition(&self, paths: &[PathBuf]) -> (Vec<ProcessingJob>, usize) {
        let mut eligible = Vec::with_capacity(paths.len());
        let mut skipped = 0;

        for path in paths {
            match naming::check(path, &self.params) {
                Ok(()) => eligible.push(ProcessingJob::new(path)),
                Err(reason) => {
                    debug!("Skipping {}: {}", path.display(), reason);
                    skipped += 1;
                }
            }
        }

        (eligible, skipped)
    }

    fn run_sequential(
        &self,
        backend: &dyn TransformBackend,
        jobs: Vec<ProcessingJob>,
        on_progress: Option<&ProgressFn>,
    ) -> Vec<JobOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested, stopping batch");
                break;
            }
            outcomes.push(self.process_job(backend, &job, on_progress));
        }
        outcomes
    }

    /// Fixed-size worker pool fed through a channel.
    ///
    /// Workers stop taking new jobs once shutdown is requested; jobs already
    /// running finish and their results are kept.
    fn run_parallel(
        &self,
        backend: &dyn TransformBackend,
        jobs: Vec<ProcessingJob>,
        on_progress: Option<&ProgressFn>,
    ) -> Vec<JobOutcome> {
        let workers = self.params.concurrency.min(jobs.len()).max(1);

        let (job_tx, job_rx): (Sender<ProcessingJob>, Receiver<ProcessingJob>) = mpsc::channel();
        for job in jobs {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel();

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    loop {
                        if self.shutdown.is_triggered() {
                            debug!("Worker {} stopping on shutdown", worker);
                            break;
                        }
                        let next = {
                            let rx = job_rx.lock().unwrap_or_else(|p| p.into_inner());
                            rx.recv()
                        };
                        let Ok(job) = next else { break };

                        let outcome = self.process_job(backend, &job, on_progress);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.into_iter().collect()
    }

    /// Run one job end to end and record its outcome.
    fn process_job(
        &self,
        backend: &dyn TransformBackend,
        job: &ProcessingJob,
        on_progress: Option<&ProgressFn>,
    ) -> JobOutcome {
        let path = job.path.as_path();
        let mut original_size = 0;
        debug!(job = %job.id, "Dequeued after {:.2}s", job.age().as_secs_f64());

        // A panicking backend fails this file only; the worker keeps going.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.attempt(backend, path, &mut original_size)
        }))
        .unwrap_or_else(|payload| {
            Err(FileError::Backend(format!(
                "backend panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        match result {
            Ok((output, elapsed)) => {
                self.stats.record_success(elapsed, original_size);
                info!(
                    job = %job.id,
                    "Completed: {} -> {} ({:.2}s)",
                    path.display(),
                    output.display(),
                    elapsed.as_secs_f64()
                );
                if let Some(report) = on_progress {
                    report(&JobReport::success(path, output, elapsed));
                }
                JobOutcome::Succeeded(elapsed)
            }
            Err(err) => {
                match err {
                    FileError::Unstable | FileError::VanishedBeforeProcessing => {
                        warn!(job = %job.id, "Not processing {}: {}", path.display(), err)
                    }
                    _ => error!(job = %job.id, "Error processing {}: {}", path.display(), err),
                }
                self.stats.record_failure(original_size);
                if let Some(report) = on_progress {
                    report(&JobReport::failure(path));
                }
                JobOutcome::Failed(err)
            }
        }
    }

    fn attempt(
        &self,
        backend: &dyn TransformBackend,
        path: &Path,
        original_size: &mut u64,
    ) -> Result<(PathBuf, Duration), FileError> {
        let metadata = fs::metadata(path).map_err(|_| FileError::VanishedBeforeProcessing)?;
        *original_size = metadata.len();

        info!("Processing: {}", path.display());
        let start = Instant::now();

        if !is_stable(path, self.params.stability_timeout) {
            return Err(if path.exists() {
                FileError::Unstable
            } else {
                FileError::VanishedBeforeProcessing
            });
        }

        let image = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(ref err) if err.kind() == io::ErrorKind::NotFound => {
                FileError::VanishedBeforeProcessing
            }
            other => FileError::Decode(other.to_string()),
        })?;

        let result = backend
            .transform(&image)
            .map_err(|e| FileError::Backend(format!("{:#}", e)))?;

        let elapsed = start.elapsed();
        let output = naming::output_path(path, &self.params, Some(elapsed));

        result
            .save_with_format(&output, ImageFormat::Png)
            .map_err(|e| FileError::Write {
                path: output.clone(),
                reason: e.to_string(),
            })?;

        if self.params.preserve_original && path.exists() {
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            let destination = self.params.processed_dir.join(file_name);
            move_file(path, &destination).map_err(|source| FileError::Move {
                path: destination.clone(),
                source,
            })?;
            debug!("Moved original to: {}", destination.display());
        }

        Ok((output, elapsed))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Rename, falling back to copy + remove across filesystems.
/// A source that disappears in the meantime is not an error.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            match fs::remove_file(from) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_missing_source_is_not_an_error() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let from = dir.path().join("gone.png");
        let to = dir.path().join("processed.png");

        move_file(&from, &to)?;
        assert!(!to.exists());

        Ok(())
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(literal.as_ref()), "boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
