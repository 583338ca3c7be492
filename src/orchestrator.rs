use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error, info, warn};

use crate::backends::{BackendRegistry, TransformBackend};
use crate::config::Config;
use crate::core::{ProcessingStats, ShutdownSignal, StatsSnapshot, is_supported};
use crate::error::{PipelineError, WatchError};
use crate::models::{BatchSummary, ProcessingParameters};
use crate::pipeline::{BatchDispatcher, ProgressFn};
use crate::watcher::{FileCallback, FolderWatcher, WatchOptions};

/// Shared progress callback for the watch path, which outlives a single call
pub type SharedProgress = Arc<ProgressFn>;

type BackendSlot = Option<Box<dyn TransformBackend>>;

/// Ties configuration, backend lifecycle, batches and watching together.
///
/// Batches are serialized on the backend slot, so at most one backend
/// instance exists at any time. Cancellation goes through the
/// [`ShutdownSignal`] handed in by the caller.
pub struct Orchestrator {
    config: Config,
    registry: BackendRegistry,
    stats: Arc<ProcessingStats>,
    shutdown: ShutdownSignal,
    backend: Mutex<BackendSlot>,
    watcher: Mutex<Option<FolderWatcher>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Orchestrator {
    /// Validate the selected backend and create the working directories
    pub fn new(
        config: Config,
        registry: BackendRegistry,
        shutdown: ShutdownSignal,
    ) -> Result<Self, PipelineError> {
        let model = &config.processing.model;
        if !registry.contains(model) {
            return Err(PipelineError::Config(format!(
                "unknown model '{}', available: {}",
                model,
                registry.available().join(", ")
            )));
        }
        config.backend_options(model)?;

        let orchestrator = Self {
            config,
            registry,
            stats: Arc::new(ProcessingStats::new()),
            shutdown,
            backend: Mutex::new(None),
            watcher: Mutex::new(None),
        };
        orchestrator.setup_directories()?;

        Ok(orchestrator)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn stats(&self) -> Arc<ProcessingStats> {
        Arc::clone(&self.stats)
    }

    fn setup_directories(&self) -> Result<(), PipelineError> {
        let processing = &self.config.processing;
        let mut dirs = vec![&processing.input_folder, &processing.output_folder];
        if processing.preserve_original {
            dirs.push(&processing.processed_folder);
        }

        for dir in dirs {
            fs::create_dir_all(dir)?;
            debug!("Ensured directory exists: {}", dir.display());
        }
        Ok(())
    }

    fn create_backend(&self) -> Result<Box<dyn TransformBackend>, PipelineError> {
        let model = &self.config.processing.model;
        let options = self.config.backend_options(model)?;
        self.registry.create(model, &options)
    }

    /// Create and initialize the backend if it is not loaded yet
    pub fn initialize_backend(&self) -> Result<(), PipelineError> {
        let mut slot = lock(&self.backend);
        if slot.as_ref().is_some_and(|b| b.is_initialized()) {
            return Ok(());
        }

        let mut backend = match slot.take() {
            Some(backend) => backend,
            None => self.create_backend()?,
        };
        backend.initialize().map_err(|e| PipelineError::Init {
            backend: backend.name().to_string(),
            reason: format!("{:#}", e),
        })?;
        info!("Backend {} ready on {}", backend.name(), backend.device());
        *slot = Some(backend);
        Ok(())
    }

    /// Release and drop the loaded backend, if any
    pub fn release_backend(&self) {
        let mut slot = lock(&self.backend);
        if let Some(mut backend) = slot.take() {
            backend.release();
            info!("Backend {} released", backend.name());
        }
    }

    pub fn is_backend_initialized(&self) -> bool {
        lock(&self.backend)
            .as_ref()
            .is_some_and(|b| b.is_initialized())
    }

    /// Snapshot of the parameters a batch with `backend` runs under
    pub fn parameters(&self, backend: &dyn TransformBackend) -> ProcessingParameters {
        let processing = &self.config.processing;
        let model = &processing.model;

        let mut concurrency = processing.batch_size.max(1);
        if concurrency > 1 && !backend.is_reentrant() {
            warn!(
                "Backend {} does not support concurrent use, processing sequentially",
                backend.name()
            );
            concurrency = 1;
        }

        ProcessingParameters {
            backend_id: model.clone(),
            variant: self.config.backend(model).and_then(|b| b.model_name.clone()),
            quality: self.config.quality_of(model),
            device: backend.device().to_string(),
            overwrite_existing: processing.overwrite_existing,
            preserve_original: processing.preserve_original,
            concurrency,
            extensions: processing.file_extensions.clone(),
            stability_timeout: self.config.stability_timeout(),
            output_dir: processing.output_folder.clone(),
            processed_dir: processing.processed_folder.clone(),
        }
    }

    /// Supported files directly inside `folder`, sorted
    pub fn scan_folder(&self, folder: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        if !folder.is_dir() {
            return Err(PipelineError::InputNotFound(folder.to_path_buf()));
        }

        let extensions = &self.config.processing.file_extensions;
        let mut files = Vec::new();
        for entry in fs::read_dir(folder)? {
            let path = entry?.path();
            if path.is_file() && is_supported(&path, extensions) {
                files.push(path);
            }
        }
        files.sort();
        files.dedup();

        Ok(files)
    }

    /// Process every supported file in `folder` (the configured input folder by default)
    pub fn process_folder(
        &self,
        folder: Option<&Path>,
        on_progress: Option<&ProgressFn>,
    ) -> Result<BatchSummary, PipelineError> {
        let folder = folder.unwrap_or(self.config.processing.input_folder.as_path());
        let files = self.scan_folder(folder)?;

        if files.is_empty() {
            info!("No image files found in {}", folder.display());
            return Ok(BatchSummary::default());
        }
        info!("Found {} image files to process", files.len());

        self.process_files(&files, on_progress)
    }

    /// Run one batch over `paths`
    pub fn process_files(
        &self,
        paths: &[PathBuf],
        on_progress: Option<&ProgressFn>,
    ) -> Result<BatchSummary, PipelineError> {
        if paths.is_empty() {
            return Ok(BatchSummary::default());
        }

        let mut slot = lock(&self.backend);
        let mut backend = match slot.take() {
            Some(backend) => backend,
            None => self.create_backend()?,
        };

        let params = self.parameters(&*backend);
        let dispatcher =
            BatchDispatcher::new(params, Arc::clone(&self.stats), self.shutdown.clone());
        let result = dispatcher.run_batch(&mut *backend, paths, on_progress);
        // The dispatcher released the backend; the next batch builds a fresh one.
        drop(backend);
        drop(slot);

        let summary = result?;
        info!(
            "Batch completed: {} processed, {} failed, {} skipped",
            summary.processed(),
            summary.failed,
            summary.skipped
        );
        if summary.cancelled > 0 {
            warn!("{} files not processed due to shutdown", summary.cancelled);
        }
        Ok(summary)
    }

    /// Watch the input folder and process each new file as it settles.
    ///
    /// With `process_existing` the files already present are processed first.
    /// Does nothing if monitoring is disabled in the configuration.
    pub fn start_watching(
        self: &Arc<Self>,
        process_existing: bool,
        on_progress: Option<SharedProgress>,
    ) -> Result<(), PipelineError> {
        let monitoring = &self.config.monitoring;
        if !monitoring.enabled {
            info!("Monitoring is disabled in configuration");
            return Ok(());
        }
        if self.is_watching() {
            return Err(WatchError::AlreadyActive.into());
        }

        if process_existing {
            info!("Processing existing files...");
            let summary = self.process_folder(None, on_progress.as_deref())?;
            info!(
                "Initial processing completed: {} processed, {} failed",
                summary.processed(),
                summary.failed
            );
        }

        let mut guard = lock(&self.watcher);
        if guard.as_ref().is_some_and(FolderWatcher::is_watching) {
            return Err(WatchError::AlreadyActive.into());
        }
        if self.shutdown.is_triggered() {
            info!("Shutdown requested, not starting monitor");
            return Ok(());
        }

        let options = WatchOptions {
            recursive: monitoring.recursive,
            debounce: self.config.debounce(),
            extensions: self.config.processing.file_extensions.clone(),
        };
        let mut watcher = FolderWatcher::new(&self.config.processing.input_folder, options);

        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: FileCallback = Arc::new(move |path: PathBuf| {
            let Some(orchestrator) = weak.upgrade() else {
                return;
            };
            if orchestrator.shutdown.is_triggered() {
                return;
            }
            if let Err(e) = orchestrator.process_files(&[path.clone()], on_progress.as_deref()) {
                error!("Failed to process {}: {}", path.display(), e);
            }
        });

        watcher.start(callback)?;
        *guard = Some(watcher);
        Ok(())
    }

    /// Stop the folder watcher and wait for its threads to finish
    pub fn stop_watching(&self) {
        let watcher = lock(&self.watcher).take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watcher)
            .as_ref()
            .is_some_and(FolderWatcher::is_watching)
    }

    /// Request cooperative shutdown.
    ///
    /// Running jobs finish; pending ones are dropped. The backend is released
    /// here only if no batch holds it, otherwise the batch releases it.
    pub fn shutdown(&self) {
        info!("Shutting down...");
        self.shutdown.trigger();
        self.stop_watching();

        if let Ok(mut slot) = self.backend.try_lock() {
            if let Some(mut backend) = slot.take() {
                backend.release();
            }
        }
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}
