pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod watcher;

pub use backends::{BackendOptions, BackendRegistry, TransformBackend};
pub use config::Config;
pub use core::{ProcessingStats, ShutdownSignal, StatsSnapshot};
pub use error::{FileError, PipelineError, WatchError};
pub use models::{BatchSummary, JobReport, ProcessingJob, ProcessingParameters};
pub use orchestrator::Orchestrator;
pub use pipeline::{BatchDispatcher, ProgressFn};
pub use watcher::{Debouncer, FolderWatcher, WatchOptions, WatcherState};
