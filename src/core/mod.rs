pub mod naming;
pub mod stability;
pub mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use naming::{OutputName, backend_label, is_supported, output_path, parse_output_name, should_process};
pub use stability::is_stable;
pub use stats::{ProcessingStats, StatsSnapshot};

/// Cooperative cancellation flag shared between the orchestrator, the
/// dispatcher workers and whoever requests shutdown (e.g. a Ctrl+C handler).
///
/// Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
