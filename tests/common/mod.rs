#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from cutout for tests
pub use cutout::{
    BatchDispatcher, BatchSummary, Config, JobReport, Orchestrator, ProcessingStats,
    ShutdownSignal,
};
