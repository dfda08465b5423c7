//! Parallel execution (C9): wave computation plus the executor that runs
//! waves concurrently.

pub mod executor;
pub mod wave;

pub use executor::{ExecutionMode, ExecutorConfig, ExecutorStats, GraphExecutor, NodeExecutionError};
pub use wave::{ExecutionWave, WaveScheduler, WaveSchedulerStats};
