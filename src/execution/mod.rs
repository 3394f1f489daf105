mod executor;
mod metrics;
mod state;

pub use executor::{ExecuteOptions, Executor, INPUT_ENV};
pub use metrics::{parse_metrics, ExecutionMetrics};
pub use state::{ExecutionState, ExecutionStateStore};
