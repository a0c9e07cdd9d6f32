//! Work distribution and telemetry

pub mod queue;
pub mod telemetry;
pub mod worker_pool;

pub use queue::RequestQueue;
pub use telemetry::{JsonLinesSink, RequestIdGenerator, TelemetrySink};
pub use worker_pool::{PoolSummary, WorkerPool};
