//! Ingestion pipeline: feed → work queue → workers → outcome queue → drain.
//!
//! All jobs share one [`Runner`]: a bounded work queue, a fixed pool of
//! workers and a single aggregation drain. Each dispatched feed gets its own
//! short-lived publisher thread.

pub mod invoker;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod source;

pub use invoker::{HttpInvoker, Invocation, InvokeError, TaskInvoker};
pub use pool::{PoolConfig, PoolStats, WorkerPool, WorkerPoolHandle, process_record};
pub use queue::{SharedReceiver, shared_bounded};
pub use runner::{Runner, RunnerConfig, RunnerReport};
pub use source::{DispatchError, PublishSummary, publish, read_configuration};
