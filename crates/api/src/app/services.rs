//! Pipeline wiring: cache backend, aggregation store, invoker and runner.

use std::fs::File;
use std::sync::Arc;

use chronos_core::{JobId, JobStats};
use chronos_infra::aggregation::AggregationStore;
use chronos_infra::cache::{InMemoryBackend, StoreError};
use chronos_infra::config::ChronosConfig;
use chronos_infra::pipeline::{DispatchError, HttpInvoker, Runner, RunnerReport, TaskInvoker};

#[cfg(feature = "redis")]
use chronos_infra::cache::RedisBackend;

/// The running pipeline, over whichever cache backend was configured.
///
/// Every method blocks; call them from `spawn_blocking`.
#[derive(Debug)]
pub enum AppServices {
    InMemory { runner: Runner<InMemoryBackend> },
    #[cfg(feature = "redis")]
    Persistent { runner: Runner<RedisBackend> },
}

impl AppServices {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::InMemory { .. } => "in-memory",
            #[cfg(feature = "redis")]
            Self::Persistent { .. } => "redis",
        }
    }

    /// Validate the feed header and start publishing its records.
    pub fn dispatch(&self, job_id: JobId, feed: File) -> Result<(), DispatchError> {
        match self {
            Self::InMemory { runner } => runner.dispatch(job_id, feed),
            #[cfg(feature = "redis")]
            Self::Persistent { runner } => runner.dispatch(job_id, feed),
        }
    }

    pub fn stats(&self, job_id: &JobId) -> Result<JobStats, StoreError> {
        match self {
            Self::InMemory { runner } => runner.store().read_stats(job_id),
            #[cfg(feature = "redis")]
            Self::Persistent { runner } => runner.store().read_stats(job_id),
        }
    }

    pub fn shutdown(self) -> RunnerReport {
        match self {
            Self::InMemory { runner } => runner.shutdown(),
            #[cfg(feature = "redis")]
            Self::Persistent { runner } => runner.shutdown(),
        }
    }
}

/// Build the pipeline described by `config`.
///
/// Connects to Redis (and fails fast if it is unreachable) when persistent
/// stores are requested.
pub fn build_services(config: &ChronosConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config);
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    build_in_memory_services(config)
}

/// In-memory wiring (dev/test): nothing survives the process.
pub fn build_in_memory_services(config: &ChronosConfig) -> anyhow::Result<AppServices> {
    let store = Arc::new(AggregationStore::with_ttl(
        InMemoryBackend::new(),
        config.cache_ttl,
    ));
    let runner = Runner::start(&config.runner_config(), store, invoker())?;
    Ok(AppServices::InMemory { runner })
}

#[cfg(feature = "redis")]
fn build_persistent_services(config: &ChronosConfig) -> anyhow::Result<AppServices> {
    let backend = RedisBackend::connect(&config.redis_url)?;
    tracing::info!(redis_url = %config.redis_url, "connected to redis");

    let store = Arc::new(AggregationStore::with_ttl(backend, config.cache_ttl));
    let runner = Runner::start(&config.runner_config(), store, invoker())?;
    Ok(AppServices::Persistent { runner })
}

fn invoker() -> Arc<dyn TaskInvoker> {
    Arc::new(HttpInvoker::new())
}
