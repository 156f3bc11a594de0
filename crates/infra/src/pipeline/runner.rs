//! Job dispatcher: owns the queues, the worker pool and the drain.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::{info, instrument};

use chronos_core::{JobId, Record};

use super::invoker::TaskInvoker;
use super::pool::{PoolConfig, PoolStats, WorkerPool, WorkerPoolHandle};
use super::queue::shared_bounded;
use super::source::{DispatchError, publish, read_configuration};
use crate::aggregation::{AggregationStore, DrainHandle};
use crate::cache::CacheBackend;

/// Sizing of the shared pipeline.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of shared workers
    pub workers: usize,
    /// Capacity of both the work queue and the outcome queue
    pub queue_capacity: usize,
    /// Worker poll tick while the work queue is empty
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl RunnerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Final counters returned by [`Runner::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunnerReport {
    pub pool: PoolStats,
    pub outcomes_written: u64,
}

/// The process-wide pipeline. Created once at startup and shared via `Arc`.
///
/// ```text
/// dispatch ─▶ publisher ─▶ [work queue] ─▶ workers ─▶ [outcome queue] ─▶ drain ─▶ store
/// ```
#[derive(Debug)]
pub struct Runner<B> {
    store: Arc<AggregationStore<B>>,
    records: SyncSender<Record>,
    pool: WorkerPoolHandle,
    drain: DrainHandle,
}

impl<B: CacheBackend + 'static> Runner<B> {
    /// Create both queues, then start the drain and the worker pool.
    pub fn start(
        config: &RunnerConfig,
        store: Arc<AggregationStore<B>>,
        invoker: Arc<dyn TaskInvoker>,
    ) -> io::Result<Self> {
        let (records_tx, records_rx) = shared_bounded::<Record>(config.queue_capacity);
        let (outcomes_tx, outcomes_rx) = mpsc::sync_channel(config.queue_capacity);

        let drain = store.spawn_drain(outcomes_rx)?;

        let pool_config = PoolConfig::default()
            .with_workers(config.workers)
            .with_poll_interval(config.poll_interval);
        // On failure the outcome sender is dropped here, which stops the drain.
        let pool = WorkerPool::spawn(&pool_config, records_rx, outcomes_tx, invoker)?;

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "runner started"
        );

        Ok(Self {
            store,
            records: records_tx,
            pool,
            drain,
        })
    }

    /// Start a job from `feed`.
    ///
    /// The header is read and validated before returning, so a fatal feed
    /// error reaches the caller and nothing is queued. Records are then
    /// published on a dedicated thread; this call does not wait for them.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub fn dispatch<R>(&self, job_id: JobId, feed: R) -> Result<(), DispatchError>
    where
        R: Read + Send + 'static,
    {
        let mut reader = BufReader::new(feed);
        let config = Arc::new(read_configuration(job_id, &mut reader)?);
        let records = self.records.clone();

        thread::Builder::new()
            .name("chronos-publisher".to_string())
            .spawn(move || {
                let summary = publish(&config, reader, &records);
                info!(
                    job_id = %config.job_id,
                    published = summary.published,
                    skipped = summary.skipped,
                    "feed published"
                );
            })?;

        info!("job dispatched");
        Ok(())
    }

    /// Open the feed at `path` and dispatch it.
    pub fn dispatch_path(&self, job_id: JobId, path: impl AsRef<Path>) -> Result<(), DispatchError> {
        let file = File::open(path)?;
        self.dispatch(job_id, file)
    }

    pub fn store(&self) -> &Arc<AggregationStore<B>> {
        &self.store
    }

    /// Close the work queue, stop the workers, then wait for the drain to
    /// write whatever is left on the outcome queue.
    pub fn shutdown(self) -> RunnerReport {
        let Self {
            records,
            pool,
            drain,
            ..
        } = self;

        drop(records);
        let pool = pool.shutdown();
        let outcomes_written = drain.join();

        info!(
            processed = pool.records_processed,
            outcomes_written, "runner stopped"
        );

        RunnerReport {
            pool,
            outcomes_written,
        }
    }
}
