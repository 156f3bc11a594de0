//! Fixed pool of long-lived workers shared by every job.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use chronos_core::{Outcome, Record};

use super::invoker::TaskInvoker;
use super::queue::SharedReceiver;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// How long a worker waits on an empty queue before re-checking for shutdown
    pub poll_interval: Duration,
    /// Thread name prefix (`<name>-<n>`)
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(250),
            name: "chronos-worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        PoolStats {
            records_processed: succeeded + failed,
            records_succeeded: succeeded,
            records_failed: failed,
        }
    }
}

/// Handle to control the running workers.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPoolHandle {
    pub fn workers(&self) -> usize {
        self.joins.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Signal every worker and wait for them to stop.
    ///
    /// A worker finishes the record it is delivering; records still queued
    /// are left undelivered.
    pub fn shutdown(self) -> PoolStats {
        let Self {
            shutdown,
            joins,
            counters,
        } = self;

        for tx in &shutdown {
            let _ = tx.send(());
        }
        for join in joins {
            let _ = join.join();
        }

        counters.snapshot()
    }
}

/// Spawns the shared workers.
#[derive(Debug)]
pub struct WorkerPool;

impl WorkerPool {
    /// Start `config.workers` threads pulling from `records` and pushing onto `outcomes`.
    pub fn spawn(
        config: &PoolConfig,
        records: SharedReceiver<Record>,
        outcomes: SyncSender<Outcome>,
        invoker: Arc<dyn TaskInvoker>,
    ) -> io::Result<WorkerPoolHandle> {
        info!(workers = config.workers, "starting shared worker pool");

        let counters = Arc::new(Counters::default());
        let mut handle = WorkerPoolHandle {
            shutdown: Vec::with_capacity(config.workers),
            joins: Vec::with_capacity(config.workers),
            counters: Arc::clone(&counters),
        };

        for id in 1..=config.workers {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let worker = Worker {
                id,
                records: records.clone(),
                outcomes: outcomes.clone(),
                invoker: Arc::clone(&invoker),
                counters: Arc::clone(&counters),
                poll_interval: config.poll_interval,
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{id}", config.name))
                .spawn(move || worker.run(shutdown_rx));

            match spawned {
                Ok(join) => {
                    handle.shutdown.push(shutdown_tx);
                    handle.joins.push(join);
                }
                Err(e) => {
                    handle.shutdown();
                    return Err(e);
                }
            }
        }

        Ok(handle)
    }
}

struct Worker {
    id: usize,
    records: SharedReceiver<Record>,
    outcomes: SyncSender<Outcome>,
    invoker: Arc<dyn TaskInvoker>,
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl Worker {
    fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        debug!(worker = self.id, "worker started");

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let record = match self.records.recv_timeout(self.poll_interval) {
                Ok(record) => record,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let outcome = process_record(self.invoker.as_ref(), &record);
            let counter = if outcome.is_success() {
                &self.counters.succeeded
            } else {
                &self.counters.failed
            };
            counter.fetch_add(1, Ordering::Relaxed);

            if self.outcomes.send(outcome).is_err() {
                warn!(worker = self.id, "outcome queue closed; worker exiting");
                break;
            }
        }

        debug!(worker = self.id, "worker stopped");
    }
}

/// Deliver one record and turn the result into an outcome.
pub fn process_record(invoker: &dyn TaskInvoker, record: &Record) -> Outcome {
    match invoker.invoke(&record.payload, &record.config) {
        Ok(invocation) => {
            Outcome::success(record.job_id.clone(), record.row_id, invocation.body)
        }
        Err(e) => {
            warn!(
                job_id = %record.job_id,
                row_id = record.row_id,
                status = e.status_code(),
                error = %e,
                "record delivery failed"
            );
            Outcome::failed(record.job_id.clone(), record.row_id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::invoker::{Invocation, InvokeError};
    use crate::pipeline::queue::shared_bounded;
    use chronos_core::{ConfigurationHeader, JobConfiguration, JobId};

    /// Echoes the payload back; payloads starting with "fail" are refused.
    struct EchoInvoker;

    impl TaskInvoker for EchoInvoker {
        fn invoke(&self, payload: &str, _config: &JobConfiguration) -> Result<Invocation, InvokeError> {
            if payload.starts_with("fail") {
                return Err(InvokeError::Request("connection refused".to_string()));
            }
            Ok(Invocation {
                status: 200,
                body: format!("echo:{payload}"),
            })
        }
    }

    fn config() -> Arc<JobConfiguration> {
        Arc::new(JobConfiguration::new(
            "job-pool".parse().unwrap(),
            ConfigurationHeader {
                protocol: "http".to_string(),
                host: "localhost".to_string(),
                port: "8080".to_string(),
                path: "/".to_string(),
                metadata: vec![],
            },
        ))
    }

    fn record(row_id: u64, payload: &str) -> Record {
        let config = config();
        Record {
            job_id: config.job_id.clone(),
            row_id,
            payload: payload.to_string(),
            config,
        }
    }

    #[test]
    fn success_and_failure_outcomes() {
        let ok = process_record(&EchoInvoker, &record(1, "hi"));
        assert_eq!(ok, Outcome::success("job-pool".parse::<JobId>().unwrap(), 1, "echo:hi"));

        let failed = process_record(&EchoInvoker, &record(2, "fail"));
        assert_eq!(failed.error.as_deref(), Some("error sending POST request: connection refused"));
        assert!(failed.response.is_none());
    }

    #[test]
    fn pool_processes_every_record_and_shuts_down() {
        let (records_tx, records_rx) = shared_bounded(2);
        let (outcomes_tx, outcomes_rx) = mpsc::sync_channel(2);
        let config = PoolConfig::default()
            .with_workers(3)
            .with_poll_interval(Duration::from_millis(10));
        let pool = WorkerPool::spawn(&config, records_rx, outcomes_tx, Arc::new(EchoInvoker)).unwrap();
        assert_eq!(pool.workers(), 3);

        let producer = thread::spawn(move || {
            for row in 0..20 {
                let payload = if row % 5 == 0 { "fail" } else { "ok" };
                records_tx.send(record(row, payload)).unwrap();
            }
        });

        let mut rows: Vec<u64> = outcomes_rx.iter().take(20).map(|o| o.row_id).collect();
        producer.join().unwrap();
        rows.sort();
        assert_eq!(rows, (0..20).collect::<Vec<_>>());

        let stats = pool.shutdown();
        assert_eq!(
            stats,
            PoolStats {
                records_processed: 20,
                records_succeeded: 16,
                records_failed: 4,
            }
        );
    }

    #[test]
    fn workers_exit_when_the_work_queue_closes() {
        let (records_tx, records_rx) = shared_bounded::<Record>(1);
        let (outcomes_tx, outcomes_rx) = mpsc::sync_channel(1);
        let config = PoolConfig::default().with_workers(2);
        let pool = WorkerPool::spawn(&config, records_rx, outcomes_tx, Arc::new(EchoInvoker)).unwrap();

        drop(records_tx);
        pool.shutdown();
        // every outcome sender is gone with the workers
        assert!(outcomes_rx.recv().is_err());
    }
}
