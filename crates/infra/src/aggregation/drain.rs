//! The single writer draining the outcome queue.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use chronos_core::Outcome;

use super::AggregationStore;
use crate::cache::CacheBackend;

/// Handle to the drain thread.
///
/// The drain stops once every sender of the outcome queue has been dropped.
#[derive(Debug)]
pub struct DrainHandle {
    join: Option<thread::JoinHandle<u64>>,
}

impl DrainHandle {
    /// Wait for the drain to finish; returns the number of outcomes written.
    pub fn join(mut self) -> u64 {
        self.join
            .take()
            .and_then(|j| j.join().ok())
            .unwrap_or_default()
    }
}

impl<B: CacheBackend + 'static> AggregationStore<B> {
    /// Spawn the one thread allowed to mutate cache entries and statistics.
    pub fn spawn_drain(self: &Arc<Self>, outcomes: Receiver<Outcome>) -> io::Result<DrainHandle> {
        let store = Arc::clone(self);
        let join = thread::Builder::new()
            .name("chronos-aggregator".to_string())
            .spawn(move || store.listen(outcomes))?;

        Ok(DrainHandle { join: Some(join) })
    }

    /// Write outcomes sequentially until the queue closes, each stamped with
    /// the instant it is taken off the queue.
    fn listen(&self, outcomes: Receiver<Outcome>) -> u64 {
        self.drain(outcomes.into_iter().map(|outcome| (outcome, Utc::now())))
    }

    /// The drain loop over already-stamped outcomes.
    ///
    /// A failed write drops that outcome (the job's count then under-reports)
    /// and the loop carries on.
    pub(crate) fn drain<I>(&self, stamped: I) -> u64
    where
        I: IntoIterator<Item = (Outcome, DateTime<Utc>)>,
    {
        info!("aggregation drain started");
        let mut written = 0u64;

        for (outcome, at) in stamped {
            match self.write_at(&outcome, at) {
                Ok(()) => {
                    written += 1;
                    debug!(job_id = %outcome.job_id, row_id = outcome.row_id, "outcome written");
                }
                Err(e) => error!(
                    job_id = %outcome.job_id,
                    row_id = outcome.row_id,
                    error = %e,
                    "failed to write outcome; dropping it"
                ),
            }
        }

        info!(written, "aggregation drain stopped");
        written
    }
}
