//! Bounded FIFO queues between pipeline stages.
//!
//! Both queues are `sync_channel`s: a full queue blocks the producer, which is
//! the pipeline's only backpressure. The work queue has several consumers, so
//! its receiver is shared behind a mutex.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receiving half shared by every worker.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedReceiver<T> {
    /// Block for up to `timeout` waiting for the next item.
    ///
    /// A poisoned lock is reported as a disconnected queue.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let rx = self
            .inner
            .lock()
            .map_err(|_| RecvTimeoutError::Disconnected)?;
        rx.recv_timeout(timeout)
    }
}

/// Bounded queue with one shareable receiver.
pub fn shared_bounded<T>(capacity: usize) -> (SyncSender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (
        tx,
        SharedReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}
