//! Bounded queue of pending cancellation requests.

use benchtop_core::ExperimentId;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Bounded FIFO of experiment ids awaiting cancellation.
///
/// `push` waits while the queue is full. `drain` takes only what was queued
/// when it was called.
#[derive(Debug)]
pub struct CancellationQueue {
    tx: mpsc::Sender<ExperimentId>,
    rx: Mutex<mpsc::Receiver<ExperimentId>>,
}

impl CancellationQueue {
    /// Create a queue holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue an id, waiting for space if the queue is full.
    pub async fn push(&self, id: ExperimentId) {
        if let Err(e) = self.tx.send(id).await {
            warn!("Cancellation queue closed, dropping request for '{}'", e.0);
        }
    }

    /// Take every id queued at the time of the call without waiting.
    pub async fn drain(&self) -> Vec<ExperimentId> {
        let mut rx = self.rx.lock().await;
        let pending = rx.len();
        let mut ids = Vec::with_capacity(pending);
        for _ in 0..pending {
            match rx.try_recv() {
                Ok(id) => ids.push(id),
                Err(_) => break,
            }
        }
        ids
    }

    /// Number of queued ids.
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
