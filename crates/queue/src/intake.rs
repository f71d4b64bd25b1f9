//! Multi-producer arrival side of the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use actq_core::InstanceKey;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::activity::{Activity, Arrival, Completer, CompletionHandle};
use crate::error::{QueueError, Result};

/// Arrival queue plus the wake signal shared by producers, the catch-up
/// loader and running executions.
///
/// The wake signal coalesces: several notifications before the controller
/// waits again collapse into a single wake-up.
pub(crate) struct Intake {
    tx: mpsc::UnboundedSender<Arrival>,
    wake: Arc<Notify>,
    next_seq: AtomicU64,
}

impl Intake {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Arrival>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let intake = Self {
            tx,
            wake: Arc::new(Notify::new()),
            next_seq: AtomicU64::new(0),
        };
        (intake, rx)
    }

    /// Assign an instance key, enqueue and wake the controller.
    pub(crate) fn enqueue(&self, activity: Activity) -> Result<CompletionHandle> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let key = InstanceKey::new(activity.id(), seq);
        debug!(
            activity = %key,
            origin = %activity.origin(),
            catch_up = activity.is_catch_up(),
            "activity arrived"
        );

        let (completer, handle) = Completer::pair(key);
        self.tx
            .send(Arrival {
                key,
                activity,
                completer,
            })
            .map_err(|_| QueueError::Stopped)?;
        self.wake.notify_one();
        Ok(handle)
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn wake_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }
}
