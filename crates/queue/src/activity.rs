//! Activity instances as seen by the queue.
//!
//! An [`Activity`] is what producers submit. Once it is drained from the
//! arrival queue it travels as an [`Arrival`] (carrying its instance key and
//! completion sender) and, after admission, as a [`QueuedActivity`] owned by
//! the controller's graph.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actq_core::{
    ActivityBody, ActivityError, ActivityId, ActivityRecord, InstanceKey, Origin, Outcome,
};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::QueueError;

/// A unit of ordered work submitted to the queue.
pub struct Activity {
    record: ActivityRecord,
    body: Arc<dyn ActivityBody>,
    origin: Origin,
    catch_up: bool,
}

impl Activity {
    /// Create a locally originated activity.
    pub fn new(record: ActivityRecord, body: Arc<dyn ActivityBody>) -> Self {
        Self {
            record,
            body,
            origin: Origin::Local,
            catch_up: false,
        }
    }

    /// Mark the activity as delivered by the cluster message receiver.
    pub fn from_receiver(mut self) -> Self {
        self.origin = Origin::Receiver;
        self
    }

    /// Activity replayed from the store. `catch_up` activities bypass the ordering gate.
    pub fn from_store(record: ActivityRecord, body: Arc<dyn ActivityBody>, catch_up: bool) -> Self {
        Self {
            record,
            body,
            origin: Origin::Store,
            catch_up,
        }
    }

    /// Sequence number.
    pub fn id(&self) -> ActivityId {
        self.record.id
    }

    /// Persistable record.
    pub fn record(&self) -> &ActivityRecord {
        &self.record
    }

    /// Where the activity came from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether this is a startup/gap replay.
    pub fn is_catch_up(&self) -> bool {
        self.catch_up
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.record.id)
            .field("kind", &self.record.kind)
            .field("origin", &self.origin)
            .field("catch_up", &self.catch_up)
            .finish()
    }
}

/// How the fate of a submitted instance was decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This instance ran its body
    Executed(Outcome),
    /// A same-id instance was already in flight; this one was released when it finished
    Attached {
        /// The instance that actually executed
        primary: InstanceKey,
        /// Outcome of the primary instance
        outcome: Outcome,
    },
    /// The id had already been handled; released without running
    Ignored,
}

impl Resolution {
    /// Outcome of the execution this instance observed, if any.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Resolution::Executed(outcome) | Resolution::Attached { outcome, .. } => Some(outcome),
            Resolution::Ignored => None,
        }
    }

    /// Whether this instance ran its own body.
    pub fn is_executed(&self) -> bool {
        matches!(self, Resolution::Executed(_))
    }
}

/// Signaled value of a completion handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Instance the completion belongs to
    pub key: InstanceKey,
    /// What happened to it
    pub resolution: Resolution,
}

/// Awaitable returned by `submit`.
///
/// Resolves once the instance's fate is decided, or with
/// [`QueueError::Stopped`] if the controller stopped before deciding it.
#[derive(Debug)]
pub struct CompletionHandle {
    key: InstanceKey,
    rx: oneshot::Receiver<Completion>,
}

impl CompletionHandle {
    /// Instance key assigned at submission.
    pub fn key(&self) -> InstanceKey {
        self.key
    }
}

impl Future for CompletionHandle {
    type Output = Result<Completion, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| QueueError::Stopped))
    }
}

/// Sending half of a completion handle. Consumed by signaling, so an instance
/// can be released at most once.
#[derive(Debug)]
pub(crate) struct Completer {
    key: InstanceKey,
    tx: oneshot::Sender<Completion>,
}

impl Completer {
    pub(crate) fn pair(key: InstanceKey) -> (Completer, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        (Completer { key, tx }, CompletionHandle { key, rx })
    }

    pub(crate) fn signal(self, resolution: Resolution) {
        let key = self.key;
        if self.tx.send(Completion { key, resolution }).is_err() {
            trace!(activity = %key, "completion dropped, nobody is waiting");
        }
    }
}

/// An activity drained from the arrival queue, not yet admitted.
#[derive(Debug)]
pub(crate) struct Arrival {
    pub(crate) key: InstanceKey,
    pub(crate) activity: Activity,
    pub(crate) completer: Completer,
}

impl Arrival {
    pub(crate) fn id(&self) -> ActivityId {
        self.key.id()
    }

    /// Release without execution.
    pub(crate) fn ignore(self) {
        self.completer.signal(Resolution::Ignored);
    }
}

/// Execution state observed by the controller.
///
/// A spawned body that has not been polled yet counts as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExecutionStatus {
    NotStarted,
    Running,
    Finished(Outcome),
}

/// What an execution needs to report back to the controller.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub(crate) cancel: CancellationToken,
    pub(crate) finished: mpsc::UnboundedSender<(InstanceKey, Outcome)>,
    pub(crate) wake: Arc<Notify>,
}

/// An admitted activity instance: node of the dependency graph.
pub(crate) struct QueuedActivity {
    pub(crate) key: InstanceKey,
    pub(crate) record: ActivityRecord,
    pub(crate) body: Arc<dyn ActivityBody>,
    /// Instances this one waits for
    pub(crate) depends_on: BTreeSet<InstanceKey>,
    /// Instances waiting for this one
    pub(crate) dependents: BTreeSet<InstanceKey>,
    attachments: Vec<Arrival>,
    completer: Option<Completer>,
    status: ExecutionStatus,
}

impl QueuedActivity {
    pub(crate) fn new(arrival: Arrival) -> Self {
        let Arrival {
            key,
            activity,
            completer,
        } = arrival;
        Self {
            key,
            record: activity.record,
            body: activity.body,
            depends_on: BTreeSet::new(),
            dependents: BTreeSet::new(),
            attachments: Vec::new(),
            completer: Some(completer),
            status: ExecutionStatus::NotStarted,
        }
    }

    pub(crate) fn id(&self) -> ActivityId {
        self.key.id()
    }

    pub(crate) fn status(&self) -> &ExecutionStatus {
        &self.status
    }

    /// Record a same-id duplicate; it is only released when this instance finishes.
    pub(crate) fn attach(&mut self, duplicate: Arrival) {
        self.attachments.push(duplicate);
    }

    #[cfg(test)]
    pub(crate) fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Spawn the body. Failures and panics are captured into the outcome that
    /// is reported back through the context; nothing propagates to the caller.
    pub(crate) fn run_body(&mut self, ctx: &ExecutionContext) {
        if self.status != ExecutionStatus::NotStarted {
            return;
        }
        self.status = ExecutionStatus::Running;

        let key = self.key;
        let body = Arc::clone(&self.body);
        let record = self.record.clone();
        let cancel = ctx.cancel.child_token();
        let work = tokio::spawn(async move {
            debug!(activity = %key, "execution started");
            let outcome = body.run(&record, cancel).await;
            debug!(activity = %key, ok = outcome.is_ok(), "execution ended");
            outcome
        });

        let finished = ctx.finished.clone();
        let wake = Arc::clone(&ctx.wake);
        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(ActivityError::Canceled),
                Err(e) => Err(ActivityError::Panicked(panic_message(e.into_panic()))),
            };
            if let Err(e) = &outcome {
                warn!(activity = %key, error = %e, "error during activity execution");
            }
            // The controller may already be gone; then nobody needs the result.
            let _ = finished.send((key, outcome));
            wake.notify_one();
        });
    }

    pub(crate) fn mark_finished(&mut self, outcome: Outcome) {
        self.status = ExecutionStatus::Finished(outcome);
    }

    /// Release this instance and every attached duplicate.
    ///
    /// Returns the outcome, [`ActivityError::Canceled`] if the body never finished.
    pub(crate) fn signal_completion(&mut self) -> Outcome {
        let outcome = match &self.status {
            ExecutionStatus::Finished(outcome) => outcome.clone(),
            _ => Err(ActivityError::Canceled),
        };
        if let Some(completer) = self.completer.take() {
            completer.signal(Resolution::Executed(outcome.clone()));
        }
        for attachment in self.attachments.drain(..) {
            debug!(activity = %attachment.key, primary = %self.key, "execution ignored (attachment)");
            attachment.completer.signal(Resolution::Attached {
                primary: self.key,
                outcome: outcome.clone(),
            });
        }
        outcome
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
