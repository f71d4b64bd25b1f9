//! Public handle of a running activity queue.

use std::sync::Arc;

use actq_core::{ActivityFactory, CompletionState, ResumePoint};
use actq_storage::ActivityStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::activity::{Activity, Completion, CompletionHandle};
use crate::config::QueueConfig;
use crate::controller::Controller;
use crate::error::{QueueError, Result};
use crate::intake::Intake;
use crate::loader::{ActivityLoader, CatchUpLoader};

/// Ordered, deduplicating, dependency-aware activity executor.
///
/// Cloning is not supported; share it behind an `Arc`. Dropping the queue
/// cancels the controller.
pub struct ActivityQueue {
    intake: Arc<Intake>,
    store: Arc<dyn ActivityStore>,
    state_rx: watch::Receiver<CompletionState>,
    cancel: CancellationToken,
    controller: Option<JoinHandle<()>>,
    config: QueueConfig,
}

impl ActivityQueue {
    /// Resume from the completion state persisted in `store`.
    pub async fn start(
        store: Arc<dyn ActivityStore>,
        factory: Arc<dyn ActivityFactory>,
        config: QueueConfig,
    ) -> Result<Self> {
        let resume = store.load_completion_state().await?;
        Self::start_with(store, factory, config, resume).await
    }

    /// Start from explicit resume data.
    ///
    /// Every gap id and every id between the watermark and the store's max id
    /// is replayed from the store as a catch-up activity before new
    /// submissions are sequenced.
    pub async fn start_with(
        store: Arc<dyn ActivityStore>,
        factory: Arc<dyn ActivityFactory>,
        config: QueueConfig,
        resume: ResumePoint,
    ) -> Result<Self> {
        let ResumePoint {
            state,
            store_max_id,
        } = resume;
        info!(state = %state, store_max_id = %store_max_id, "starting activity queue");

        let loader = ActivityLoader::new(
            Arc::clone(&store),
            Arc::clone(&factory),
            config.loader_page_size,
        );
        let mut catch_ups = loader.load_gaps(&state.gap_ids(), true).await?;
        if store_max_id > state.last_activity_id {
            catch_ups.extend(
                loader
                    .load_range(state.last_activity_id.next(), store_max_id, true)
                    .await?,
            );
        }

        let (intake, arrivals) = Intake::new();
        let intake = Arc::new(intake);
        if !catch_ups.is_empty() {
            info!(count = catch_ups.len(), "catch-up activities enqueued");
        }
        for activity in catch_ups {
            intake.enqueue(activity)?;
        }

        let cancel = CancellationToken::new();
        let (controller, state_rx) = Controller::new(
            Arc::clone(&intake),
            arrivals,
            Arc::new(CatchUpLoader::new(loader)),
            Arc::clone(&store),
            state,
            config.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(controller.run());

        Ok(Self {
            intake,
            store,
            state_rx,
            cancel,
            controller: Some(handle),
            config,
        })
    }

    /// Enqueue an activity and get its completion handle.
    ///
    /// Locally originated activities are persisted first; a storage error
    /// rejects the submission before it reaches the queue.
    pub async fn submit(&self, activity: Activity) -> Result<CompletionHandle> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Stopped);
        }
        if activity.origin().requires_persistence() {
            self.store.persist_activity(activity.record()).await?;
        }
        self.intake.enqueue(activity)
    }

    /// Submit and wait for the activity's fate.
    pub async fn execute(&self, activity: Activity) -> Result<Completion> {
        self.submit(activity).await?.await
    }

    /// Latest published completion state.
    pub fn completion_state(&self) -> CompletionState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the published completion state satisfies `pred`.
    pub async fn wait_for_state(
        &self,
        pred: impl FnMut(&CompletionState) -> bool,
    ) -> Result<CompletionState> {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(pred).await.map_err(|_| QueueError::Stopped)?;
        Ok(state.clone())
    }

    /// Token that stops the queue when cancelled. Bodies receive child tokens of it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the controller loop is still running.
    pub fn is_running(&self) -> bool {
        self.controller
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop the controller and wait for it, aborting after the grace period.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        self.intake.wake();

        if let Some(handle) = self.controller.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.config.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(QueueError::internal(format!("controller task failed: {}", e)));
                }
                Err(_) => {
                    warn!("activity queue controller did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        info!(state = %self.completion_state(), "activity queue shut down");
        Ok(())
    }
}

impl Drop for ActivityQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
