//! The control loop - single owner of all ordering and dependency state.
//!
//! Each cycle runs:
//! ```text
//! Line up arrivals → Sequence waiting set → Supervise executing → Retire finished
//! ```
//! and repeats while retiring frees dependents. Between cycles the loop
//! sleeps on the wake signal.

use std::collections::BTreeMap;
use std::sync::Arc;

use actq_core::{ActivityId, CompletionState, InstanceKey, Outcome};
use actq_storage::ActivityStore;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::activity::{Arrival, ExecutionContext, ExecutionStatus, QueuedActivity};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::graph::ActivityGraph;
use crate::intake::Intake;
use crate::loader::CatchUpLoader;
use crate::resolver::{DependencyResolver, Discovery};

pub(crate) struct Controller {
    arrivals: mpsc::UnboundedReceiver<Arrival>,
    intake: Arc<Intake>,
    wake: Arc<Notify>,
    exec: ExecutionContext,
    finished: mpsc::UnboundedReceiver<(InstanceKey, Outcome)>,
    /// Arrivals not yet admitted, ordered by id
    waiting: BTreeMap<InstanceKey, Arrival>,
    graph: ActivityGraph,
    resolver: DependencyResolver,
    catch_up: Arc<CatchUpLoader>,
    state: CompletionState,
    state_tx: watch::Sender<CompletionState>,
    store: Arc<dyn ActivityStore>,
    /// Highest id ever admitted, not necessarily finished
    last_started: ActivityId,
    /// Set while the head of the waiting set is beyond the next expected id
    gap_pending: bool,
    last_gap_request: Option<(ActivityId, Instant)>,
    cycles: u64,
    config: QueueConfig,
    cancel: CancellationToken,
}

impl Controller {
    pub(crate) fn new(
        intake: Arc<Intake>,
        arrivals: mpsc::UnboundedReceiver<Arrival>,
        catch_up: Arc<CatchUpLoader>,
        store: Arc<dyn ActivityStore>,
        state: CompletionState,
        config: QueueConfig,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<CompletionState>) {
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (finished_tx, finished) = mpsc::unbounded_channel();
        let wake = intake.wake_signal();
        let exec = ExecutionContext {
            cancel: cancel.clone(),
            finished: finished_tx,
            wake: Arc::clone(&wake),
        };

        let controller = Self {
            arrivals,
            intake,
            wake,
            exec,
            finished,
            waiting: BTreeMap::new(),
            graph: ActivityGraph::new(),
            resolver: DependencyResolver::new(),
            catch_up,
            last_started: state.last_activity_id,
            state,
            state_tx,
            store,
            gap_pending: false,
            last_gap_request: None,
            cycles: 0,
            config,
            cancel,
        };
        (controller, state_rx)
    }

    /// Run until cancelled or until the loop faults.
    ///
    /// Either way only the head of the waiting set is released; every other
    /// pending handle observes the controller going away.
    pub(crate) async fn run(mut self) {
        info!(state = %self.state, "activity queue controller started");

        loop {
            if let Err(e) = self.work().await {
                error!(error = %e, cycle = self.cycles, "activity queue controller faulted, stopping");
                self.release_head();
                break;
            }

            let stalled = self.gap_pending;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(state = %self.state, "activity queue controller cancelled");
                    self.release_head();
                    break;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.gap_retry_interval), if stalled => {
                    trace!("waiting set still stalled");
                }
            }
        }

        info!(
            state = %self.state,
            waiting = self.waiting.len(),
            in_flight = self.graph.len(),
            "activity queue controller stopped"
        );
    }

    /// Cycle until no more activities retire, then publish the state.
    async fn work(&mut self) -> Result<()> {
        let mut changed = false;
        loop {
            self.cycles += 1;
            let lined_up = self.line_up();
            self.collect_finished()?;
            self.sequence_waiting()?;
            let finished = self.supervise()?;
            trace!(
                cycle = self.cycles,
                lined_up,
                waiting = self.waiting.len(),
                executing = self.graph.executing_len(),
                finished = finished.len(),
                "control cycle"
            );
            if finished.is_empty() {
                break;
            }
            changed |= self.retire(finished)?;
        }

        if changed {
            if let Err(e) = self.store.save_completion_state(&self.state).await {
                warn!(state = %self.state, error = %e, "saving completion state failed");
            }
        }
        Ok(())
    }

    /// Move every pending arrival into the waiting set.
    fn line_up(&mut self) -> usize {
        let mut count = 0;
        while let Ok(arrival) = self.arrivals.try_recv() {
            trace!(activity = %arrival.key, "activity lined up");
            self.waiting.insert(arrival.key, arrival);
            count += 1;
        }
        count
    }

    fn collect_finished(&mut self) -> Result<()> {
        while let Ok((key, outcome)) = self.finished.try_recv() {
            self.graph.get_mut(key)?.mark_finished(outcome);
        }
        Ok(())
    }

    fn sequence_waiting(&mut self) -> Result<()> {
        self.gap_pending = false;

        while let Some((key, catch_up)) = self
            .waiting
            .first_key_value()
            .map(|(key, arrival)| (*key, arrival.activity.is_catch_up()))
        {
            let id = key.id();
            if !catch_up && id <= self.last_started {
                if let Some(arrival) = self.waiting.remove(&key) {
                    self.attach_or_ignore(arrival)?;
                }
            } else if catch_up || id == self.last_started.next() {
                if let Some(arrival) = self.waiting.remove(&key) {
                    if catch_up {
                        self.admit_catch_up(arrival)?;
                    } else {
                        self.admit(arrival)?;
                    }
                }
            } else {
                trace!(activity = %key, last_started = %self.last_started, "gap in the arrival stream");
                self.gap_pending = true;
                self.request_catch_up(id);
                break;
            }
        }
        Ok(())
    }

    fn attach_or_ignore(&mut self, arrival: Arrival) -> Result<()> {
        match self.graph.in_flight_by_id(arrival.id()) {
            Some(primary) => self.graph.attach(primary, arrival),
            None => {
                debug!(activity = %arrival.key, "execution ignored, activity already handled");
                arrival.ignore();
                Ok(())
            }
        }
    }

    fn admit_catch_up(&mut self, arrival: Arrival) -> Result<()> {
        if self.graph.in_flight_by_id(arrival.id()).is_some() {
            return self.attach_or_ignore(arrival);
        }
        if self.state.is_executed(arrival.id()) {
            debug!(activity = %arrival.key, "catch-up ignored, activity already executed");
            arrival.ignore();
            return Ok(());
        }
        self.admit(arrival)
    }

    fn admit(&mut self, arrival: Arrival) -> Result<()> {
        let key = arrival.key;
        self.graph.insert(QueuedActivity::new(arrival))?;

        match self.resolver.discover(&mut self.graph, key)? {
            Discovery::Ready => {
                self.graph.start_executing(key)?;
                debug!(activity = %key, "moved to executing");
            }
            Discovery::Blocked(blockers) => {
                debug!(activity = %key, blocked_by = blockers.len(), "waiting for dependencies");
            }
        }

        // Catch-up admissions may be behind; never move backwards.
        self.last_started = self.last_started.max(key.id());
        Ok(())
    }

    /// Load the ids between the next expected one and the waiting `head`, at
    /// most once per retry interval.
    fn request_catch_up(&mut self, head: ActivityId) {
        let from = self.last_started.next();
        let to = ActivityId::new(head.get() - 1);
        let now = Instant::now();
        if let Some((last_from, at)) = self.last_gap_request {
            if last_from == from && now.duration_since(at) < self.config.gap_retry_interval {
                return;
            }
        }
        if self.catch_up.spawn_range(from, to, Arc::clone(&self.intake)) {
            self.last_gap_request = Some((from, now));
        }
    }

    /// Start not-started bodies and collect the finished ones.
    fn supervise(&mut self) -> Result<Vec<InstanceKey>> {
        let mut finished = Vec::new();
        for key in self.graph.executing() {
            let node = self.graph.get_mut(key)?;
            match node.status() {
                ExecutionStatus::NotStarted => node.run_body(&self.exec),
                ExecutionStatus::Running => {}
                ExecutionStatus::Finished(_) => finished.push(key),
            }
        }
        Ok(finished)
    }

    /// Release finished activities and cascade their dependents into execution.
    ///
    /// The state is published before the handle is signaled, so an awaited
    /// handle never observes an older state. Returns whether the state changed.
    fn retire(&mut self, finished: Vec<InstanceKey>) -> Result<bool> {
        let mut changed = false;

        for key in finished {
            let mut node = self.graph.remove(key)?;
            let succeeded = matches!(node.status(), ExecutionStatus::Finished(Ok(())));

            if succeeded && self.state.record_success(node.id()) {
                changed = true;
                self.state_tx.send_replace(self.state.clone());
            }
            let outcome = node.signal_completion();
            if let Err(e) = &outcome {
                debug!(activity = %key, error = %e, "completion state not advanced");
            }

            for dependent in std::mem::take(&mut node.dependents) {
                if self.graph.resolve_dependency(dependent, key)? {
                    self.graph.start_executing(dependent)?;
                    debug!(activity = %dependent, released_by = %key, "moved to executing");
                }
            }
            debug!(activity = %key, state = %self.state, "activity finished");
        }
        Ok(changed)
    }

    fn release_head(&mut self) {
        if let Some((key, arrival)) = self.waiting.pop_first() {
            debug!(activity = %key, "head of waiting set released");
            arrival.ignore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::loader::ActivityLoader;
    use actq_core::{ActivityBody, ActivityFactory, ActivityRecord};
    use actq_storage::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Never finishes on its own.
    struct Parked;

    #[async_trait]
    impl ActivityBody for Parked {
        async fn run(&self, _record: &ActivityRecord, cancel: CancellationToken) -> Outcome {
            cancel.cancelled().await;
            Err(actq_core::ActivityError::Canceled)
        }
    }

    fn controller(state: CompletionState) -> (Controller, Arc<Intake>) {
        controller_over(Arc::new(MemoryStore::new()), QueueConfig::default(), state)
    }

    fn controller_over(
        store: Arc<dyn ActivityStore>,
        config: QueueConfig,
        state: CompletionState,
    ) -> (Controller, Arc<Intake>) {
        let factory: Arc<dyn ActivityFactory> =
            Arc::new(|_: &ActivityRecord| -> Arc<dyn ActivityBody> { Arc::new(Parked) });
        let catch_up = Arc::new(CatchUpLoader::new(ActivityLoader::new(
            Arc::clone(&store),
            factory,
            200,
        )));
        let (intake, arrivals) = Intake::new();
        let intake = Arc::new(intake);
        let (controller, _state_rx) = Controller::new(
            Arc::clone(&intake),
            arrivals,
            catch_up,
            store,
            state,
            config,
            CancellationToken::new(),
        );
        (controller, intake)
    }

    fn submit(intake: &Intake, id: u64) {
        let activity = Activity::new(ActivityRecord::new(id, "parked"), Arc::new(Parked));
        intake.enqueue(activity).unwrap();
    }

    fn executing_ids(controller: &Controller) -> Vec<u64> {
        controller
            .graph
            .executing()
            .into_iter()
            .map(|k| k.id().get())
            .collect()
    }

    #[tokio::test]
    async fn test_admission_is_in_id_order() {
        let (mut controller, intake) = controller(CompletionState::default());
        for id in [3, 1, 2, 5] {
            submit(&intake, id);
        }

        controller.work().await.unwrap();

        assert_eq!(executing_ids(&controller), vec![1, 2, 3]);
        assert_eq!(controller.last_started, ActivityId::new(3));
        assert!(controller.gap_pending);
        let waiting: Vec<_> = controller.waiting.keys().map(|k| k.id().get()).collect();
        assert_eq!(waiting, vec![5]);
        controller.cancel.cancel();
    }

    #[tokio::test]
    async fn test_stale_arrival_attaches_to_in_flight_instance() {
        let (mut controller, intake) = controller(CompletionState::default());
        submit(&intake, 1);
        controller.work().await.unwrap();

        submit(&intake, 1);
        controller.work().await.unwrap();

        let primary = controller.graph.in_flight_by_id(ActivityId::new(1)).unwrap();
        assert_eq!(controller.graph.get(primary).unwrap().attachment_count(), 1);
        assert!(controller.waiting.is_empty());
        controller.cancel.cancel();
    }

    #[tokio::test]
    async fn test_resumes_after_watermark() {
        let (mut controller, intake) = controller(CompletionState::new(ActivityId::new(10), []));
        submit(&intake, 11);
        submit(&intake, 4);
        controller.work().await.unwrap();

        assert_eq!(executing_ids(&controller), vec![11]);
        controller.cancel.cancel();
    }

    #[tokio::test]
    async fn test_release_head_ignores_lowest_waiting() {
        let (mut controller, intake) = controller(CompletionState::default());
        let activity = Activity::new(ActivityRecord::new(7, "parked"), Arc::new(Parked));
        let handle = intake.enqueue(activity).unwrap();
        submit(&intake, 9);
        controller.work().await.unwrap();

        controller.release_head();
        let completion = handle.await.unwrap();
        assert_eq!(completion.resolution, crate::Resolution::Ignored);
        assert_eq!(controller.waiting.len(), 1);
    }

    async fn store_with(ids: impl IntoIterator<Item = u64>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store
                .persist_activity(&ActivityRecord::new(id, "parked"))
                .await
                .unwrap();
        }
        store
    }

    fn waiting_ids(controller: &Controller) -> Vec<u64> {
        controller.waiting.keys().map(|k| k.id().get()).collect()
    }

    #[tokio::test]
    async fn test_stalled_gap_keeps_waiting_set_bounded() {
        let config = QueueConfig::default().with_gap_retry_interval(Duration::from_millis(10));
        let (mut controller, intake) =
            controller_over(store_with(3..=100).await, config, CompletionState::default());
        submit(&intake, 1);
        submit(&intake, 3);

        for _ in 0..30 {
            controller.work().await.unwrap();
            sleep(Duration::from_millis(15)).await;
        }
        controller.work().await.unwrap();

        assert_eq!(waiting_ids(&controller), vec![3]);
        assert_eq!(executing_ids(&controller), vec![1]);
        controller.cancel.cancel();
    }

    #[tokio::test]
    async fn test_gap_is_filled_from_store_without_the_tail() {
        let (mut controller, intake) = controller_over(
            store_with(2..=5).await,
            QueueConfig::default(),
            CompletionState::default(),
        );
        submit(&intake, 1);
        submit(&intake, 3);

        for _ in 0..100 {
            controller.work().await.unwrap();
            if executing_ids(&controller).len() == 3 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(executing_ids(&controller), vec![1, 2, 3]);
        assert!(waiting_ids(&controller).is_empty());
        assert_eq!(controller.last_started, ActivityId::new(3));
        controller.cancel.cancel();
    }
}
