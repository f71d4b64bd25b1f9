//! Catch-up loading from the activity store.
//!
//! [`ActivityLoader`] turns stored records back into executable activities,
//! either for an explicit list of gap ids or for an id range, paging through
//! the store. [`CatchUpLoader`] loads the hole in front of the waiting set on
//! a worker task for the controller, at most one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use actq_core::{ActivityFactory, ActivityId, ActivityRecord};
use actq_storage::ActivityStore;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::error::Result;
use crate::intake::Intake;

/// Loads store-origin activities.
pub struct ActivityLoader {
    store: Arc<dyn ActivityStore>,
    factory: Arc<dyn ActivityFactory>,
    page_size: usize,
}

impl ActivityLoader {
    /// Create a loader fetching at most `page_size` records per store call.
    pub fn new(
        store: Arc<dyn ActivityStore>,
        factory: Arc<dyn ActivityFactory>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            factory,
            page_size: page_size.max(1),
        }
    }

    /// Load the activities with the given ids. Ids the store does not know are skipped.
    pub async fn load_gaps(&self, ids: &[ActivityId], catch_up: bool) -> Result<Vec<Activity>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.page_size) {
            let records = self.store.load_activities(chunk).await?;
            if records.len() < chunk.len() {
                warn!(
                    requested = chunk.len(),
                    found = records.len(),
                    "some gap activities are missing from the store"
                );
            }
            loaded.extend(records.into_iter().map(|r| self.build(r, catch_up)));
        }
        debug!(count = loaded.len(), "gap activities loaded");
        Ok(loaded)
    }

    /// Load every stored activity with `from <= id <= to`, ascending.
    pub async fn load_range(
        &self,
        from: ActivityId,
        to: ActivityId,
        catch_up: bool,
    ) -> Result<Vec<Activity>> {
        let mut loaded = Vec::new();
        let mut next = from;

        while next <= to {
            let page = self.store.load_activities_from(next, self.page_size).await?;
            let page_len = page.len();
            let Some(last) = page.last().map(|r| r.id) else {
                break;
            };

            let in_range = page.into_iter().filter(|r| r.id <= to);
            loaded.extend(in_range.map(|r| self.build(r, catch_up)));

            if page_len < self.page_size || last >= to {
                break;
            }
            next = last.next();
        }

        debug!(from = %from, to = %to, count = loaded.len(), "activity range loaded");
        Ok(loaded)
    }

    /// Load everything stored from `from` upwards as in-order arrivals.
    pub async fn load_from(&self, from: ActivityId) -> Result<Vec<Activity>> {
        self.load_range(from, ActivityId::new(u64::MAX), false).await
    }

    fn build(&self, record: ActivityRecord, catch_up: bool) -> Activity {
        let body = self.factory.create(&record);
        Activity::from_store(record, body, catch_up)
    }
}

/// Single-flight wrapper the controller uses to fill a gap in the arrival stream.
pub(crate) struct CatchUpLoader {
    loader: ActivityLoader,
    loading: AtomicBool,
}

impl CatchUpLoader {
    pub(crate) fn new(loader: ActivityLoader) -> Self {
        Self {
            loader,
            loading: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Start loading the hole `from..=to` on a worker task unless a load is
    /// already running. Loaded activities re-enter through `intake`.
    ///
    /// Returns whether a load was started.
    pub(crate) fn spawn_range(
        self: &Arc<Self>,
        from: ActivityId,
        to: ActivityId,
        intake: Arc<Intake>,
    ) -> bool {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(from = %from, to = %to, "loading missing activities");
            match this.loader.load_range(from, to, false).await {
                Ok(activities) => {
                    let count = activities.len();
                    for activity in activities {
                        // Handles are dropped; the controller still releases them.
                        if intake.enqueue(activity).is_err() {
                            break;
                        }
                    }
                    info!(from = %from, to = %to, count, "missing activities loaded");
                }
                Err(e) => {
                    warn!(from = %from, to = %to, error = %e, "loading missing activities failed")
                }
            }
            this.loading.store(false, Ordering::Release);
            intake.wake();
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actq_core::{ActivityBody, Origin, Outcome};
    use actq_storage::MemoryStore;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Noop;

    #[async_trait]
    impl ActivityBody for Noop {
        async fn run(&self, _record: &ActivityRecord, _cancel: CancellationToken) -> Outcome {
            Ok(())
        }
    }

    fn factory() -> Arc<dyn ActivityFactory> {
        Arc::new(|_: &ActivityRecord| -> Arc<dyn ActivityBody> { Arc::new(Noop) })
    }

    async fn store_with(ids: &[u64]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for &id in ids {
            store.persist_activity(&ActivityRecord::new(id, "test")).await.unwrap();
        }
        store
    }

    fn ids(activities: &[Activity]) -> Vec<u64> {
        activities.iter().map(|a| a.id().get()).collect()
    }

    #[tokio::test]
    async fn test_range_pages_through_store() {
        let store = store_with(&(1..=12).collect::<Vec<_>>()).await;
        let loader = ActivityLoader::new(store, factory(), 5);

        let loaded = loader
            .load_range(ActivityId::new(3), ActivityId::new(11), true)
            .await
            .unwrap();
        assert_eq!(ids(&loaded), (3..=11).collect::<Vec<_>>());
        assert!(loaded.iter().all(|a| a.is_catch_up() && a.origin() == Origin::Store));
    }

    #[tokio::test]
    async fn test_gaps_skip_unknown_ids() {
        let store = store_with(&[4, 6, 7, 11]).await;
        let loader = ActivityLoader::new(store, factory(), 2);

        let wanted: Vec<_> = [4, 5, 6, 7].into_iter().map(ActivityId::new).collect();
        let loaded = loader.load_gaps(&wanted, true).await.unwrap();
        assert_eq!(ids(&loaded), vec![4, 6, 7]);
    }

    #[tokio::test]
    async fn test_load_from_is_not_catch_up() {
        let store = store_with(&[1, 2, 3]).await;
        let loader = ActivityLoader::new(store, factory(), 200);

        let loaded = loader.load_from(ActivityId::new(2)).await.unwrap();
        assert_eq!(ids(&loaded), vec![2, 3]);
        assert!(loaded.iter().all(|a| !a.is_catch_up()));
    }

    #[tokio::test]
    async fn test_catch_up_is_single_flight_and_bounded() {
        let store = store_with(&[2, 3, 4, 5]).await;
        let catch_up = Arc::new(CatchUpLoader::new(ActivityLoader::new(store, factory(), 200)));
        let (intake, mut rx) = Intake::new();
        let intake = Arc::new(intake);

        let (from, to) = (ActivityId::new(2), ActivityId::new(3));
        assert!(catch_up.spawn_range(from, to, Arc::clone(&intake)));
        assert!(!catch_up.spawn_range(from, to, Arc::clone(&intake)));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.id().get(), second.id().get()), (2, 3));
        assert!(!first.activity.is_catch_up());

        while catch_up.is_loading() {
            tokio::task::yield_now().await;
        }
        // Nothing past the hole was enqueued.
        assert!(rx.try_recv().is_err());
        assert!(catch_up.spawn_range(ActivityId::new(4), ActivityId::new(4), intake));
    }
}
