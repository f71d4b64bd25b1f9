//! In-memory store, used by simulations and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use actq_core::{ActivityId, ActivityRecord, CompletionState, ResumePoint};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ActivityStore, Result};

/// Store keeping everything in process memory.
pub struct MemoryStore {
    activities: Mutex<BTreeMap<ActivityId, ActivityRecord>>,
    state: Mutex<CompletionState>,
    enable_load: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            activities: Mutex::new(BTreeMap::new()),
            state: Mutex::new(CompletionState::default()),
            enable_load: AtomicBool::new(true),
        }
    }

    /// Start from an already persisted completion state.
    pub fn with_state(state: CompletionState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::new()
        }
    }

    /// When disabled, activity loads return nothing (the store "does not know" any activity yet).
    pub fn set_enable_load(&self, enabled: bool) {
        self.enable_load.store(enabled, Ordering::SeqCst);
    }

    /// Number of stored activities.
    pub async fn len(&self) -> usize {
        self.activities.lock().await.len()
    }

    /// Whether the store holds no activity.
    pub async fn is_empty(&self) -> bool {
        self.activities.lock().await.is_empty()
    }

    fn loads_enabled(&self) -> bool {
        self.enable_load.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn persist_activity(&self, record: &ActivityRecord) -> Result<()> {
        let mut activities = self.activities.lock().await;
        if activities.contains_key(&record.id) {
            debug!(activity = %record.id, "activity already persisted");
            return Ok(());
        }
        activities.insert(record.id, record.clone());
        debug!(activity = %record.id, "activity persisted");
        Ok(())
    }

    async fn load_activities_from(&self, from: ActivityId, limit: usize) -> Result<Vec<ActivityRecord>> {
        if !self.loads_enabled() {
            return Ok(Vec::new());
        }
        let activities = self.activities.lock().await;
        Ok(activities
            .range(from..)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn load_activities(&self, ids: &[ActivityId]) -> Result<Vec<ActivityRecord>> {
        if !self.loads_enabled() {
            return Ok(Vec::new());
        }
        let activities = self.activities.lock().await;
        let mut loaded: Vec<_> = ids
            .iter()
            .filter_map(|id| activities.get(id).cloned())
            .collect();
        loaded.sort_by_key(|r| r.id);
        loaded.dedup_by_key(|r| r.id);
        Ok(loaded)
    }

    async fn max_activity_id(&self) -> Result<ActivityId> {
        let activities = self.activities.lock().await;
        Ok(activities.keys().next_back().copied().unwrap_or(ActivityId::ZERO))
    }

    async fn save_completion_state(&self, state: &CompletionState) -> Result<()> {
        *self.state.lock().await = state.clone();
        Ok(())
    }

    async fn load_completion_state(&self) -> Result<ResumePoint> {
        let state = self.state.lock().await.clone();
        let store_max_id = self.max_activity_id().await?;
        Ok(ResumePoint { state, store_max_id })
    }
}
