//! Completion state - resumable summary of what has executed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::ActivityId;

/// Gap lists up to this many entries (plus [`GAP_DISPLAY_GROWTH`]) render in full.
const GAP_DISPLAY_MAX: usize = 50;
const GAP_DISPLAY_GROWTH: usize = 10;

/// Watermark plus gap set.
///
/// Every id at or below `last_activity_id` that is not in `gaps` has executed
/// successfully exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionState {
    /// Highest id confirmed executed
    pub last_activity_id: ActivityId,

    /// Ids below the watermark not yet executed successfully
    #[serde(default)]
    pub gaps: BTreeSet<ActivityId>,
}

impl CompletionState {
    /// Create a state from a watermark and gap ids.
    ///
    /// Gaps at or above the watermark carry no meaning and are dropped.
    pub fn new(last_activity_id: ActivityId, gaps: impl IntoIterator<Item = ActivityId>) -> Self {
        let gaps = gaps
            .into_iter()
            .filter(|gap| *gap < last_activity_id)
            .collect();
        Self { last_activity_id, gaps }
    }

    /// Whether `id` is recorded as executed successfully.
    pub fn is_executed(&self, id: ActivityId) -> bool {
        id != ActivityId::ZERO && id <= self.last_activity_id && !self.gaps.contains(&id)
    }

    /// Record a successful execution. Returns whether the state changed.
    ///
    /// Ids skipped over by an advancing watermark become gaps.
    pub fn record_success(&mut self, id: ActivityId) -> bool {
        if id > self.last_activity_id {
            let mut skipped = self.last_activity_id.next();
            while skipped < id {
                self.gaps.insert(skipped);
                skipped = skipped.next();
            }
            self.last_activity_id = id;
            true
        } else {
            self.gaps.remove(&id)
        }
    }

    /// Gap ids in ascending order.
    pub fn gap_ids(&self) -> Vec<ActivityId> {
        self.gaps.iter().copied().collect()
    }
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = if self.gaps.len() < GAP_DISPLAY_MAX + GAP_DISPLAY_GROWTH {
            self.gaps.len()
        } else {
            GAP_DISPLAY_MAX
        };
        let listed: Vec<String> = self.gaps.iter().take(shown).map(|g| g.to_string()).collect();

        write!(f, "{}({}", self.last_activity_id, listed.join(","))?;
        if shown < self.gaps.len() {
            write!(f, ",... and {} additional items", self.gaps.len() - shown)?;
        }
        f.write_str(")")
    }
}

/// Resume data loaded from the store at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Persisted completion state
    pub state: CompletionState,

    /// Highest activity id currently in the store
    pub store_max_id: ActivityId,
}
