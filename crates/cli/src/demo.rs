//! Demo activity body driven by the record payload.

use std::sync::Arc;
use std::time::Duration;

use actq_core::{ActivityBody, ActivityError, ActivityFactory, ActivityRecord, Outcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Record kind of demo activities.
pub const DEMO_KIND: &str = "Demo";

/// What a demo activity does, stored as the record payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoSettings {
    /// Simulated work time
    #[serde(default)]
    pub delay_ms: u64,
    /// Report a failure after the work
    #[serde(default)]
    pub fail: bool,
    /// Wait for the directly preceding id
    #[serde(default)]
    pub chained: bool,
}

impl DemoSettings {
    /// Build the record for `id`.
    pub fn record(&self, id: u64) -> ActivityRecord {
        ActivityRecord::new(id, DEMO_KIND).with_payload(serde_json::to_value(self).unwrap_or_default())
    }

    fn of(record: &ActivityRecord) -> Self {
        serde_json::from_value(record.payload.clone()).unwrap_or_default()
    }
}

/// Sleeps, then succeeds or fails as its payload says.
pub struct DemoBody;

#[async_trait]
impl ActivityBody for DemoBody {
    fn depends_on(&self, candidate: &ActivityRecord, in_flight: &ActivityRecord) -> bool {
        DemoSettings::of(candidate).chained && in_flight.id.next() == candidate.id
    }

    async fn run(&self, record: &ActivityRecord, cancel: CancellationToken) -> Outcome {
        let settings = DemoSettings::of(record);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ActivityError::Canceled),
            _ = tokio::time::sleep(Duration::from_millis(settings.delay_ms)) => {}
        }
        if settings.fail {
            return Err(ActivityError::failed(format!("demo activity {} failed", record.id)));
        }
        Ok(())
    }
}

/// Every stored record replays as a [`DemoBody`].
pub struct DemoFactory;

impl ActivityFactory for DemoFactory {
    fn create(&self, _record: &ActivityRecord) -> Arc<dyn ActivityBody> {
        Arc::new(DemoBody)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip_through_payload() {
        let settings = DemoSettings {
            delay_ms: 5,
            fail: true,
            chained: false,
        };
        let record = settings.record(9);
        assert_eq!(record.kind, DEMO_KIND);
        assert_eq!(DemoSettings::of(&record), settings);
    }

    #[test]
    fn test_chained_waits_for_predecessor_only() {
        let chained = DemoSettings {
            chained: true,
            ..DemoSettings::default()
        };
        let candidate = chained.record(5);
        assert!(DemoBody.depends_on(&candidate, &DemoSettings::default().record(4)));
        assert!(!DemoBody.depends_on(&candidate, &DemoSettings::default().record(3)));
        assert!(!DemoBody.depends_on(&DemoSettings::default().record(5), &chained.record(4)));
    }

    #[tokio::test]
    async fn test_failing_body_reports_failure() {
        let failing = DemoSettings {
            fail: true,
            ..DemoSettings::default()
        };
        let outcome = DemoBody.run(&failing.record(1), CancellationToken::new()).await;
        assert!(matches!(outcome, Err(ActivityError::Failed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_body_stops_early() {
        let slow = DemoSettings {
            delay_ms: 60_000,
            ..DemoSettings::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(DemoBody.run(&slow.record(1), cancel).await, Err(ActivityError::Canceled));
    }
}
