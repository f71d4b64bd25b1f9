//! Identifiers for activities and their in-process instances.

use serde::{Deserialize, Serialize};

/// Caller-assigned sequence number of an activity.
///
/// Not unique across instances: a retried or re-delivered activity carries
/// the same id as its first delivery.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActivityId(u64);

impl ActivityId {
    /// The id "before the first activity"; a fresh completion state starts here.
    pub const ZERO: ActivityId = ActivityId(0);

    /// Wrap a raw sequence number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw sequence number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id directly following this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for ActivityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Process-unique identity of one activity instance.
///
/// Several instances may share an [`ActivityId`]; the sequence part tells
/// them apart. Keys order by id first, so a sorted collection of keys is in
/// activity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    id: ActivityId,
    seq: u64,
}

impl InstanceKey {
    /// Create a key from an activity id and a per-process sequence number.
    pub const fn new(id: ActivityId, seq: u64) -> Self {
        Self { id, seq }
    }

    /// The activity id this instance carries.
    pub const fn id(&self) -> ActivityId {
        self.id
    }

    /// The per-process sequence number.
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.id, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_keys_order_by_id_first() {
        let a = InstanceKey::new(ActivityId::new(2), 1);
        let b = InstanceKey::new(ActivityId::new(1), 7);
        let c = InstanceKey::new(ActivityId::new(2), 3);

        let mut keys = vec![a, b, c];
        keys.sort();
        assert_eq!(keys, vec![b, a, c]);
    }

    #[test]
    fn test_display() {
        let key = InstanceKey::new(ActivityId::new(12), 4);
        assert_eq!(key.to_string(), "12-4");
        assert_eq!(ActivityId::new(12).next().to_string(), "13");
    }
}
