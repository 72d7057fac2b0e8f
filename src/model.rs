//! Core data model.
//!
//! A queue item is something that needs doing. It belongs to exactly one
//! queue, may be deferred until a point in time, and is claimed by at most
//! one worker.

pub mod criteria;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Queue Item
// ---------------------------------------------------------------------------

/// A persisted queue item, as returned by reads and claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Generated by the store on publish.
    pub id: ItemId,

    /// Event/item type name.
    pub name: String,

    /// Queue the item was published to.
    pub queue: String,

    /// Caller-supplied tracking identifier. Opaque to the store.
    pub tid: Option<String>,

    /// Arbitrary data for the worker. The store doesn't interpret this.
    pub payload: serde_json::Value,

    /// Causally-prior item, if any. A reference only; the parent may be gone.
    pub parent: Option<ItemId>,

    pub created: DateTime<Utc>,

    /// Not eligible for claim before this instant. None = eligible now.
    /// Cleared when the item is claimed.
    pub when: Option<DateTime<Utc>>,

    /// Claim instant. None = pending.
    pub done: Option<DateTime<Utc>>,

    /// Managed by callers; the store never changes it.
    pub retry_count: i32,
}

impl QueueItem {
    pub fn is_claimed(&self) -> bool {
        self.done.is_some()
    }

    /// Would this item be picked up by a claim issued at `now`?
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.done.is_none() && self.when.is_none_or(|when| when <= now)
    }
}

/// Newtype for queue item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ItemId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// The queues that receive items for an event name.
///
/// A missing record reads as an empty queue list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub event_name: String,
    pub queues: Vec<String>,
}

impl Subscription {
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for items to publish. The id and creation time are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub(crate) name: String,
    pub(crate) queue: String,
    pub(crate) tid: Option<String>,
    pub(crate) payload: serde_json::Value,
    pub(crate) parent: Option<ItemId>,
    pub(crate) when: Option<DateTime<Utc>>,
    pub(crate) retry_count: i32,
}

impl NewQueueItem {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            tid: None,
            payload: serde_json::json!({}),
            parent: None,
            when: None,
            retry_count: 0,
        }
    }

    pub fn tid(mut self, tid: impl Into<String>) -> Self {
        self.tid = Some(tid.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn parent(mut self, parent: ItemId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Defer eligibility until `when`.
    pub fn when(mut self, when: DateTime<Utc>) -> Self {
        self.when = Some(when);
        self
    }

    pub fn retry_count(mut self, n: i32) -> Self {
        self.retry_count = n;
        self
    }
}

impl From<NewQueueItem> for Vec<NewQueueItem> {
    fn from(item: NewQueueItem) -> Self {
        vec![item]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(when: Option<DateTime<Utc>>, done: Option<DateTime<Utc>>) -> QueueItem {
        QueueItem {
            id: ItemId::new(),
            name: "x".to_string(),
            queue: "q".to_string(),
            tid: None,
            payload: serde_json::json!({}),
            parent: None,
            created: Utc::now(),
            when,
            done,
            retry_count: 0,
        }
    }

    #[test]
    fn null_when_is_eligible_immediately() {
        assert!(item(None, None).is_eligible_at(Utc::now()));
    }

    #[test]
    fn future_when_is_not_eligible_until_it_passes() {
        let now = Utc::now();
        let deferred = item(Some(now + Duration::minutes(10)), None);
        assert!(!deferred.is_eligible_at(now));
        assert!(deferred.is_eligible_at(now + Duration::minutes(11)));
    }

    #[test]
    fn claimed_item_is_never_eligible() {
        let now = Utc::now();
        let claimed = item(None, Some(now));
        assert!(claimed.is_claimed());
        assert!(!claimed.is_eligible_at(now + Duration::days(1)));
    }

    #[test]
    fn single_item_normalizes_to_batch() {
        let batch: Vec<NewQueueItem> = NewQueueItem::new("x", "q").into();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, serde_json::json!({}));
    }

    #[test]
    fn item_id_round_trips_through_display() {
        let id = ItemId::new();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
