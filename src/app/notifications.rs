use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::infra::queue::QueueClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipEventKind {
    FollowRequested,
    FollowAccepted,
}

/// Notification payload emitted after a relationship write commits. `from` is
/// the account on the following side of the edge, `to` the account being
/// followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEvent {
    pub kind: RelationshipEventKind,
    pub from: Uuid,
    pub to: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl RelationshipEvent {
    pub fn follow_requested(from: Uuid, to: Uuid) -> Self {
        Self {
            kind: RelationshipEventKind::FollowRequested,
            from,
            to,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn follow_accepted(from: Uuid, to: Uuid) -> Self {
        Self {
            kind: RelationshipEventKind::FollowAccepted,
            from,
            to,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Delivery is best effort: dispatch happens after the store write commits,
/// and a failed send never rolls the write back or surfaces to the caller.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, event: RelationshipEvent);
}

/// Ships events to the notification queue from a background task.
pub struct QueueDispatcher {
    queue: QueueClient,
}

impl QueueDispatcher {
    pub fn new(queue: QueueClient) -> Self {
        Self { queue }
    }
}

impl NotificationDispatcher for QueueDispatcher {
    fn dispatch(&self, event: RelationshipEvent) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            if let Err(err) = queue.enqueue_event(&event).await {
                warn!(error = ?err, kind = ?event.kind, "failed to enqueue relationship event");
            }
        });
    }
}

/// Drops events on the floor. Used when no queue is configured.
pub struct NullDispatcher;

impl NotificationDispatcher for NullDispatcher {
    fn dispatch(&self, event: RelationshipEvent) {
        debug!(kind = ?event.kind, from = %event.from, to = %event.to, "event sink disabled");
    }
}

/// Captures events in memory. The integration test harness reads them back to
/// assert on what a write emitted.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<RelationshipEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<RelationshipEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn recorded(&self) -> Vec<RelationshipEvent> {
        self.events.lock().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: RelationshipEvent) {
        self.events.lock().push(event);
    }
}
