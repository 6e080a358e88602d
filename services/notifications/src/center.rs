use parking_lot::RwLock;
use shared::bus::{EngineEvent, EventBus, EventSource};
use shared::{EngineError, EngineResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::notification::{Notification, NotificationKind, Priority};
use crate::store::NotificationLog;

/// Owns the live notification log and announces changes on the bus. Events
/// are published while the log's write lock is held, so their order on the
/// bus matches the order of log versions.
pub struct NotificationCenter {
    log: RwLock<NotificationLog>,
    bus: Arc<EventBus>,
}

impl NotificationCenter {
    pub fn new(capacity: usize, bus: Arc<EventBus>) -> Self {
        Self {
            log: RwLock::new(NotificationLog::new(capacity)),
            bus,
        }
    }

    pub fn post(
        &self,
        kind: NotificationKind,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Notification {
        self.publish(Notification::new(kind, priority, title, message))
    }

    /// Surface a recoverable engine error to the dispatcher.
    pub fn post_error(&self, err: &EngineError) -> Option<Notification> {
        let notification = Notification::from_error(err)?;
        tracing::warn!(error = %err, "Engine error surfaced to dispatcher");
        Some(self.publish(notification))
    }

    pub fn publish(&self, notification: Notification) -> Notification {
        let mut log = self.log.write();
        let (next, evicted) = log.posted_evicting(notification.clone());
        *log = next;

        self.bus.publish(
            EventSource::Notifications,
            EngineEvent::NotificationPosted {
                id: notification.id,
                title: notification.title.clone(),
            },
        );
        for dropped in &evicted {
            tracing::debug!(id = %dropped.id, title = %dropped.title, "Notification evicted");
            self.bus.publish(
                EventSource::Notifications,
                EngineEvent::NotificationCleared { id: dropped.id },
            );
        }
        notification
    }

    pub fn clear(&self, id: Uuid) -> EngineResult<Notification> {
        let mut log = self.log.write();
        let (next, removed) = log.cleared(id)?;
        *log = next;

        self.bus
            .publish(EventSource::Notifications, EngineEvent::NotificationCleared { id });
        Ok(removed)
    }

    pub fn mark_read(&self, id: Uuid) -> EngineResult<()> {
        let mut log = self.log.write();
        *log = log.marked_read(id)?;
        Ok(())
    }

    /// Clears everything and returns how many notifications were removed.
    pub fn clear_all(&self) -> usize {
        let mut log = self.log.write();
        let removed: Vec<Uuid> = log.items().iter().map(|n| n.id).collect();
        *log = log.cleared_all();

        for id in &removed {
            self.bus
                .publish(EventSource::Notifications, EngineEvent::NotificationCleared { id: *id });
        }
        removed.len()
    }

    pub fn snapshot(&self) -> NotificationLog {
        self.log.read().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.log.read().unread_count()
    }
}
