use shared::{EngineError, EngineResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::notification::Notification;

/// Versioned notification list, newest first. Every mutation returns a new
/// log with the next version and leaves `self` untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationLog {
    version: u64,
    capacity: usize,
    items: Arc<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            version: 0,
            capacity: capacity.max(1),
            items: Arc::new(Vec::new()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    /// Prepends `notification`, dropping the oldest entries past capacity.
    pub fn posted(&self, notification: Notification) -> Self {
        self.posted_evicting(notification).0
    }

    /// Like `posted`, also returning the entries pushed out, oldest last.
    pub fn posted_evicting(&self, notification: Notification) -> (Self, Vec<Notification>) {
        let keep = self.capacity - 1;
        let mut items = Vec::with_capacity(self.items.len().min(keep) + 1);
        items.push(notification);
        items.extend(self.items.iter().take(keep).cloned());
        let evicted = self.items.iter().skip(keep).cloned().collect();
        (self.next(items), evicted)
    }

    /// Removes exactly the notification with `id`.
    pub fn cleared(&self, id: Uuid) -> EngineResult<(Self, Notification)> {
        let index = self
            .items
            .iter()
            .position(|n| n.id == id)
            .ok_or(EngineError::NotificationNotFound(id))?;

        let mut items = self.items.as_ref().clone();
        let removed = items.remove(index);
        Ok((self.next(items), removed))
    }

    pub fn marked_read(&self, id: Uuid) -> EngineResult<Self> {
        if self.get(id).is_none() {
            return Err(EngineError::NotificationNotFound(id));
        }
        let items = self
            .items
            .iter()
            .map(|n| {
                let mut n = n.clone();
                if n.id == id {
                    n.read = true;
                }
                n
            })
            .collect();
        Ok(self.next(items))
    }

    pub fn cleared_all(&self) -> Self {
        self.next(Vec::new())
    }

    fn next(&self, items: Vec<Notification>) -> Self {
        Self {
            version: self.version + 1,
            capacity: self.capacity,
            items: Arc::new(items),
        }
    }
}
