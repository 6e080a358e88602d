//! In-process event bus
//!
//! Every publish is stamped with a per-source sequence number and fanned out
//! while the source's lock is held, so subscribers see each source in order.
//! Nothing orders one source against another.
//!
//! Delivery is at-least-once: subscriber queues are unbounded and each source
//! keeps a bounded journal that a subscriber can replay after a gap.
//! `Subscription` drops anything at or below the last sequence it has seen.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::types::{
    IncidentId, IncidentKind, IntersectionId, OverrideState, Position, Route, RouteId, Severity,
    VehicleId, VehicleStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Dispatch,
    Incidents,
    Routing,
    Override,
    Notifications,
    Chat,
}

impl EventSource {
    pub const ALL: [EventSource; 6] = [
        EventSource::Dispatch,
        EventSource::Incidents,
        EventSource::Routing,
        EventSource::Override,
        EventSource::Notifications,
        EventSource::Chat,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    VehicleStatusChanged {
        vehicle: VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
        incident: Option<IncidentId>,
    },
    RouteUpdated {
        vehicle: VehicleId,
        route: Route,
    },
    OverrideChanged {
        route: RouteId,
        state: OverrideState,
        intersections: Vec<IntersectionId>,
    },
    IncidentReported {
        incident: IncidentId,
        kind: IncidentKind,
        severity: Severity,
        location: Position,
    },
    NotificationPosted {
        id: Uuid,
        title: String,
    },
    NotificationCleared {
        id: Uuid,
    },
    MessagePosted {
        id: Uuid,
        sender: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    VehicleStatusChanged,
    RouteUpdated,
    OverrideChanged,
    IncidentReported,
    NotificationPosted,
    NotificationCleared,
    MessagePosted,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::VehicleStatusChanged { .. } => EventKind::VehicleStatusChanged,
            EngineEvent::RouteUpdated { .. } => EventKind::RouteUpdated,
            EngineEvent::OverrideChanged { .. } => EventKind::OverrideChanged,
            EngineEvent::IncidentReported { .. } => EventKind::IncidentReported,
            EngineEvent::NotificationPosted { .. } => EventKind::NotificationPosted,
            EngineEvent::NotificationCleared { .. } => EventKind::NotificationCleared,
            EngineEvent::MessagePosted { .. } => EventKind::MessagePosted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub source: EventSource,
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub event: EngineEvent,
}

struct SourceChannel {
    last_sequence: u64,
    journal: VecDeque<EventEnvelope>,
}

struct Subscriber {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    sender: Sender<EventEnvelope>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

pub struct EventBus {
    sources: HashMap<EventSource, Mutex<SourceChannel>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    journal_capacity: usize,
}

impl EventBus {
    pub fn new(journal_capacity: usize) -> Self {
        let sources = EventSource::ALL
            .iter()
            .map(|source| {
                (
                    *source,
                    Mutex::new(SourceChannel {
                        last_sequence: 0,
                        journal: VecDeque::new(),
                    }),
                )
            })
            .collect();

        Self {
            sources,
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            journal_capacity: journal_capacity.max(1),
        }
    }

    pub fn publish(&self, source: EventSource, event: EngineEvent) -> EventEnvelope {
        let mut channel = self.channel(source).lock();
        channel.last_sequence += 1;

        let envelope = EventEnvelope {
            source,
            sequence: channel.last_sequence,
            published_at: Utc::now(),
            event,
        };

        channel.journal.push_back(envelope.clone());
        while channel.journal.len() > self.journal_capacity {
            channel.journal.pop_front();
        }

        // Fan out before releasing the source lock so a concurrent publish
        // from the same source cannot overtake this one.
        self.deliver(&envelope);
        envelope
    }

    fn deliver(&self, envelope: &EventEnvelope) {
        let kind = envelope.event.kind();
        let mut disconnected = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter().filter(|s| s.wants(kind)) {
                if subscriber.sender.send(envelope.clone()).is_err() {
                    disconnected.push(subscriber.id);
                }
            }
        }

        if !disconnected.is_empty() {
            self.subscribers.write().retain(|s| !disconnected.contains(&s.id));
            tracing::debug!(pruned = disconnected.len(), "Dropped disconnected subscribers");
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe to a subset of event kinds.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.register(Some(kinds.to_vec()))
    }

    fn register(&self, kinds: Option<Vec<EventKind>>) -> Subscription {
        let (sender, receiver) = channel::unbounded();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        self.subscribers.write().push(Subscriber {
            id,
            kinds: kinds.clone(),
            sender,
        });

        Subscription {
            id,
            kinds,
            receiver,
            last_seen: HashMap::new(),
        }
    }

    /// Journaled envelopes from `source` with a sequence above `after`.
    pub fn replay(&self, source: EventSource, after: u64) -> Vec<EventEnvelope> {
        self.channel(source)
            .lock()
            .journal
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect()
    }

    pub fn last_sequence(&self, source: EventSource) -> u64 {
        self.channel(source).lock().last_sequence
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn channel(&self, source: EventSource) -> &Mutex<SourceChannel> {
        // Every source is inserted in `new`.
        &self.sources[&source]
    }
}

pub struct Subscription {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    receiver: Receiver<EventEnvelope>,
    last_seen: HashMap<EventSource, u64>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        while let Ok(envelope) = self.receiver.try_recv() {
            if self.accept(&envelope) {
                return Some(envelope);
            }
        }
        None
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<EventEnvelope> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(envelope) if self.accept(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Everything currently queued, duplicates removed.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Some(envelope) = self.try_recv() {
            out.push(envelope);
        }
        out
    }

    /// Redeliver journaled events newer than the last one seen per source.
    pub fn catch_up(&mut self, bus: &EventBus) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        for source in EventSource::ALL {
            let after = self.last_seen.get(&source).copied().unwrap_or(0);
            for envelope in bus.replay(source, after) {
                let wanted = self
                    .kinds
                    .as_ref()
                    .map_or(true, |kinds| kinds.contains(&envelope.event.kind()));
                if wanted && self.accept(&envelope) {
                    out.push(envelope);
                }
            }
        }
        out
    }

    pub fn last_seen(&self, source: EventSource) -> u64 {
        self.last_seen.get(&source).copied().unwrap_or(0)
    }

    fn accept(&mut self, envelope: &EventEnvelope) -> bool {
        let seen = self.last_seen.entry(envelope.source).or_insert(0);
        if envelope.sequence <= *seen {
            return false;
        }
        *seen = envelope.sequence;
        true
    }
}
