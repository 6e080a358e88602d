use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::types::{CongestionLevel, SegmentId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Point-in-time traffic conditions. Mutations return a new snapshot with the
/// next version; a snapshot is never changed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionSnapshot {
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    levels: BTreeMap<SegmentId, CongestionLevel>,
    closed: BTreeSet<SegmentId>,
}

impl CongestionSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            taken_at: Utc::now(),
            levels: BTreeMap::new(),
            closed: BTreeSet::new(),
        }
    }

    /// Unreported segments are light.
    pub fn level(&self, segment: &SegmentId) -> CongestionLevel {
        self.levels.get(segment).copied().unwrap_or(CongestionLevel::Light)
    }

    pub fn is_closed(&self, segment: &SegmentId) -> bool {
        self.closed.contains(segment)
    }

    pub fn congested_segments(&self) -> impl Iterator<Item = (&SegmentId, &CongestionLevel)> {
        self.levels.iter()
    }

    pub fn closed_segments(&self) -> impl Iterator<Item = &SegmentId> {
        self.closed.iter()
    }

    pub fn with_level(&self, segment: SegmentId, level: CongestionLevel) -> Self {
        let mut next = self.next();
        if level == CongestionLevel::Light {
            next.levels.remove(&segment);
        } else {
            next.levels.insert(segment, level);
        }
        next
    }

    pub fn with_closed(&self, segment: SegmentId) -> Self {
        let mut next = self.next();
        next.closed.insert(segment);
        next
    }

    pub fn with_reopened(&self, segment: &SegmentId) -> Self {
        let mut next = self.next();
        next.closed.remove(segment);
        next
    }

    fn next(&self) -> Self {
        Self {
            version: self.version + 1,
            taken_at: Utc::now(),
            levels: self.levels.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl Default for CongestionSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Holds the live snapshot. Readers get an `Arc` to a stable version.
pub struct TrafficMonitor {
    current: RwLock<Arc<CongestionSnapshot>>,
}

impl TrafficMonitor {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CongestionSnapshot::empty())),
        }
    }

    pub fn snapshot(&self) -> Arc<CongestionSnapshot> {
        self.current.read().clone()
    }

    pub fn set_level(&self, segment: SegmentId, level: CongestionLevel) -> Arc<CongestionSnapshot> {
        tracing::debug!(segment = %segment, level = %level, "Traffic level reported");
        self.update(|snapshot| snapshot.with_level(segment, level))
    }

    pub fn close_segment(&self, segment: SegmentId) -> Arc<CongestionSnapshot> {
        tracing::info!(segment = %segment, "Segment closed");
        self.update(|snapshot| snapshot.with_closed(segment))
    }

    pub fn reopen_segment(&self, segment: &SegmentId) -> Arc<CongestionSnapshot> {
        tracing::info!(segment = %segment, "Segment reopened");
        self.update(|snapshot| snapshot.with_reopened(segment))
    }

    fn update(&self, mutate: impl FnOnce(&CongestionSnapshot) -> CongestionSnapshot) -> Arc<CongestionSnapshot> {
        let mut current = self.current.write();
        let next = Arc::new(mutate(&current));
        *current = next.clone();
        next
    }
}

impl Default for TrafficMonitor {
    fn default() -> Self {
        Self::new()
    }
}
