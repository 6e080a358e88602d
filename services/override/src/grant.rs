use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::types::{IntersectionId, OverrideState, RouteId};

/// Signal preemption for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideGrant {
    pub route: RouteId,
    /// Sorted and free of duplicates.
    pub intersections: Vec<IntersectionId>,
    pub state: OverrideState,
    pub requested_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl OverrideGrant {
    pub fn requested(route: RouteId, mut intersections: Vec<IntersectionId>, now: DateTime<Utc>) -> Self {
        intersections.sort();
        intersections.dedup();
        Self {
            route,
            intersections,
            state: OverrideState::Requested,
            requested_at: now,
            activated_at: None,
            expires_at: None,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == OverrideState::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.map_or(false, |at| at <= now)
    }

    /// Seconds of preemption left, zero unless active.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        match (self.is_active(), self.expires_at) {
            (true, Some(at)) => (at - now).num_seconds().max(0),
            _ => 0,
        }
    }
}
