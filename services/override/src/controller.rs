//! Signal preemption control
//!
//! Each route moves Inactive -> Requested -> Active -> Expired | Revoked.
//! An intersection is held by at most one Active route. Activation and
//! release take the per-intersection locks of every intersection involved,
//! always in sorted id order, and give up after the configured timeout.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use shared::bus::{EngineEvent, EventBus, EventSource};
use shared::logger::log_override;
use shared::types::{IntersectionId, OverrideState, RouteId};
use shared::{EngineConfig, EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;

use crate::grant::OverrideGrant;

pub struct OverrideController {
    grants: DashMap<RouteId, OverrideGrant>,
    holders: DashMap<IntersectionId, RouteId>,
    intersection_locks: DashMap<IntersectionId, Arc<Mutex<()>>>,
    duration: chrono::Duration,
    lock_timeout: Duration,
    bus: Arc<EventBus>,
}

impl OverrideController {
    pub fn new(duration: chrono::Duration, lock_timeout: Duration, bus: Arc<EventBus>) -> Self {
        Self {
            grants: DashMap::new(),
            holders: DashMap::new(),
            intersection_locks: DashMap::new(),
            duration,
            lock_timeout,
            bus,
        }
    }

    pub fn from_config(config: &EngineConfig, bus: Arc<EventBus>) -> Self {
        Self::new(config.override_duration(), config.override_lock_timeout(), bus)
    }

    pub fn request(&self, route: RouteId, intersections: Vec<IntersectionId>) -> EngineResult<OverrideGrant> {
        self.request_at(route, intersections, Utc::now())
    }

    /// Move `route` to Active over `intersections`. An already active route
    /// gets its current grant back. Conflicts and lock timeouts leave the
    /// route Inactive.
    pub fn request_at(
        &self,
        route: RouteId,
        intersections: Vec<IntersectionId>,
        now: DateTime<Utc>,
    ) -> EngineResult<OverrideGrant> {
        self.expire_due(now);

        let grant = OverrideGrant::requested(route.clone(), intersections, now);
        match self.grants.entry(route.clone()) {
            Entry::Occupied(mut entry) => match entry.get().state {
                OverrideState::Active => return Ok(entry.get().clone()),
                OverrideState::Requested => {
                    return Err(EngineError::InvalidTransition {
                        route,
                        from: OverrideState::Requested,
                        to: OverrideState::Requested,
                    })
                }
                _ => {
                    entry.insert(grant.clone());
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(grant.clone());
            }
        }
        self.announce(&grant, OverrideState::Inactive);

        let locks = self.locks_for(&grant.intersections);
        let guards = match self.acquire(&locks) {
            Some(guards) => guards,
            None => {
                self.fail_request(&route, now);
                return Err(EngineError::OverrideTimeout { route });
            }
        };

        for intersection in &grant.intersections {
            let holder = self.holders.get(intersection).map(|h| h.value().clone());
            if let Some(holder) = holder {
                if holder != route {
                    drop(guards);
                    self.fail_request(&route, now);
                    return Err(EngineError::OverrideConflict {
                        intersection: intersection.clone(),
                        holder,
                    });
                }
            }
        }

        for intersection in &grant.intersections {
            self.holders.insert(intersection.clone(), route.clone());
        }

        let activated = {
            let mut entry = self
                .grants
                .get_mut(&route)
                .ok_or_else(|| EngineError::RouteNotFound(route.clone()))?;
            entry.state = OverrideState::Active;
            entry.activated_at = Some(now);
            entry.expires_at = Some(now + self.duration);
            entry.clone()
        };
        drop(guards);

        self.announce(&activated, OverrideState::Requested);
        Ok(activated)
    }

    pub fn revoke(&self, route: &RouteId) -> EngineResult<OverrideGrant> {
        self.revoke_at(route, Utc::now())
    }

    pub fn revoke_at(&self, route: &RouteId, now: DateTime<Utc>) -> EngineResult<OverrideGrant> {
        self.release(route, OverrideState::Revoked, now)
    }

    /// Dashboard toggle: revoke an active route, request anything else.
    pub fn toggle(&self, route: RouteId, intersections: Vec<IntersectionId>) -> EngineResult<OverrideGrant> {
        self.toggle_at(route, intersections, Utc::now())
    }

    pub fn toggle_at(
        &self,
        route: RouteId,
        intersections: Vec<IntersectionId>,
        now: DateTime<Utc>,
    ) -> EngineResult<OverrideGrant> {
        if self.state(&route) == OverrideState::Active {
            self.revoke_at(&route, now)
        } else {
            self.request_at(route, intersections, now)
        }
    }

    /// Expire every active grant whose expiry is at or before `now`.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<RouteId> {
        let due: Vec<RouteId> = self
            .grants
            .iter()
            .filter(|g| g.is_due(now))
            .map(|g| g.route.clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for route in due {
            match self.release(&route, OverrideState::Expired, now) {
                Ok(_) => expired.push(route),
                Err(err) => tracing::debug!(route = %route, error = %err, "Skipped expiry"),
            }
        }
        expired
    }

    pub fn grant(&self, route: &RouteId) -> Option<OverrideGrant> {
        self.grants.get(route).map(|g| g.clone())
    }

    pub fn state(&self, route: &RouteId) -> OverrideState {
        self.grants
            .get(route)
            .map(|g| g.state)
            .unwrap_or(OverrideState::Inactive)
    }

    pub fn holder(&self, intersection: &IntersectionId) -> Option<RouteId> {
        self.holders.get(intersection).map(|h| h.value().clone())
    }

    pub fn active_grants(&self) -> Vec<OverrideGrant> {
        let mut active: Vec<OverrideGrant> = self
            .grants
            .iter()
            .filter(|g| g.is_active())
            .map(|g| g.clone())
            .collect();
        active.sort_by(|a, b| a.route.cmp(&b.route));
        active
    }

    pub(crate) fn intersection_lock(&self, intersection: &IntersectionId) -> Arc<Mutex<()>> {
        self.intersection_locks
            .entry(intersection.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn locks_for(&self, intersections: &[IntersectionId]) -> Vec<Arc<Mutex<()>>> {
        intersections.iter().map(|i| self.intersection_lock(i)).collect()
    }

    /// Lock in the given (sorted) order or give up at the first timeout.
    fn acquire<'a>(&self, locks: &'a [Arc<Mutex<()>>]) -> Option<Vec<MutexGuard<'a, ()>>> {
        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.try_lock_for(self.lock_timeout)?);
        }
        Some(guards)
    }

    fn release(&self, route: &RouteId, to: OverrideState, now: DateTime<Utc>) -> EngineResult<OverrideGrant> {
        let intersections = match self.grants.get(route) {
            Some(grant) if grant.is_active() => grant.intersections.clone(),
            Some(grant) => {
                return Err(EngineError::InvalidTransition {
                    route: route.clone(),
                    from: grant.state,
                    to,
                })
            }
            None => return Err(EngineError::RouteNotFound(route.clone())),
        };

        let locks = self.locks_for(&intersections);
        let guards = self
            .acquire(&locks)
            .ok_or_else(|| EngineError::OverrideTimeout { route: route.clone() })?;

        let released = {
            let mut grant = self
                .grants
                .get_mut(route)
                .ok_or_else(|| EngineError::RouteNotFound(route.clone()))?;
            // Another release may have won the locks first
            if !grant.is_active() {
                return Err(EngineError::InvalidTransition {
                    route: route.clone(),
                    from: grant.state,
                    to,
                });
            }
            grant.state = to;
            grant.ended_at = Some(now);
            grant.clone()
        };

        for intersection in &released.intersections {
            self.holders.remove_if(intersection, |_, holder| holder == route);
        }
        drop(guards);

        self.announce(&released, OverrideState::Active);
        Ok(released)
    }

    fn fail_request(&self, route: &RouteId, now: DateTime<Utc>) {
        let failed = self.grants.get_mut(route).and_then(|mut grant| {
            if grant.state != OverrideState::Requested {
                return None;
            }
            grant.state = OverrideState::Inactive;
            grant.ended_at = Some(now);
            Some(grant.clone())
        });

        if let Some(grant) = failed {
            self.announce(&grant, OverrideState::Requested);
        }
    }

    fn announce(&self, grant: &OverrideGrant, from: OverrideState) {
        log_override(&grant.route, from, grant.state, grant.intersections.len());
        self.bus.publish(
            EventSource::Override,
            EngineEvent::OverrideChanged {
                route: grant.route.clone(),
                state: grant.state,
                intersections: grant.intersections.clone(),
            },
        );
    }
}
