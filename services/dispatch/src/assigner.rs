//! Dispatch assignment
//!
//! One assignment per incident at a time, enforced by a per-incident lock.
//! Claiming a vehicle is a compare-and-swap on its fleet entry; losing the
//! race moves on to the next-ranked vehicle. Transport and recalculation take
//! the lock of the incident the vehicle serves, so they cannot interleave with
//! its completion.
//!
//! Every dispatched route gets an id of its own, so two vehicles sent down the
//! same streets never share a signal override.

use dashmap::DashMap;
use notifications_service::{NotificationCenter, NotificationKind, Priority};
use parking_lot::Mutex;
use routing_service::{CongestionSnapshot, RouteScorer, TrafficMonitor};
use serde::{Deserialize, Serialize};
use shared::bus::{EngineEvent, EventBus, EventSource};
use shared::logger::log_dispatch;
use shared::types::{IncidentId, IncidentStatus, Position, Route, RouteId, VehicleId, VehicleStatus};
use shared::{EngineConfig, EngineError, EngineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::fleet::{Fleet, Vehicle};
use crate::incidents::{Incident, IncidentRegistry};
use crate::validation::validate_position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub incident: IncidentId,
    pub vehicle: VehicleId,
    /// The recommended route the vehicle was dispatched on.
    pub route: Route,
    /// Full ranking for the chosen vehicle, recommended entry included.
    pub alternatives: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recalculation {
    pub vehicle: VehicleId,
    pub previous: Route,
    pub route: Route,
}

impl Recalculation {
    /// Positive when the new route is faster.
    pub fn minutes_saved(&self) -> f64 {
        self.previous.eta_minutes - self.route.eta_minutes
    }
}

/// A faster route than the one a vehicle was dispatched on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSuggestion {
    pub vehicle: VehicleId,
    /// The dispatched route scored against current traffic, `None` when it
    /// now crosses a closed segment.
    pub current: Option<Route>,
    pub suggested: Route,
}

struct Candidate {
    vehicle: Vehicle,
    route: Route,
    ranked: Vec<Route>,
}

pub struct DispatchAssigner {
    fleet: Arc<Fleet>,
    incidents: Arc<IncidentRegistry>,
    scorer: Arc<RouteScorer>,
    traffic: Arc<TrafficMonitor>,
    notifications: Arc<NotificationCenter>,
    bus: Arc<EventBus>,
    dispatched: DashMap<VehicleId, Route>,
    incident_locks: DashMap<IncidentId, Arc<Mutex<()>>>,
    max_dispatch_radius: f64,
    match_unit_kind: bool,
    routes_optimized: AtomicU64,
    dispatch_seq: AtomicU64,
}

impl DispatchAssigner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fleet: Arc<Fleet>,
        incidents: Arc<IncidentRegistry>,
        scorer: Arc<RouteScorer>,
        traffic: Arc<TrafficMonitor>,
        notifications: Arc<NotificationCenter>,
        bus: Arc<EventBus>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            fleet,
            incidents,
            scorer,
            traffic,
            notifications,
            bus,
            dispatched: DashMap::new(),
            incident_locks: DashMap::new(),
            max_dispatch_radius: config.max_dispatch_radius,
            match_unit_kind: config.match_unit_kind,
            routes_optimized: AtomicU64::new(0),
            dispatch_seq: AtomicU64::new(0),
        }
    }

    /// Assign the best available vehicle to an open incident.
    ///
    /// Vehicles are ordered by the ETA of their recommended route, then its
    /// distance, then vehicle id.
    pub fn assign(&self, incident_id: &IncidentId) -> EngineResult<Assignment> {
        let lock = self.incident_lock(incident_id);
        let _guard = lock.lock();

        let incident = self
            .incidents
            .get(incident_id)
            .map_err(|err| self.retire_lock(incident_id, err))?;
        if incident.status != IncidentStatus::Open {
            if incident.status == IncidentStatus::Closed {
                self.incident_locks.remove(incident_id);
            }
            return Err(EngineError::IncidentNotOpen {
                incident: incident.id,
                status: incident.status,
            });
        }

        let snapshot = self.traffic.snapshot();
        let candidates = self.rank_candidates(&incident, &snapshot);

        for candidate in candidates {
            match self.fleet.try_claim(
                &candidate.vehicle.id,
                &incident.id,
                incident.location,
                candidate.route.distance_miles,
            ) {
                Ok(_) => return self.complete_assignment(&incident, candidate),
                Err(EngineError::UnitUnavailable { vehicle, status }) => {
                    debug!(incident = %incident.id, vehicle = %vehicle, status = %status, "Lost claim, trying next unit");
                }
                Err(err) => return Err(err),
            }
        }

        Err(EngineError::NoAvailableUnit {
            incident: incident.id,
        })
    }

    /// Responding vehicle leaves the scene for `destination`.
    pub fn begin_transport(&self, vehicle_id: &VehicleId, destination: Position) -> EngineResult<Route> {
        let destination = validate_position("destination", destination)?;
        self.with_serving_lock(vehicle_id, |vehicle| {
            if vehicle.status != VehicleStatus::Responding {
                return Err(EngineError::UnitUnavailable {
                    vehicle: vehicle.id,
                    status: vehicle.status,
                });
            }

            let snapshot = self.traffic.snapshot();
            let route = self.scorer.best(vehicle.position, destination, &snapshot)?;
            let route = self.stamp(vehicle_id, route);
            let updated = self
                .fleet
                .start_transport(vehicle_id, destination, route.distance_miles)?;

            self.dispatched.insert(vehicle_id.clone(), route.clone());
            self.routes_optimized.fetch_add(1, Ordering::Relaxed);

            info!(vehicle = %vehicle_id, destination = %destination, eta_minutes = route.eta_minutes, "Transport started");
            self.publish_status(vehicle_id, VehicleStatus::Responding, VehicleStatus::Enroute, updated.assigned_incident);
            self.publish_route(vehicle_id, &route);
            Ok(route)
        })
    }

    /// Close an incident and put its vehicle back in service.
    pub fn complete(&self, incident_id: &IncidentId) -> EngineResult<Incident> {
        let lock = self.incident_lock(incident_id);
        let _guard = lock.lock();

        let incident = self
            .incidents
            .close(incident_id)
            .map_err(|err| self.retire_lock(incident_id, err))?;
        self.incident_locks.remove(incident_id);
        if let Some(vehicle_id) = &incident.assigned_vehicle {
            let (previous, _) = self.fleet.release(vehicle_id)?;
            self.dispatched.remove(vehicle_id);
            self.publish_status(vehicle_id, previous, VehicleStatus::Available, None);
        }

        info!(incident = %incident.id, vehicle = ?incident.assigned_vehicle.as_ref().map(|v| v.as_str()), "Incident closed");
        Ok(incident)
    }

    /// Re-score a dispatched route from the vehicle's current position.
    pub fn recalculate(&self, vehicle_id: &VehicleId) -> EngineResult<Recalculation> {
        self.with_serving_lock(vehicle_id, |vehicle| {
            if !matches!(vehicle.status, VehicleStatus::Responding | VehicleStatus::Enroute) {
                return Err(EngineError::UnitUnavailable {
                    vehicle: vehicle.id,
                    status: vehicle.status,
                });
            }
            let previous = self.dispatched_route_of(&vehicle)?;
            let destination = vehicle
                .destination
                .or_else(|| previous.destination())
                .ok_or_else(|| EngineError::UnitUnavailable {
                    vehicle: vehicle.id.clone(),
                    status: vehicle.status,
                })?;

            let snapshot = self.traffic.snapshot();
            let route = self.scorer.best(vehicle.position, destination, &snapshot)?;
            let route = self.stamp(vehicle_id, route);

            self.dispatched.insert(vehicle_id.clone(), route.clone());
            self.fleet.set_distance(vehicle_id, route.distance_miles)?;
            self.routes_optimized.fetch_add(1, Ordering::Relaxed);

            let recalculation = Recalculation {
                vehicle: vehicle_id.clone(),
                previous,
                route,
            };
            self.notifications.post(
                NotificationKind::Route,
                Priority::Low,
                "Route Updated",
                describe_recalculation(&recalculation),
            );
            self.publish_route(vehicle_id, &recalculation.route);
            Ok(recalculation)
        })
    }

    /// Compare every dispatched route with a fresh ranking from the same
    /// origin. Dispatched routes are left untouched.
    pub fn review_routes(&self, snapshot: &CongestionSnapshot) -> Vec<RouteSuggestion> {
        let mut dispatched: Vec<(VehicleId, Route)> = self
            .dispatched
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        dispatched.sort_by(|a, b| a.0.cmp(&b.0));

        let mut suggestions = Vec::new();
        for (vehicle, route) in dispatched {
            let (Some(origin), Some(destination)) = (route.origin(), route.destination()) else {
                continue;
            };
            let ranked = match self.scorer.rank(origin, destination, snapshot) {
                Ok(ranked) => ranked,
                Err(err) => {
                    debug!(vehicle = %vehicle, error = %err, "No alternative for dispatched route");
                    continue;
                }
            };

            // Dispatched ids are per vehicle, so match the fresh ranking on path
            let current = ranked.iter().find(|r| r.waypoints == route.waypoints).cloned();
            let Some(best) = ranked.into_iter().find(|r| r.recommended) else {
                continue;
            };
            if best.waypoints == route.waypoints {
                continue;
            }
            let faster = current
                .as_ref()
                .map_or(true, |c| best.eta_minutes < c.eta_minutes);
            if faster {
                suggestions.push(RouteSuggestion {
                    vehicle,
                    current,
                    suggested: best,
                });
            }
        }
        suggestions
    }

    pub fn route_for(&self, vehicle: &VehicleId) -> Option<Route> {
        self.dispatched.get(vehicle).map(|r| r.clone())
    }

    pub fn routes_optimized(&self) -> u64 {
        self.routes_optimized.load(Ordering::Relaxed)
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn incidents(&self) -> &Arc<IncidentRegistry> {
        &self.incidents
    }

    fn rank_candidates(&self, incident: &Incident, snapshot: &CongestionSnapshot) -> Vec<Candidate> {
        let required = incident.kind.required_unit().filter(|_| self.match_unit_kind);

        let mut candidates: Vec<Candidate> = self
            .fleet
            .available()
            .into_iter()
            .filter(|v| v.position.distance_to(&incident.location) <= self.max_dispatch_radius)
            .filter(|v| required.map_or(true, |kind| v.kind == kind))
            .filter_map(|vehicle| {
                let ranked = match self.scorer.rank(vehicle.position, incident.location, snapshot) {
                    Ok(ranked) => ranked,
                    Err(err) => {
                        debug!(vehicle = %vehicle.id, error = %err, "Skipping unreachable unit");
                        return None;
                    }
                };
                let route = ranked.iter().find(|r| r.recommended).cloned()?;
                Some(Candidate { vehicle, route, ranked })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.route
                .eta_minutes
                .total_cmp(&b.route.eta_minutes)
                .then_with(|| a.route.distance_miles.total_cmp(&b.route.distance_miles))
                .then_with(|| a.vehicle.id.cmp(&b.vehicle.id))
        });
        candidates
    }

    fn complete_assignment(&self, incident: &Incident, candidate: Candidate) -> EngineResult<Assignment> {
        let vehicle_id = candidate.vehicle.id.clone();
        let route = self.stamp(&vehicle_id, candidate.route);

        if let Err(err) = self
            .incidents
            .mark_assigned(&incident.id, &vehicle_id, route.eta_minutes)
        {
            self.fleet.release(&vehicle_id)?;
            return Err(err);
        }

        self.dispatched.insert(vehicle_id.clone(), route.clone());
        self.routes_optimized.fetch_add(1, Ordering::Relaxed);

        log_dispatch(&incident.id, &vehicle_id, route.eta_minutes, route.distance_miles);
        self.notifications.post(
            NotificationKind::Responder,
            Priority::Medium,
            "Unit Dispatched",
            format!(
                "{} responding to {} via {}. ETA {:.0} min, {:.1} mi.",
                vehicle_id, incident.id, route.label, route.eta_minutes, route.distance_miles
            ),
        );
        self.publish_status(
            &vehicle_id,
            VehicleStatus::Available,
            VehicleStatus::Responding,
            Some(incident.id.clone()),
        );
        self.publish_route(&vehicle_id, &route);

        Ok(Assignment {
            incident: incident.id.clone(),
            vehicle: vehicle_id,
            route,
            alternatives: candidate.ranked,
        })
    }

    fn dispatched_route_of(&self, vehicle: &Vehicle) -> EngineResult<Route> {
        self.dispatched
            .get(&vehicle.id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::UnitUnavailable {
                vehicle: vehicle.id.clone(),
                status: vehicle.status,
            })
    }

    /// Run `f` on a fresh read of the vehicle while holding the lock of the
    /// incident it serves. A vehicle whose incident changed while waiting is
    /// reported unavailable.
    fn with_serving_lock<T>(
        &self,
        vehicle_id: &VehicleId,
        f: impl FnOnce(Vehicle) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let vehicle = self.fleet.vehicle(vehicle_id)?;
        let Some(incident) = vehicle.assigned_incident.clone() else {
            return f(vehicle);
        };

        let lock = self.incident_lock(&incident);
        let _guard = lock.lock();
        let vehicle = self.fleet.vehicle(vehicle_id)?;
        if vehicle.assigned_incident.as_ref() != Some(&incident) {
            let closed = self
                .incidents
                .get(&incident)
                .map_or(true, |i| i.status == IncidentStatus::Closed);
            if closed {
                self.incident_locks.remove(&incident);
            }
            return Err(EngineError::UnitUnavailable {
                vehicle: vehicle.id,
                status: vehicle.status,
            });
        }
        f(vehicle)
    }

    /// Give a scored route an id unique to this dispatch.
    fn stamp(&self, vehicle: &VehicleId, route: Route) -> Route {
        let seq = self.dispatch_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Route {
            id: RouteId::new(format!("{}@{}#{}", route.id, vehicle, seq)),
            ..route
        }
    }

    /// Missing and closed incidents never need their lock again.
    fn retire_lock(&self, incident: &IncidentId, err: EngineError) -> EngineError {
        self.incident_locks.remove(incident);
        err
    }

    #[cfg(test)]
    pub(crate) fn incident_lock_count(&self) -> usize {
        self.incident_locks.len()
    }

    fn incident_lock(&self, incident: &IncidentId) -> Arc<Mutex<()>> {
        self.incident_locks
            .entry(incident.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn publish_status(
        &self,
        vehicle: &VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
        incident: Option<IncidentId>,
    ) {
        self.bus.publish(
            EventSource::Dispatch,
            EngineEvent::VehicleStatusChanged {
                vehicle: vehicle.clone(),
                from,
                to,
                incident,
            },
        );
    }

    fn publish_route(&self, vehicle: &VehicleId, route: &Route) {
        self.bus.publish(
            EventSource::Dispatch,
            EngineEvent::RouteUpdated {
                vehicle: vehicle.clone(),
                route: route.clone(),
            },
        );
    }
}

fn describe_recalculation(recalculation: &Recalculation) -> String {
    let saved = recalculation.minutes_saved();
    let change = if saved >= 0.5 {
        format!("ETA reduced by {:.0} minutes.", saved)
    } else if saved <= -0.5 {
        format!("ETA increased by {:.0} minutes.", -saved)
    } else {
        "ETA unchanged.".to_string()
    };
    format!("Optimal route recalculated for {}. {}", recalculation.vehicle, change)
}
