//! Dispatch engine
//!
//! Wires the services together behind a single command API. Recoverable
//! errors are returned to the caller and also posted to the notification
//! drawer; nothing a dispatcher sends can take the engine down.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dispatch_service::{DispatchAssigner, Fleet, IncidentRegistry, RouteSuggestion};
use notifications_service::{NotificationCenter, NotificationKind, Priority};
use override_service::OverrideController;
use routing_service::{CongestionSnapshot, GridRoadGraph, RoadGraph, RouteScorer, TrafficMonitor};
use serde::Serialize;
use shared::types::{CongestionLevel, OverrideState, RouteId, VehicleId};
use shared::{EngineConfig, EngineError, EngineResult, EventBus};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chat::ChatLog;
use crate::command::{Command, Outcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub active_incidents: usize,
    pub units_deployed: usize,
    pub units_available: usize,
    pub average_response_minutes: Option<f64>,
    pub routes_optimized: u64,
    pub active_overrides: usize,
    pub unread_notifications: usize,
}

pub struct DispatchEngine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    fleet: Arc<Fleet>,
    incidents: Arc<IncidentRegistry>,
    traffic: Arc<TrafficMonitor>,
    notifications: Arc<NotificationCenter>,
    overrides: OverrideController,
    assigner: DispatchAssigner,
    chat: ChatLog,
    /// Route each vehicle currently holds an override for.
    vehicle_overrides: DashMap<VehicleId, RouteId>,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig, graph: Arc<dyn RoadGraph>) -> Self {
        let bus = Arc::new(EventBus::new(config.event_journal_capacity));
        let fleet = Arc::new(Fleet::new(config.miles_per_unit));
        let incidents = Arc::new(IncidentRegistry::new(bus.clone()));
        let traffic = Arc::new(TrafficMonitor::new());
        let notifications = Arc::new(NotificationCenter::new(config.notification_capacity, bus.clone()));
        let scorer = Arc::new(RouteScorer::from_config(graph, &config));

        let assigner = DispatchAssigner::new(
            fleet.clone(),
            incidents.clone(),
            scorer,
            traffic.clone(),
            notifications.clone(),
            bus.clone(),
            &config,
        );

        Self {
            overrides: OverrideController::from_config(&config, bus.clone()),
            chat: ChatLog::new(bus.clone()),
            config,
            bus,
            fleet,
            incidents,
            traffic,
            notifications,
            assigner,
            vehicle_overrides: DashMap::new(),
        }
    }

    /// Engine over the uniform city grid described by `config`.
    pub fn from_config(config: EngineConfig) -> Self {
        let graph = Arc::new(GridRoadGraph::from_config(&config));
        Self::new(config, graph)
    }

    pub fn handle(&self, command: Command) -> EngineResult<Outcome> {
        self.handle_at(command, Utc::now())
    }

    pub fn handle_at(&self, command: Command, now: DateTime<Utc>) -> EngineResult<Outcome> {
        let name = command.name();
        match self.execute(command, now) {
            Ok(outcome) => {
                debug!(command = name, "Command handled");
                Ok(outcome)
            }
            Err(err) => Err(self.reject(name, err)),
        }
    }

    /// Parse and handle a JSON command.
    pub fn handle_json(&self, raw: &str) -> EngineResult<Outcome> {
        match Command::from_json(raw) {
            Ok(command) => self.handle(command),
            Err(err) => Err(self.reject("parse", err)),
        }
    }

    /// Periodic housekeeping: expire overrides whose time is up.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<RouteId> {
        let expired = self.overrides.expire_due(now);
        if expired.is_empty() {
            return expired;
        }

        self.vehicle_overrides.retain(|_, route| !expired.contains(route));
        for route in &expired {
            self.notifications.post(
                NotificationKind::Alert,
                Priority::Low,
                "Signal Override Expired",
                format!("Signal preemption for {} has ended.", route),
            );
        }
        info!(expired = expired.len(), "Overrides expired");
        expired
    }

    pub fn stats(&self) -> DashboardStats {
        let (units_deployed, units_available) = self.fleet.counts();
        DashboardStats {
            active_incidents: self.incidents.active_count(),
            units_deployed,
            units_available,
            average_response_minutes: self.incidents.average_response_minutes(),
            routes_optimized: self.assigner.routes_optimized(),
            active_overrides: self.overrides.active_grants().len(),
            unread_notifications: self.notifications.unread_count(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn incidents(&self) -> &Arc<IncidentRegistry> {
        &self.incidents
    }

    pub fn traffic(&self) -> &Arc<TrafficMonitor> {
        &self.traffic
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn overrides(&self) -> &OverrideController {
        &self.overrides
    }

    pub fn assigner(&self) -> &DispatchAssigner {
        &self.assigner
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    fn execute(&self, command: Command, now: DateTime<Utc>) -> EngineResult<Outcome> {
        match command {
            Command::SubmitIncident { report } => {
                let incident = self.incidents.submit(&report)?;
                Ok(Outcome::IncidentOpened { incident })
            }
            Command::Dispatch { incident } => {
                let assignment = self.assigner.assign(&incident)?;
                Ok(Outcome::Dispatched { assignment })
            }
            Command::ToggleOverride { vehicle } => self.toggle_override(vehicle, now),
            Command::ClearNotification { id } => {
                self.notifications.clear(id)?;
                Ok(Outcome::NotificationCleared { id })
            }
            Command::MarkNotificationRead { id } => {
                self.notifications.mark_read(id)?;
                Ok(Outcome::NotificationRead { id })
            }
            Command::UpdateTraffic { segment, level } => {
                let snapshot = self.traffic.set_level(segment, level);
                Ok(self.traffic_changed(&snapshot))
            }
            Command::CloseSegment { segment } => {
                let snapshot = self.traffic.close_segment(segment);
                Ok(self.traffic_changed(&snapshot))
            }
            Command::ReopenSegment { segment } => {
                let snapshot = self.traffic.reopen_segment(&segment);
                Ok(self.traffic_changed(&snapshot))
            }
            Command::ReportPosition {
                vehicle,
                position,
                speed_mph,
            } => {
                let vehicle = self.fleet.update_position(&vehicle, position, speed_mph)?;
                Ok(Outcome::PositionUpdated { vehicle })
            }
            Command::BeginTransport { vehicle, destination } => {
                let route = self.assigner.begin_transport(&vehicle, destination)?;
                Ok(Outcome::TransportStarted { vehicle, route })
            }
            Command::CompleteIncident { incident } => {
                let incident = self.assigner.complete(&incident)?;
                if let Some(vehicle) = &incident.assigned_vehicle {
                    self.release_override(vehicle, now);
                }
                Ok(Outcome::IncidentClosed { incident })
            }
            Command::RecalculateRoute { vehicle } => {
                let recalculation = self.assigner.recalculate(&vehicle)?;
                Ok(Outcome::RouteRecalculated { recalculation })
            }
            Command::SendMessage { sender, text } => {
                let message = self.chat.post(&sender, &text)?;
                Ok(Outcome::MessageSent { message })
            }
        }
    }

    fn toggle_override(&self, vehicle: VehicleId, now: DateTime<Utc>) -> EngineResult<Outcome> {
        let held = self.vehicle_overrides.get(&vehicle).map(|r| r.value().clone());
        if let Some(route) = held {
            if self.overrides.state(&route) == OverrideState::Active {
                let grant = self.overrides.revoke_at(&route, now)?;
                self.vehicle_overrides.remove(&vehicle);
                return Ok(Outcome::Override { vehicle, grant });
            }
            self.vehicle_overrides.remove(&vehicle);
        }

        let unit = self.fleet.vehicle(&vehicle)?;
        let route = self
            .assigner
            .route_for(&vehicle)
            .ok_or_else(|| EngineError::UnitUnavailable {
                vehicle: vehicle.clone(),
                status: unit.status,
            })?;

        let grant = self
            .overrides
            .request_at(route.id.clone(), route.intersections.clone(), now)?;
        self.vehicle_overrides.insert(vehicle.clone(), route.id);
        Ok(Outcome::Override { vehicle, grant })
    }

    fn release_override(&self, vehicle: &VehicleId, now: DateTime<Utc>) {
        let Some((_, route)) = self.vehicle_overrides.remove(vehicle) else {
            return;
        };
        if self.overrides.state(&route) != OverrideState::Active {
            return;
        }
        if let Err(err) = self.overrides.revoke_at(&route, now) {
            warn!(vehicle = %vehicle, route = %route, error = %err, "Could not release override");
        }
    }

    fn traffic_changed(&self, snapshot: &CongestionSnapshot) -> Outcome {
        let suggestions = self.assigner.review_routes(snapshot);
        for suggestion in &suggestions {
            self.suggest(suggestion);
        }

        info!(
            version = snapshot.version,
            suggestions = suggestions.len(),
            "Traffic updated"
        );
        Outcome::TrafficUpdated {
            version: snapshot.version,
            suggestions,
        }
    }

    fn suggest(&self, suggestion: &RouteSuggestion) {
        let better = &suggestion.suggested;
        let (title, priority, problem) = match &suggestion.current {
            None => (
                "Road Closed",
                Priority::High,
                format!("Dispatched route for {} crosses a closed road.", suggestion.vehicle),
            ),
            Some(current) if current.congestion == CongestionLevel::Heavy => (
                "Heavy Traffic Detected",
                Priority::High,
                format!(
                    "Heavy congestion on the dispatched route for {} ({:.0} min).",
                    suggestion.vehicle, current.eta_minutes
                ),
            ),
            Some(current) => (
                "Faster Route Available",
                Priority::Medium,
                format!(
                    "Dispatched route for {} now takes {:.0} min.",
                    suggestion.vehicle, current.eta_minutes
                ),
            ),
        };

        self.notifications.post(
            NotificationKind::Congestion,
            priority,
            title,
            format!(
                "{} Consider {} for {} ({:.0} min, {} traffic).",
                problem, better.label, suggestion.vehicle, better.eta_minutes, better.congestion
            ),
        );
    }

    fn reject(&self, command: &str, err: EngineError) -> EngineError {
        warn!(command = command, error = %err, "Command rejected");
        self.notifications.post_error(&err);
        err
    }
}
