//! Dashboard commands and their outcomes
//!
//! Commands travel as JSON objects tagged by `command`, e.g.
//! `{"command": "dispatch", "incident": "INC-0001"}`.

use dispatch_service::{Assignment, Incident, IncidentReport, Recalculation, RouteSuggestion, Vehicle};
use override_service::OverrideGrant;
use serde::{Deserialize, Serialize};
use shared::types::{CongestionLevel, IncidentId, Position, Route, SegmentId, VehicleId};
use shared::{EngineError, EngineResult};
use uuid::Uuid;

use crate::chat::ChatMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SubmitIncident {
        report: IncidentReport,
    },
    Dispatch {
        incident: IncidentId,
    },
    /// Revoke the vehicle's active override, or request one for its route.
    ToggleOverride {
        vehicle: VehicleId,
    },
    ClearNotification {
        id: Uuid,
    },
    MarkNotificationRead {
        id: Uuid,
    },
    UpdateTraffic {
        segment: SegmentId,
        level: CongestionLevel,
    },
    CloseSegment {
        segment: SegmentId,
    },
    ReopenSegment {
        segment: SegmentId,
    },
    ReportPosition {
        vehicle: VehicleId,
        position: Position,
        speed_mph: f64,
    },
    BeginTransport {
        vehicle: VehicleId,
        destination: Position,
    },
    CompleteIncident {
        incident: IncidentId,
    },
    RecalculateRoute {
        vehicle: VehicleId,
    },
    SendMessage {
        sender: String,
        text: String,
    },
}

impl Command {
    pub fn from_json(raw: &str) -> EngineResult<Self> {
        serde_json::from_str(raw).map_err(|e| EngineError::InvalidMessage(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SubmitIncident { .. } => "submit_incident",
            Command::Dispatch { .. } => "dispatch",
            Command::ToggleOverride { .. } => "toggle_override",
            Command::ClearNotification { .. } => "clear_notification",
            Command::MarkNotificationRead { .. } => "mark_notification_read",
            Command::UpdateTraffic { .. } => "update_traffic",
            Command::CloseSegment { .. } => "close_segment",
            Command::ReopenSegment { .. } => "reopen_segment",
            Command::ReportPosition { .. } => "report_position",
            Command::BeginTransport { .. } => "begin_transport",
            Command::CompleteIncident { .. } => "complete_incident",
            Command::RecalculateRoute { .. } => "recalculate_route",
            Command::SendMessage { .. } => "send_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    IncidentOpened {
        incident: Incident,
    },
    Dispatched {
        assignment: Assignment,
    },
    Override {
        vehicle: VehicleId,
        grant: OverrideGrant,
    },
    NotificationCleared {
        id: Uuid,
    },
    NotificationRead {
        id: Uuid,
    },
    TrafficUpdated {
        version: u64,
        suggestions: Vec<RouteSuggestion>,
    },
    PositionUpdated {
        vehicle: Vehicle,
    },
    TransportStarted {
        vehicle: VehicleId,
        route: Route,
    },
    IncidentClosed {
        incident: Incident,
    },
    RouteRecalculated {
        recalculation: Recalculation,
    },
    MessageSent {
        message: ChatMessage,
    },
}
