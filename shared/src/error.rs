use crate::types::{
    IncidentId, IncidentStatus, IntersectionId, OverrideState, Position, RouteId, VehicleId,
    VehicleStatus,
};
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("No available unit for incident {incident}")]
    NoAvailableUnit { incident: IncidentId },
    #[error("Intersection {intersection} already under override for route {holder}")]
    OverrideConflict {
        intersection: IntersectionId,
        holder: RouteId,
    },
    #[error("Override request for route {route} timed out")]
    OverrideTimeout { route: RouteId },
    #[error("No route from {from} to {to}")]
    RouteUnreachable { from: Position, to: Position },
    #[error("Invalid incident report: {field} {reason}")]
    InvalidReport { field: &'static str, reason: String },
    #[error("Vehicle {0} not found")]
    VehicleNotFound(VehicleId),
    #[error("Incident {0} not found")]
    IncidentNotFound(IncidentId),
    #[error("Notification {0} not found")]
    NotificationNotFound(Uuid),
    #[error("Route {0} not found")]
    RouteNotFound(RouteId),
    #[error("Vehicle {0} is already registered")]
    DuplicateVehicle(VehicleId),
    #[error("Vehicle {vehicle} is {status}")]
    UnitUnavailable {
        vehicle: VehicleId,
        status: VehicleStatus,
    },
    #[error("Incident {incident} is {status}")]
    IncidentNotOpen {
        incident: IncidentId,
        status: IncidentStatus,
    },
    #[error("Override for route {route} cannot move from {from} to {to}")]
    InvalidTransition {
        route: RouteId,
        from: OverrideState,
        to: OverrideState,
    },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Everything except configuration failures is surfaced to the
    /// dispatcher and the engine keeps running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Config(_))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
