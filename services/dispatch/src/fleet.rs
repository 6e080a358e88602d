use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::types::{IncidentId, Position, VehicleId, VehicleKind, VehicleStatus};
use shared::{EngineError, EngineResult};

use crate::validation::validate_position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub kind: VehicleKind,
    pub driver: String,
    pub position: Position,
    pub status: VehicleStatus,
    pub assigned_incident: Option<IncidentId>,
    pub speed_mph: f64,
    pub destination: Option<Position>,
    /// Miles left on the current route.
    pub distance_to_destination: Option<f64>,
}

impl Vehicle {
    pub fn new(id: impl Into<VehicleId>, kind: VehicleKind, driver: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            kind,
            driver: driver.into(),
            position,
            status: VehicleStatus::Available,
            assigned_incident: None,
            speed_mph: 0.0,
            destination: None,
            distance_to_destination: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == VehicleStatus::Available
    }
}

/// Every vehicle in service, keyed by id. Status changes happen under the
/// vehicle's map entry lock so two claims on one vehicle cannot both win.
pub struct Fleet {
    vehicles: DashMap<VehicleId, Vehicle>,
    miles_per_unit: f64,
}

impl Fleet {
    pub fn new(miles_per_unit: f64) -> Self {
        Self {
            vehicles: DashMap::new(),
            miles_per_unit,
        }
    }

    pub fn register(&self, vehicle: Vehicle) -> EngineResult<()> {
        match self.vehicles.entry(vehicle.id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateVehicle(vehicle.id)),
            Entry::Vacant(entry) => {
                tracing::info!(vehicle = %vehicle.id, kind = ?vehicle.kind, "Vehicle registered");
                entry.insert(vehicle);
                Ok(())
            }
        }
    }

    pub fn vehicle(&self, id: &VehicleId) -> EngineResult<Vehicle> {
        self.vehicles
            .get(id)
            .map(|v| v.clone())
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))
    }

    /// All vehicles ordered by id.
    pub fn vehicles(&self) -> Vec<Vehicle> {
        let mut all: Vec<Vehicle> = self.vehicles.iter().map(|v| v.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn available(&self) -> Vec<Vehicle> {
        let mut available: Vec<Vehicle> = self
            .vehicles
            .iter()
            .filter(|v| v.is_available())
            .map(|v| v.clone())
            .collect();
        available.sort_by(|a, b| a.id.cmp(&b.id));
        available
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Position feed. Distance to destination is refreshed as the crow flies.
    pub fn update_position(&self, id: &VehicleId, position: Position, speed_mph: f64) -> EngineResult<Vehicle> {
        let position = validate_position("position", position)?;
        let mut vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))?;

        vehicle.position = position;
        vehicle.speed_mph = if speed_mph.is_finite() { speed_mph.max(0.0) } else { 0.0 };
        vehicle.distance_to_destination = vehicle
            .destination
            .map(|dest| dest.distance_to(&position) * self.miles_per_unit);
        Ok(vehicle.clone())
    }

    /// Available -> Responding, or `UnitUnavailable` if someone got there first.
    pub fn try_claim(
        &self,
        id: &VehicleId,
        incident: &IncidentId,
        destination: Position,
        distance_miles: f64,
    ) -> EngineResult<Vehicle> {
        let mut vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))?;

        if !vehicle.is_available() {
            return Err(EngineError::UnitUnavailable {
                vehicle: id.clone(),
                status: vehicle.status,
            });
        }

        vehicle.status = VehicleStatus::Responding;
        vehicle.assigned_incident = Some(incident.clone());
        vehicle.destination = Some(destination);
        vehicle.distance_to_destination = Some(distance_miles);
        Ok(vehicle.clone())
    }

    /// Responding -> Enroute towards a new destination.
    pub fn start_transport(&self, id: &VehicleId, destination: Position, distance_miles: f64) -> EngineResult<Vehicle> {
        let mut vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))?;

        if vehicle.status != VehicleStatus::Responding {
            return Err(EngineError::UnitUnavailable {
                vehicle: id.clone(),
                status: vehicle.status,
            });
        }

        vehicle.status = VehicleStatus::Enroute;
        vehicle.destination = Some(destination);
        vehicle.distance_to_destination = Some(distance_miles);
        Ok(vehicle.clone())
    }

    /// Back to Available. Returns the status the vehicle had.
    pub fn release(&self, id: &VehicleId) -> EngineResult<(VehicleStatus, Vehicle)> {
        let mut vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))?;

        let previous = vehicle.status;
        vehicle.status = VehicleStatus::Available;
        vehicle.assigned_incident = None;
        vehicle.destination = None;
        vehicle.distance_to_destination = None;
        Ok((previous, vehicle.clone()))
    }

    pub fn set_distance(&self, id: &VehicleId, distance_miles: f64) -> EngineResult<()> {
        let mut vehicle = self
            .vehicles
            .get_mut(id)
            .ok_or_else(|| EngineError::VehicleNotFound(id.clone()))?;
        vehicle.distance_to_destination = Some(distance_miles);
        Ok(())
    }

    /// (deployed, available)
    pub fn counts(&self) -> (usize, usize) {
        let available = self.vehicles.iter().filter(|v| v.is_available()).count();
        (self.vehicles.len().saturating_sub(available), available)
    }
}
