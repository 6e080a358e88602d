use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::bus::{EngineEvent, EventBus, EventSource};
use shared::logger::sanitize_for_log;
use shared::types::{IncidentId, IncidentKind, IncidentStatus, Position, Severity, VehicleId};
use shared::{EngineError, EngineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::validation::{validate_report, IncidentReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub kind: IncidentKind,
    pub location: Position,
    pub severity: Severity,
    pub description: String,
    pub status: IncidentStatus,
    pub assigned_vehicle: Option<VehicleId>,
    /// ETA of the dispatched route at assignment time.
    pub response_minutes: Option<f64>,
    pub reported_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

pub struct IncidentRegistry {
    incidents: DashMap<IncidentId, Incident>,
    next_id: AtomicU64,
    bus: Arc<EventBus>,
}

impl IncidentRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            incidents: DashMap::new(),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    /// Validate a raw report and open an incident for it.
    pub fn submit(&self, report: &IncidentReport) -> EngineResult<Incident> {
        let valid = validate_report(report)?;
        let id = IncidentId::new(format!("INC-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst)));

        let incident = Incident {
            id: id.clone(),
            kind: valid.kind,
            location: valid.location,
            severity: valid.severity,
            description: valid.description,
            status: IncidentStatus::Open,
            assigned_vehicle: None,
            response_minutes: None,
            reported_at: Utc::now(),
            assigned_at: None,
            closed_at: None,
        };
        self.incidents.insert(id.clone(), incident.clone());

        tracing::info!(
            incident = %id,
            kind = ?incident.kind,
            severity = ?incident.severity,
            location = %incident.location,
            description = %sanitize_for_log(&incident.description),
            "Incident reported"
        );
        self.bus.publish(
            EventSource::Incidents,
            EngineEvent::IncidentReported {
                incident: id,
                kind: incident.kind,
                severity: incident.severity,
                location: incident.location,
            },
        );
        Ok(incident)
    }

    pub fn get(&self, id: &IncidentId) -> EngineResult<Incident> {
        self.incidents
            .get(id)
            .map(|i| i.clone())
            .ok_or_else(|| EngineError::IncidentNotFound(id.clone()))
    }

    /// All incidents ordered by id.
    pub fn all(&self) -> Vec<Incident> {
        let mut all: Vec<Incident> = self.incidents.iter().map(|i| i.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn open(&self) -> Vec<Incident> {
        self.all()
            .into_iter()
            .filter(|i| i.status == IncidentStatus::Open)
            .collect()
    }

    /// Open -> Assigned.
    pub fn mark_assigned(&self, id: &IncidentId, vehicle: &VehicleId, response_minutes: f64) -> EngineResult<Incident> {
        let mut incident = self
            .incidents
            .get_mut(id)
            .ok_or_else(|| EngineError::IncidentNotFound(id.clone()))?;

        if incident.status != IncidentStatus::Open {
            return Err(EngineError::IncidentNotOpen {
                incident: id.clone(),
                status: incident.status,
            });
        }

        incident.status = IncidentStatus::Assigned;
        incident.assigned_vehicle = Some(vehicle.clone());
        incident.response_minutes = Some(response_minutes);
        incident.assigned_at = Some(Utc::now());
        Ok(incident.clone())
    }

    /// Open or Assigned -> Closed.
    pub fn close(&self, id: &IncidentId) -> EngineResult<Incident> {
        let mut incident = self
            .incidents
            .get_mut(id)
            .ok_or_else(|| EngineError::IncidentNotFound(id.clone()))?;

        if incident.status == IncidentStatus::Closed {
            return Err(EngineError::IncidentNotOpen {
                incident: id.clone(),
                status: incident.status,
            });
        }

        incident.status = IncidentStatus::Closed;
        incident.closed_at = Some(Utc::now());
        Ok(incident.clone())
    }

    /// Incidents not yet closed.
    pub fn active_count(&self) -> usize {
        self.incidents
            .iter()
            .filter(|i| i.status != IncidentStatus::Closed)
            .count()
    }

    /// Mean dispatched ETA over every incident that got a unit.
    pub fn average_response_minutes(&self) -> Option<f64> {
        let (total, count) = self
            .incidents
            .iter()
            .filter_map(|i| i.response_minutes)
            .fold((0.0, 0usize), |(total, count), minutes| (total + minutes, count + 1));

        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }
}
