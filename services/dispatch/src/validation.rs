//! Incident report validation
//!
//! Reports arrive as the raw strings the dispatcher typed into the form.

use serde::{Deserialize, Serialize};
use shared::types::{IncidentKind, Position, Severity};
use shared::{EngineError, EngineResult};

pub const MAX_DESCRIPTION_CHARS: usize = 2000;
const MAP_EXTENT: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub kind: String,
    pub location: String,
    pub severity: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReport {
    pub kind: IncidentKind,
    pub location: Position,
    pub severity: Severity,
    pub description: String,
}

pub fn validate_report(report: &IncidentReport) -> EngineResult<ValidatedReport> {
    let kind = parse_kind(&report.kind)?;
    let location = parse_location(&report.location)?;
    let severity = parse_severity(&report.severity)?;

    let description = report.description.trim();
    if description.is_empty() {
        return Err(invalid("description", "is required"));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(invalid(
            "description",
            format!("exceeds {} characters", MAX_DESCRIPTION_CHARS),
        ));
    }

    Ok(ValidatedReport {
        kind,
        location,
        severity,
        description: description.to_string(),
    })
}

fn parse_kind(raw: &str) -> EngineResult<IncidentKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "medical" => Ok(IncidentKind::Medical),
        "fire" => Ok(IncidentKind::Fire),
        "accident" => Ok(IncidentKind::Accident),
        "hazard" => Ok(IncidentKind::Hazard),
        "other" => Ok(IncidentKind::Other),
        "" => Err(invalid("kind", "is required")),
        other => Err(invalid("kind", format!("'{}' is not a known incident type", other))),
    }
}

fn parse_severity(raw: &str) -> EngineResult<Severity> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" => Ok(Severity::Critical),
        "high" => Ok(Severity::High),
        "medium" => Ok(Severity::Medium),
        "low" => Ok(Severity::Low),
        "" => Err(invalid("severity", "is required")),
        other => Err(invalid("severity", format!("'{}' is not a known severity", other))),
    }
}

/// "x,y" in map units, both within the map.
fn parse_location(raw: &str) -> EngineResult<Position> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid("location", "is required"));
    }

    let mut parts = raw.split(',');
    let (x, y) = match (parts.next(), parts.next(), parts.next()) {
        (Some(x), Some(y), None) => (parse_coordinate(x)?, parse_coordinate(y)?),
        _ => return Err(invalid("location", "must be 'x,y' coordinates")),
    };
    Ok(Position::new(x, y))
}

fn parse_coordinate(raw: &str) -> EngineResult<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("location", format!("'{}' is not a number", raw.trim())))?;
    check_coordinate("location", value)
}

/// Reported vehicle positions and transport destinations must lie on the map.
pub fn validate_position(field: &'static str, position: Position) -> EngineResult<Position> {
    check_coordinate(field, position.x)?;
    check_coordinate(field, position.y)?;
    Ok(position)
}

fn check_coordinate(field: &'static str, value: f64) -> EngineResult<f64> {
    if !value.is_finite() || !(0.0..=MAP_EXTENT).contains(&value) {
        return Err(invalid(field, format!("{} is outside the map", value)));
    }
    Ok(value)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidReport {
        field,
        reason: reason.into(),
    }
}
