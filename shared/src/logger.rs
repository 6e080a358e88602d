//! Logging utilities

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{IncidentId, OverrideState, RouteId, VehicleId};

const MAX_LOGGED_TEXT: usize = 64;

/// Initialize the global subscriber. `format` is `json` or `pretty`;
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logger(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if format == "pretty" {
        builder.pretty().try_init()
    } else {
        builder.json().try_init()
    };

    if let Err(err) = result {
        eprintln!("logger already initialized: {}", err);
    }
}

/// Log a completed dispatch
pub fn log_dispatch(incident: &IncidentId, vehicle: &VehicleId, eta_minutes: f64, distance_miles: f64) {
    info!(
        incident = %incident,
        vehicle = %vehicle,
        eta_minutes = eta_minutes,
        distance_miles = distance_miles,
        "Unit dispatched"
    );
}

/// Log an override transition
pub fn log_override(route: &RouteId, from: OverrideState, to: OverrideState, intersections: usize) {
    if to == OverrideState::Inactive && from == OverrideState::Requested {
        warn!(route = %route, from = %from, to = %to, intersections, "Override request failed");
    } else {
        info!(route = %route, from = %from, to = %to, intersections, "Override changed");
    }
}

/// Log any serializable record as a single JSON field.
pub fn log_record<T: Serialize>(label: &str, record: &T) {
    debug!(
        record = %serde_json::to_string(record).unwrap_or_default(),
        "{}", label
    );
}

/// Truncate free text from reports and chat before it reaches the logs.
pub fn sanitize_for_log(value: &str) -> String {
    let single_line: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    if single_line.chars().count() <= MAX_LOGGED_TEXT {
        return single_line;
    }
    let truncated: String = single_line.chars().take(MAX_LOGGED_TEXT).collect();
    format!("{}...", truncated)
}
