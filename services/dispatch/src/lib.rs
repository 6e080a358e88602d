pub mod assigner;
pub mod fleet;
pub mod incidents;
pub mod validation;

#[cfg(test)]
mod tests;

pub use assigner::{Assignment, DispatchAssigner, Recalculation, RouteSuggestion};
pub use fleet::{Fleet, Vehicle};
pub use incidents::{Incident, IncidentRegistry};
pub use validation::{validate_position, validate_report, IncidentReport, ValidatedReport};
