use dispatch_service::Vehicle;
use shared::types::{Position, VehicleKind};

/// The units shown on the dispatcher dashboard, all in service and available.
pub fn sample_fleet() -> Vec<Vehicle> {
    vec![
        Vehicle::new("A-01", VehicleKind::Ambulance, "Sarah Johnson", Position::new(25.0, 40.0)),
        Vehicle::new("A-02", VehicleKind::Ambulance, "Mike Chen", Position::new(60.0, 25.0)),
        Vehicle::new("A-03", VehicleKind::Ambulance, "Emily Watson", Position::new(40.0, 60.0)),
        Vehicle::new("A-04", VehicleKind::Ambulance, "Lisa Martinez", Position::new(85.0, 80.0)),
        Vehicle::new("F-01", VehicleKind::Firetruck, "Tom Rodriguez", Position::new(45.0, 70.0)),
        Vehicle::new("F-02", VehicleKind::Firetruck, "James Wilson", Position::new(75.0, 40.0)),
    ]
}
