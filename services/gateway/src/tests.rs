//! Tests for the dispatch engine command API

use chrono::{Duration, Utc};
use dispatch_service::IncidentReport;
use notifications_service::NotificationKind;
use routing_service::GridRoadGraph;
use shared::types::{CongestionLevel, IncidentId, OverrideState, Position, VehicleId, VehicleStatus};
use shared::{EngineConfig, EngineError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chat::MAX_MESSAGE_CHARS;
use crate::command::{Command, Outcome};
use crate::engine::DispatchEngine;
use crate::runtime::{run_ticks, spawn_event_logger};
use crate::sample::sample_fleet;

fn engine() -> DispatchEngine {
    let engine = DispatchEngine::from_config(EngineConfig::default());
    engine
        .fleet()
        .register(dispatch_service::Vehicle::new(
            "A-01",
            shared::types::VehicleKind::Ambulance,
            "Sarah Johnson",
            Position::new(0.0, 0.0),
        ))
        .unwrap();
    engine
}

fn submit(engine: &DispatchEngine, location: &str) -> IncidentId {
    let outcome = engine
        .handle(Command::SubmitIncident {
            report: IncidentReport {
                kind: "medical".to_string(),
                location: location.to_string(),
                severity: "critical".to_string(),
                description: "Unconscious driver".to_string(),
            },
        })
        .unwrap();
    match outcome {
        Outcome::IncidentOpened { incident } => incident.id,
        other => panic!("unexpected outcome {:?}", other),
    }
}

fn dispatch(engine: &DispatchEngine, incident: &IncidentId) {
    engine
        .handle(Command::Dispatch {
            incident: incident.clone(),
        })
        .unwrap();
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_submit_and_dispatch() {
    let engine = engine();
    let incident = submit(&engine, "30,0");

    let outcome = engine
        .handle(Command::Dispatch {
            incident: incident.clone(),
        })
        .unwrap();

    let Outcome::Dispatched { assignment } = outcome else {
        panic!("expected dispatch");
    };
    assert_eq!(assignment.vehicle.as_str(), "A-01");
    assert!(assignment.route.recommended);
    assert_eq!(assignment.alternatives.len(), 3);

    let stats = engine.stats();
    assert_eq!(stats.active_incidents, 1);
    assert_eq!(stats.units_deployed, 1);
    assert_eq!(stats.units_available, 0);
    assert_eq!(stats.routes_optimized, 1);
    assert!((stats.average_response_minutes.unwrap() - 3.0).abs() < 1e-9);
}

#[test]
fn test_errors_become_notifications() {
    let engine = engine();
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);
    let second = submit(&engine, "50,50");

    let err = engine
        .handle(Command::Dispatch {
            incident: second.clone(),
        })
        .unwrap_err();

    assert_eq!(err, EngineError::NoAvailableUnit { incident: second });
    let drawer = engine.notifications().snapshot();
    let latest = &drawer.items()[0];
    assert_eq!(latest.kind, NotificationKind::Alert);
    assert_eq!(latest.title, "No Unit Available");
}

#[test]
fn test_bad_report_is_rejected() {
    let engine = engine();
    let err = engine
        .handle(Command::SubmitIncident {
            report: IncidentReport {
                kind: "fire".to_string(),
                location: "Oak Street".to_string(),
                severity: "high".to_string(),
                description: "Smoke".to_string(),
            },
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidReport { field: "location", .. }));
    assert!(engine.incidents().all().is_empty());
}

#[test]
fn test_json_commands() {
    let engine = engine();
    let outcome = engine
        .handle_json(r#"{"command": "send_message", "sender": "Command Center", "text": "A-01, proceed via Route A."}"#)
        .unwrap();
    assert!(matches!(outcome, Outcome::MessageSent { .. }));
    assert_eq!(engine.chat().len(), 1);
    assert_eq!(engine.chat().messages()[0].sender, "Command Center");

    let err = engine.handle_json(r#"{"command": "launch_rocket"}"#).unwrap_err();
    assert!(matches!(err, EngineError::InvalidMessage(_)));
}

#[test]
fn test_off_map_positions_rejected() {
    let engine = engine();
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);

    let err = engine
        .handle_json(r#"{"command": "report_position", "vehicle": "A-01", "position": {"x": -1e300, "y": 0.0}, "speed_mph": 30.0}"#)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidReport { field: "position", .. }));
    assert_eq!(engine.fleet().vehicle(&VehicleId::new("A-01")).unwrap().position, Position::new(0.0, 0.0));

    let err = engine
        .handle(Command::BeginTransport {
            vehicle: VehicleId::new("A-01"),
            destination: Position::new(f64::INFINITY, 10.0),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidReport { field: "destination", .. }));

    let outcome = engine
        .handle(Command::RecalculateRoute {
            vehicle: VehicleId::new("A-01"),
        })
        .unwrap();
    assert!(matches!(outcome, Outcome::RouteRecalculated { .. }));
}

#[test]
fn test_command_json_shape() {
    let command = Command::UpdateTraffic {
        segment: "S-0-0-1-0".into(),
        level: CongestionLevel::Heavy,
    };
    let json = serde_json::to_value(&command).unwrap();

    assert_eq!(json["command"], "update_traffic");
    assert_eq!(json["level"], "heavy");
    assert_eq!(Command::from_json(&json.to_string()).unwrap(), command);
}

#[test]
fn test_chat_validation() {
    let engine = engine();
    let too_long = "x".repeat(MAX_MESSAGE_CHARS + 1);

    for (sender, text) in [("You", "   "), ("", "hello"), ("You", too_long.as_str())] {
        let err = engine
            .handle(Command::SendMessage {
                sender: sender.to_string(),
                text: text.to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMessage(_)));
    }
    assert!(engine.chat().is_empty());
}

#[test]
fn test_notification_commands() {
    let engine = engine();
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);
    let id = engine.notifications().snapshot().items()[0].id;

    engine.handle(Command::MarkNotificationRead { id }).unwrap();
    assert_eq!(engine.notifications().unread_count(), 0);

    engine.handle(Command::ClearNotification { id }).unwrap();
    assert!(engine.notifications().snapshot().get(id).is_none());

    let err = engine.handle(Command::ClearNotification { id }).unwrap_err();
    assert_eq!(err, EngineError::NotificationNotFound(id));
}

// ============================================================================
// Traffic
// ============================================================================

#[test]
fn test_traffic_change_suggests_but_keeps_route() {
    let engine = engine();
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);
    let vehicle = VehicleId::new("A-01");
    let dispatched = engine.assigner().route_for(&vehicle).unwrap();

    let mut last = None;
    for (a, b) in [((0, 0), (1, 0)), ((1, 0), (2, 0)), ((2, 0), (3, 0))] {
        last = Some(
            engine
                .handle(Command::UpdateTraffic {
                    segment: GridRoadGraph::segment_between(a, b),
                    level: CongestionLevel::Heavy,
                })
                .unwrap(),
        );
    }

    let Some(Outcome::TrafficUpdated { version, suggestions }) = last else {
        panic!("expected traffic outcome");
    };
    assert_eq!(version, 3);
    assert_eq!(suggestions.len(), 1);
    assert_eq!(engine.assigner().route_for(&vehicle), Some(dispatched));

    let drawer = engine.notifications().snapshot();
    let latest = &drawer.items()[0];
    assert_eq!(latest.kind, NotificationKind::Congestion);
    assert_eq!(latest.title, "Heavy Traffic Detected");
    assert!(latest.message.contains("Consider Route A for A-01"));
}

#[test]
fn test_close_and_reopen_segment() {
    let engine = engine();
    let segment = GridRoadGraph::segment_between((1, 0), (2, 0));

    engine
        .handle(Command::CloseSegment {
            segment: segment.clone(),
        })
        .unwrap();
    assert!(engine.traffic().snapshot().is_closed(&segment));

    engine.handle(Command::ReopenSegment { segment: segment.clone() }).unwrap();
    assert!(!engine.traffic().snapshot().is_closed(&segment));
}

// ============================================================================
// Vehicle lifecycle and overrides
// ============================================================================

#[test]
fn test_toggle_override_for_dispatched_vehicle() {
    let engine = engine();
    let vehicle = VehicleId::new("A-01");

    let err = engine
        .handle(Command::ToggleOverride {
            vehicle: vehicle.clone(),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnitUnavailable { .. }));

    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);

    let on = engine
        .handle(Command::ToggleOverride {
            vehicle: vehicle.clone(),
        })
        .unwrap();
    let Outcome::Override { grant, .. } = on else {
        panic!("expected override");
    };
    assert_eq!(grant.state, OverrideState::Active);
    assert_eq!(engine.stats().active_overrides, 1);

    let off = engine
        .handle(Command::ToggleOverride { vehicle })
        .unwrap();
    let Outcome::Override { grant, .. } = off else {
        panic!("expected override");
    };
    assert_eq!(grant.state, OverrideState::Revoked);
    assert_eq!(engine.stats().active_overrides, 0);
}

#[test]
fn test_units_on_same_streets_hold_separate_overrides() {
    let engine = engine();
    engine
        .fleet()
        .register(dispatch_service::Vehicle::new(
            "A-02",
            shared::types::VehicleKind::Ambulance,
            "Mike Chen",
            Position::new(0.0, 0.0),
        ))
        .unwrap();
    let first = submit(&engine, "30,0");
    let second = submit(&engine, "30,0");
    dispatch(&engine, &first);
    dispatch(&engine, &second);

    engine
        .handle(Command::ToggleOverride {
            vehicle: VehicleId::new("A-01"),
        })
        .unwrap();
    let err = engine
        .handle(Command::ToggleOverride {
            vehicle: VehicleId::new("A-02"),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::OverrideConflict { .. }));
    assert_eq!(engine.stats().active_overrides, 1);

    engine
        .handle(Command::CompleteIncident { incident: first })
        .unwrap();
    assert_eq!(engine.stats().active_overrides, 0);

    let outcome = engine
        .handle(Command::ToggleOverride {
            vehicle: VehicleId::new("A-02"),
        })
        .unwrap();
    match outcome {
        Outcome::Override { vehicle, grant } => {
            assert_eq!(vehicle.as_str(), "A-02");
            assert_eq!(grant.state, OverrideState::Active);
            assert_eq!(Some(grant.route), engine.assigner().route_for(&vehicle).map(|r| r.id));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_tick_expires_overrides() {
    let engine = engine();
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);
    let start = Utc::now();

    engine
        .handle_at(
            Command::ToggleOverride {
                vehicle: "A-01".into(),
            },
            start,
        )
        .unwrap();

    assert!(engine.tick(start + Duration::seconds(60)).is_empty());
    let expired = engine.tick(start + Duration::seconds(120));
    assert_eq!(expired.len(), 1);
    assert_eq!(engine.stats().active_overrides, 0);
    assert_eq!(engine.notifications().snapshot().items()[0].title, "Signal Override Expired");
}

#[test]
fn test_full_vehicle_lifecycle() {
    let engine = engine();
    let vehicle = VehicleId::new("A-01");
    let incident = submit(&engine, "30,0");
    dispatch(&engine, &incident);
    engine
        .handle(Command::ToggleOverride {
            vehicle: vehicle.clone(),
        })
        .unwrap();

    engine
        .handle(Command::ReportPosition {
            vehicle: vehicle.clone(),
            position: Position::new(30.0, 0.0),
            speed_mph: 0.0,
        })
        .unwrap();
    engine
        .handle(Command::BeginTransport {
            vehicle: vehicle.clone(),
            destination: Position::new(70.0, 60.0),
        })
        .unwrap();
    assert_eq!(engine.fleet().vehicle(&vehicle).unwrap().status, VehicleStatus::Enroute);

    let recalculated = engine
        .handle(Command::RecalculateRoute {
            vehicle: vehicle.clone(),
        })
        .unwrap();
    assert!(matches!(recalculated, Outcome::RouteRecalculated { .. }));

    engine
        .handle(Command::CompleteIncident {
            incident: incident.clone(),
        })
        .unwrap();

    let unit = engine.fleet().vehicle(&vehicle).unwrap();
    assert!(unit.is_available());
    assert_eq!(engine.stats().active_overrides, 0);
    assert_eq!(engine.stats().active_incidents, 0);
}

// ============================================================================
// Runtime
// ============================================================================

#[test]
fn test_sample_fleet_registers() {
    let engine = DispatchEngine::from_config(EngineConfig::default());
    for vehicle in sample_fleet() {
        engine.fleet().register(vehicle).unwrap();
    }

    assert_eq!(engine.fleet().len(), 6);
    assert_eq!(engine.stats().units_available, 6);
}

#[tokio::test]
async fn test_run_ticks_stops_on_shutdown() {
    let engine = Arc::new(engine());
    let ticks = run_ticks(
        engine,
        std::time::Duration::from_millis(10),
        tokio::time::sleep(std::time::Duration::from_millis(55)),
    )
    .await;

    assert!(ticks >= 1);
}

#[test]
fn test_run_ticks_with_ready_shutdown() {
    let engine = Arc::new(engine());
    // The first interval tick completes immediately, shutdown may win the race
    let ticks = tokio_test::block_on(run_ticks(engine, std::time::Duration::from_secs(60), async {}));
    assert!(ticks <= 1);
}

#[test]
fn test_event_logger_counts_events() {
    let engine = engine();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_event_logger(engine.bus().subscribe(), stop.clone());

    submit(&engine, "10,10");
    engine
        .handle(Command::SendMessage {
            sender: "You".to_string(),
            text: "Copy that. ETA 4 minutes.".to_string(),
        })
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));
    stop.store(true, Ordering::Relaxed);

    assert_eq!(handle.join().unwrap(), 2);
}
