//! Tests for the fleet, incident registry and dispatch assignment

use notifications_service::{NotificationCenter, NotificationKind};
use routing_service::{CandidatePath, GridRoadGraph, Leg, RoadGraph, RouteScorer, TrafficMonitor};
use shared::bus::{EngineEvent, EventBus, EventKind, EventSource};
use shared::types::{
    CongestionLevel, IncidentStatus, Position, VehicleId, VehicleKind, VehicleStatus,
};
use shared::{EngineConfig, EngineError};
use std::sync::{Arc, Barrier};
use std::thread;

use crate::assigner::DispatchAssigner;
use crate::fleet::{Fleet, Vehicle};
use crate::incidents::IncidentRegistry;
use crate::validation::IncidentReport;

/// Road graph with one fixed-time path per origin. Origins listed as
/// unreachable get no path at all.
struct FixedEtaGraph {
    etas: Vec<(Position, f64)>,
    unreachable: Vec<Position>,
}

impl RoadGraph for FixedEtaGraph {
    fn candidate_paths(&self, origin: Position, destination: Position) -> Vec<CandidatePath> {
        if self.unreachable.contains(&origin) {
            return Vec::new();
        }
        let minutes = self
            .etas
            .iter()
            .find(|(p, _)| *p == origin)
            .map(|(_, m)| *m)
            .unwrap_or(30.0);

        vec![CandidatePath {
            label: "fixed".to_string(),
            waypoints: vec![origin, destination],
            intersections: Vec::new(),
            legs: vec![Leg {
                segment: None,
                miles: minutes / 2.0,
                free_flow_minutes: minutes,
            }],
        }]
    }
}

struct Harness {
    bus: Arc<EventBus>,
    fleet: Arc<Fleet>,
    incidents: Arc<IncidentRegistry>,
    notifications: Arc<NotificationCenter>,
    traffic: Arc<TrafficMonitor>,
    assigner: DispatchAssigner,
}

fn harness(graph: Arc<dyn RoadGraph>, config: EngineConfig) -> Harness {
    let bus = Arc::new(EventBus::new(config.event_journal_capacity));
    let fleet = Arc::new(Fleet::new(config.miles_per_unit));
    let incidents = Arc::new(IncidentRegistry::new(bus.clone()));
    let notifications = Arc::new(NotificationCenter::new(config.notification_capacity, bus.clone()));
    let traffic = Arc::new(TrafficMonitor::new());
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
    Harness {
        bus,
        fleet,
        incidents,
        notifications,
        traffic,
        assigner,
    }
}

fn fixed(etas: &[((f64, f64), f64)]) -> Arc<dyn RoadGraph> {
    Arc::new(FixedEtaGraph {
        etas: etas.iter().map(|((x, y), m)| (Position::new(*x, *y), *m)).collect(),
        unreachable: Vec::new(),
    })
}

fn grid() -> Arc<dyn RoadGraph> {
    Arc::new(GridRoadGraph::new(10.0, 0.05, 30.0))
}

fn report(kind: &str, location: &str) -> IncidentReport {
    IncidentReport {
        kind: kind.to_string(),
        location: location.to_string(),
        severity: "high".to_string(),
        description: "Reported by caller".to_string(),
    }
}

fn ambulance(id: &str, x: f64, y: f64) -> Vehicle {
    Vehicle::new(id, VehicleKind::Ambulance, "Driver", Position::new(x, y))
}

// ============================================================================
// Fleet
// ============================================================================

#[test]
fn test_register_rejects_duplicate_id() {
    let fleet = Fleet::new(0.05);
    fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();

    let err = fleet.register(ambulance("A-01", 5.0, 5.0)).unwrap_err();
    assert_eq!(err, EngineError::DuplicateVehicle("A-01".into()));
    assert_eq!(fleet.len(), 1);
}

#[test]
fn test_update_position_refreshes_distance() {
    let fleet = Fleet::new(0.05);
    fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    fleet
        .try_claim(&"A-01".into(), &"INC-0001".into(), Position::new(30.0, 40.0), 3.5)
        .unwrap();

    let moved = fleet
        .update_position(&"A-01".into(), Position::new(0.0, 40.0), 42.0)
        .unwrap();

    assert_eq!(moved.speed_mph, 42.0);
    assert!((moved.distance_to_destination.unwrap() - 1.5).abs() < 1e-9);
}

#[test]
fn test_claim_is_exclusive_under_contention() {
    let fleet = Arc::new(Fleet::new(0.05));
    fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let fleet = fleet.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                fleet
                    .try_claim(
                        &"A-01".into(),
                        &format!("INC-{:04}", i).as_str().into(),
                        Position::new(1.0, 1.0),
                        1.0,
                    )
                    .is_ok()
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
    assert_eq!(fleet.counts(), (1, 0));
}

// ============================================================================
// Incident registry
// ============================================================================

#[test]
fn test_submit_assigns_sequential_ids_and_publishes() {
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe_to(&[EventKind::IncidentReported]);
    let registry = IncidentRegistry::new(bus);

    let first = registry.submit(&report("medical", "35,55")).unwrap();
    let second = registry.submit(&report("fire", "75,40")).unwrap();

    assert_eq!(first.id.as_str(), "INC-0001");
    assert_eq!(second.id.as_str(), "INC-0002");
    assert_eq!(first.status, IncidentStatus::Open);

    let received = events.drain();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].source, EventSource::Incidents);
}

#[test]
fn test_invalid_report_opens_nothing() {
    let registry = IncidentRegistry::new(Arc::new(EventBus::new(64)));

    let err = registry.submit(&report("medical", "Broadway & 8th")).unwrap_err();

    assert!(matches!(err, EngineError::InvalidReport { field: "location", .. }));
    assert!(registry.all().is_empty());
}

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn test_fastest_unit_is_assigned() {
    let h = harness(fixed(&[((30.0, 50.0), 4.0), ((40.0, 60.0), 6.0)]), EngineConfig::default());
    h.fleet.register(ambulance("A-03", 40.0, 60.0)).unwrap();
    h.fleet.register(ambulance("A-01", 30.0, 50.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "35,55")).unwrap();

    let assignment = h.assigner.assign(&incident.id).unwrap();

    assert_eq!(assignment.vehicle.as_str(), "A-01");
    assert!((assignment.route.eta_minutes - 4.0).abs() < 1e-9);

    let vehicle = h.fleet.vehicle(&"A-01".into()).unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Responding);
    assert_eq!(vehicle.assigned_incident, Some(incident.id.clone()));
    assert_eq!(vehicle.destination, Some(Position::new(35.0, 55.0)));

    let stored = h.incidents.get(&incident.id).unwrap();
    assert_eq!(stored.status, IncidentStatus::Assigned);
    assert_eq!(stored.assigned_vehicle, Some(VehicleId::new("A-01")));
    assert_eq!(h.fleet.vehicle(&"A-03".into()).unwrap().status, VehicleStatus::Available);
}

#[test]
fn test_equal_eta_goes_to_lowest_vehicle_id() {
    let h = harness(fixed(&[((10.0, 10.0), 5.0), ((20.0, 20.0), 5.0)]), EngineConfig::default());
    h.fleet.register(ambulance("A-02", 10.0, 10.0)).unwrap();
    h.fleet.register(ambulance("A-01", 20.0, 20.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "15,15")).unwrap();

    assert_eq!(h.assigner.assign(&incident.id).unwrap().vehicle.as_str(), "A-01");
}

#[test]
fn test_units_outside_radius_are_ignored() {
    let config = EngineConfig {
        max_dispatch_radius: 20.0,
        ..EngineConfig::default()
    };
    let h = harness(fixed(&[((90.0, 90.0), 1.0)]), config);
    h.fleet.register(ambulance("A-01", 90.0, 90.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "10,10")).unwrap();

    let err = h.assigner.assign(&incident.id).unwrap_err();

    assert_eq!(err, EngineError::NoAvailableUnit { incident: incident.id.clone() });
    assert_eq!(h.incidents.get(&incident.id).unwrap().status, IncidentStatus::Open);
}

#[test]
fn test_unreachable_unit_is_skipped() {
    let graph = Arc::new(FixedEtaGraph {
        etas: vec![(Position::new(30.0, 30.0), 9.0)],
        unreachable: vec![Position::new(12.0, 12.0)],
    });
    let h = harness(graph, EngineConfig::default());
    h.fleet.register(ambulance("A-01", 12.0, 12.0)).unwrap();
    h.fleet.register(ambulance("A-02", 30.0, 30.0)).unwrap();
    let incident = h.incidents.submit(&report("accident", "10,10")).unwrap();

    assert_eq!(h.assigner.assign(&incident.id).unwrap().vehicle.as_str(), "A-02");
}

#[test]
fn test_busy_unit_is_not_assigned_twice() {
    let h = harness(fixed(&[]), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
    let first = h.incidents.submit(&report("medical", "12,12")).unwrap();
    let second = h.incidents.submit(&report("medical", "14,14")).unwrap();

    h.assigner.assign(&first.id).unwrap();
    let err = h.assigner.assign(&second.id).unwrap_err();

    assert_eq!(err, EngineError::NoAvailableUnit { incident: second.id });
}

#[test]
fn test_assigned_incident_cannot_be_assigned_again() {
    let h = harness(fixed(&[]), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
    h.fleet.register(ambulance("A-02", 11.0, 11.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();

    h.assigner.assign(&incident.id).unwrap();
    let err = h.assigner.assign(&incident.id).unwrap_err();

    assert_eq!(
        err,
        EngineError::IncidentNotOpen {
            incident: incident.id,
            status: IncidentStatus::Assigned,
        }
    );
}

#[test]
fn test_unit_kind_matching_is_opt_in() {
    let etas = [((10.0, 10.0), 2.0), ((30.0, 30.0), 8.0)];
    let register = |h: &Harness| {
        h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
        h.fleet
            .register(Vehicle::new("F-01", VehicleKind::Firetruck, "Tom Rodriguez", Position::new(30.0, 30.0)))
            .unwrap();
    };

    let loose = harness(fixed(&etas), EngineConfig::default());
    register(&loose);
    let fire = loose.incidents.submit(&report("fire", "20,20")).unwrap();
    assert_eq!(loose.assigner.assign(&fire.id).unwrap().vehicle.as_str(), "A-01");

    let strict = harness(
        fixed(&etas),
        EngineConfig {
            match_unit_kind: true,
            ..EngineConfig::default()
        },
    );
    register(&strict);
    let fire = strict.incidents.submit(&report("fire", "20,20")).unwrap();
    assert_eq!(strict.assigner.assign(&fire.id).unwrap().vehicle.as_str(), "F-01");
}

#[test]
fn test_dispatch_publishes_and_notifies() {
    let h = harness(fixed(&[]), EngineConfig::default());
    let mut events = h.bus.subscribe_to(&[EventKind::VehicleStatusChanged, EventKind::RouteUpdated]);
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();

    h.assigner.assign(&incident.id).unwrap();

    let received = events.drain();
    assert_eq!(received.len(), 2);
    assert!(matches!(
        &received[0].event,
        EngineEvent::VehicleStatusChanged { to: VehicleStatus::Responding, .. }
    ));
    assert!(matches!(&received[1].event, EngineEvent::RouteUpdated { .. }));
    assert!(received[0].sequence < received[1].sequence);

    let log = h.notifications.snapshot();
    assert_eq!(log.len(), 1);
    assert_eq!(log.items()[0].kind, NotificationKind::Responder);
    assert_eq!(h.assigner.routes_optimized(), 1);
}

#[test]
fn test_concurrent_assignment_never_double_books() {
    let h = Arc::new(harness(fixed(&[]), EngineConfig::default()));
    for i in 0..3 {
        h.fleet.register(ambulance(&format!("A-0{}", i + 1), 10.0 + i as f64, 10.0)).unwrap();
    }
    let ids: Vec<_> = (0..6)
        .map(|i| h.incidents.submit(&report("medical", &format!("{},20", 10 + i))).unwrap().id)
        .collect();
    let barrier = Arc::new(Barrier::new(ids.len()));

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                h.assigner.assign(&id).ok().map(|a| a.vehicle)
            })
        })
        .collect();

    let mut assigned: Vec<VehicleId> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();
    assigned.sort();
    let before = assigned.len();
    assigned.dedup();

    assert_eq!(before, 3);
    assert_eq!(assigned.len(), 3);
}

// ============================================================================
// After dispatch
// ============================================================================

#[test]
fn test_complete_releases_vehicle() {
    let h = harness(fixed(&[]), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();
    h.assigner.assign(&incident.id).unwrap();
    assert!(h.incidents.open().is_empty());

    let closed = h.assigner.complete(&incident.id).unwrap();

    assert_eq!(closed.status, IncidentStatus::Closed);
    let vehicle = h.fleet.vehicle(&"A-01".into()).unwrap();
    assert!(vehicle.is_available());
    assert_eq!(vehicle.assigned_incident, None);
    assert!(h.assigner.route_for(&"A-01".into()).is_none());
    assert_eq!(h.fleet.vehicles(), vec![vehicle]);

    assert!(matches!(
        h.assigner.complete(&incident.id).unwrap_err(),
        EngineError::IncidentNotOpen { status: IncidentStatus::Closed, .. }
    ));
}

#[test]
fn test_begin_transport_requires_responding_unit() {
    let h = harness(fixed(&[]), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();

    let err = h
        .assigner
        .begin_transport(&"A-01".into(), Position::new(70.0, 60.0))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::UnitUnavailable {
            vehicle: "A-01".into(),
            status: VehicleStatus::Available,
        }
    );

    let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();
    h.assigner.assign(&incident.id).unwrap();
    let route = h
        .assigner
        .begin_transport(&"A-01".into(), Position::new(70.0, 60.0))
        .unwrap();

    let vehicle = h.fleet.vehicle(&"A-01".into()).unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Enroute);
    assert_eq!(vehicle.destination, Some(Position::new(70.0, 60.0)));
    assert_eq!(h.assigner.route_for(&"A-01".into()), Some(route));
}

#[test]
fn test_recalculate_picks_up_new_traffic() {
    let h = harness(grid(), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "30,0")).unwrap();
    let assignment = h.assigner.assign(&incident.id).unwrap();
    assert!(assignment.route.id.as_str().starts_with("R/xy/"));

    for (a, b) in [((0, 0), (1, 0)), ((1, 0), (2, 0)), ((2, 0), (3, 0))] {
        h.traffic
            .set_level(GridRoadGraph::segment_between(a, b), CongestionLevel::Heavy);
    }
    let recalculation = h.assigner.recalculate(&"A-01".into()).unwrap();

    assert!(recalculation.route.id.as_str().starts_with("R/detour-north/"));
    assert!((recalculation.route.eta_minutes - 5.0).abs() < 1e-9);
    assert!((recalculation.minutes_saved() + 2.0).abs() < 1e-9);
    assert_eq!(h.assigner.route_for(&"A-01".into()), Some(recalculation.route.clone()));

    let drawer = h.notifications.snapshot();
    let latest = &drawer.items()[0];
    assert_eq!(latest.kind, NotificationKind::Route);
    assert_eq!(latest.message, "Optimal route recalculated for A-01. ETA increased by 2 minutes.");
}

#[test]
fn test_review_suggests_without_changing_dispatch() {
    let h = harness(grid(), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "30,0")).unwrap();
    let dispatched = h.assigner.assign(&incident.id).unwrap().route;

    assert!(h.assigner.review_routes(&h.traffic.snapshot()).is_empty());

    let mut snapshot = h.traffic.snapshot();
    for (a, b) in [((0, 0), (1, 0)), ((1, 0), (2, 0)), ((2, 0), (3, 0))] {
        snapshot = h
            .traffic
            .set_level(GridRoadGraph::segment_between(a, b), CongestionLevel::Heavy);
    }
    let suggestions = h.assigner.review_routes(&snapshot);

    assert_eq!(suggestions.len(), 1);
    let suggestion = &suggestions[0];
    assert_eq!(suggestion.vehicle.as_str(), "A-01");
    assert_eq!(suggestion.current.as_ref().map(|r| r.congestion), Some(CongestionLevel::Heavy));
    assert!(suggestion.suggested.id.as_str().starts_with("R/detour-north/"));
    assert_eq!(h.assigner.route_for(&"A-01".into()), Some(dispatched));
}

#[test]
fn test_review_flags_closed_dispatched_route() {
    let h = harness(grid(), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    let incident = h.incidents.submit(&report("medical", "30,0")).unwrap();
    h.assigner.assign(&incident.id).unwrap();

    let snapshot = h
        .traffic
        .close_segment(GridRoadGraph::segment_between((1, 0), (2, 0)));
    let suggestions = h.assigner.review_routes(&snapshot);

    assert_eq!(suggestions.len(), 1);
    assert!(suggestions[0].current.is_none());
}

#[test]
fn test_each_dispatch_gets_its_own_route_id() {
    let h = harness(grid(), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 0.0, 0.0)).unwrap();
    h.fleet.register(ambulance("A-02", 0.0, 0.0)).unwrap();
    let first = h.incidents.submit(&report("medical", "30,0")).unwrap();
    let second = h.incidents.submit(&report("medical", "30,0")).unwrap();

    let a = h.assigner.assign(&first.id).unwrap().route;
    let b = h.assigner.assign(&second.id).unwrap().route;

    assert_eq!(a.waypoints, b.waypoints);
    assert_eq!(a.intersections, b.intersections);
    assert_ne!(a.id, b.id);

    let recalculated = h.assigner.recalculate(&"A-01".into()).unwrap().route;
    assert_eq!(recalculated.waypoints, a.waypoints);
    assert_ne!(recalculated.id, a.id);
    assert!(h.assigner.review_routes(&h.traffic.snapshot()).is_empty());
}

#[test]
fn test_completion_retires_incident_lock() {
    let h = harness(fixed(&[]), EngineConfig::default());
    h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
    for _ in 0..5 {
        let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();
        h.assigner.assign(&incident.id).unwrap();
        h.assigner.complete(&incident.id).unwrap();
        assert!(h.assigner.complete(&incident.id).is_err());
        assert!(h.assigner.assign(&incident.id).is_err());
    }
    assert!(h.assigner.assign(&"INC-9999".into()).is_err());

    assert_eq!(h.assigner.incident_lock_count(), 0);
}

#[test]
fn test_recalculate_racing_completion_leaves_no_stale_route() {
    for _ in 0..50 {
        let h = Arc::new(harness(fixed(&[]), EngineConfig::default()));
        h.fleet.register(ambulance("A-01", 10.0, 10.0)).unwrap();
        let incident = h.incidents.submit(&report("medical", "12,12")).unwrap();
        h.assigner.assign(&incident.id).unwrap();
        let barrier = Arc::new(Barrier::new(3));

        let completer = {
            let h = h.clone();
            let barrier = barrier.clone();
            let id = incident.id.clone();
            thread::spawn(move || {
                barrier.wait();
                h.assigner.complete(&id).map(|_| ())
            })
        };
        let rerouters: Vec<_> = (0..2)
            .map(|_| {
                let h = h.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    match h.assigner.recalculate(&"A-01".into()) {
                        Ok(_) | Err(EngineError::UnitUnavailable { .. }) => {}
                        Err(err) => panic!("unexpected error {:?}", err),
                    }
                })
            })
            .collect();

        completer.join().unwrap().unwrap();
        for handle in rerouters {
            handle.join().unwrap();
        }

        let vehicle = h.fleet.vehicle(&"A-01".into()).unwrap();
        assert!(vehicle.is_available());
        assert_eq!(vehicle.distance_to_destination, None);
        assert!(h.assigner.route_for(&"A-01".into()).is_none());
    }
}
