pub mod graph;
pub mod scorer;
pub mod traffic;


pub use graph::{CandidatePath, GridRoadGraph, Leg, RoadGraph};
pub use scorer::RouteScorer;
pub use traffic::{CongestionSnapshot, TrafficMonitor};
