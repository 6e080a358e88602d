//! Road network seam
//!
//! `RoadGraph` stands in for the geocoder/road network the engine consults
//! for candidate paths and free-flow travel times. `GridRoadGraph` models the
//! city as a uniform grid of intersections.

use shared::types::{IntersectionId, Position, SegmentId};
use shared::EngineConfig;

/// One stretch of a candidate path. Access legs between an exact position and
/// the nearest intersection have no segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub segment: Option<SegmentId>,
    pub miles: f64,
    pub free_flow_minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePath {
    pub label: String,
    pub waypoints: Vec<Position>,
    pub intersections: Vec<IntersectionId>,
    pub legs: Vec<Leg>,
}

impl CandidatePath {
    pub fn segments(&self) -> Vec<SegmentId> {
        self.legs.iter().filter_map(|leg| leg.segment.clone()).collect()
    }
}

pub trait RoadGraph: Send + Sync {
    /// Candidate paths from `origin` to `destination`, in a stable order.
    fn candidate_paths(&self, origin: Position, destination: Position) -> Vec<CandidatePath>;
}

type Node = (i64, i64);

/// Intersections beyond this index on either axis are not modelled.
const MAX_NODE_INDEX: f64 = 10_000.0;

pub struct GridRoadGraph {
    block_size: f64,
    miles_per_unit: f64,
    speed_mph: f64,
}

impl GridRoadGraph {
    pub fn new(block_size: f64, miles_per_unit: f64, speed_mph: f64) -> Self {
        Self {
            block_size,
            miles_per_unit,
            speed_mph,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.block_size, config.miles_per_unit, config.cruise_speed_mph)
    }

    /// Segment between two adjacent intersections, named the same in either
    /// direction.
    pub fn segment_between(a: (i64, i64), b: (i64, i64)) -> SegmentId {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        SegmentId::new(format!("S-{}-{}-{}-{}", lo.0, lo.1, hi.0, hi.1))
    }

    fn snap(&self, position: Position) -> Node {
        let axis = |value: f64| {
            let index = (value / self.block_size).round();
            if index.is_nan() {
                0
            } else {
                index.clamp(-MAX_NODE_INDEX, MAX_NODE_INDEX) as i64
            }
        };
        (axis(position.x), axis(position.y))
    }

    fn node_position(&self, node: Node) -> Position {
        Position::new(node.0 as f64 * self.block_size, node.1 as f64 * self.block_size)
    }

    fn minutes(&self, miles: f64) -> f64 {
        miles / self.speed_mph * 60.0
    }

    fn node_sequences(&self, start: Node, end: Node) -> Vec<(&'static str, Vec<Node>)> {
        if start == end {
            return vec![("direct", vec![start])];
        }

        let mut sequences = vec![
            ("xy", walk_x_then_y(start, end)),
            ("yx", walk_y_then_x(start, end)),
            ("stair", walk_staircase(start, end)),
        ];

        if start.1 == end.1 {
            for (label, offset) in [("detour-north", -1), ("detour-south", 1)] {
                let turn = (end.0, start.1 + offset);
                let mut nodes = walk_y_then_x(start, turn);
                nodes.extend(walk_x_then_y(turn, end).into_iter().skip(1));
                sequences.push((label, nodes));
            }
        } else if start.0 == end.0 {
            for (label, offset) in [("detour-west", -1), ("detour-east", 1)] {
                let turn = (start.0 + offset, end.1);
                let mut nodes = walk_x_then_y(start, turn);
                nodes.extend(walk_y_then_x(turn, end).into_iter().skip(1));
                sequences.push((label, nodes));
            }
        }

        let mut unique: Vec<(&'static str, Vec<Node>)> = Vec::new();
        for (label, nodes) in sequences {
            if !unique.iter().any(|(_, existing)| *existing == nodes) {
                unique.push((label, nodes));
            }
        }
        unique
    }

    fn build_path(&self, label: &str, origin: Position, destination: Position, nodes: &[Node]) -> CandidatePath {
        let mut waypoints = vec![origin];
        let mut legs = Vec::new();

        let first = self.node_position(nodes[0]);
        push_access_leg(&mut legs, &mut waypoints, origin, first, self);

        for pair in nodes.windows(2) {
            let miles = self.block_size * self.miles_per_unit;
            legs.push(Leg {
                segment: Some(Self::segment_between(pair[0], pair[1])),
                miles,
                free_flow_minutes: self.minutes(miles),
            });
            waypoints.push(self.node_position(pair[1]));
        }

        let last = self.node_position(nodes[nodes.len() - 1]);
        push_access_leg(&mut legs, &mut waypoints, last, destination, self);

        CandidatePath {
            label: label.to_string(),
            waypoints,
            intersections: nodes.iter().map(|n| intersection_id(*n)).collect(),
            legs,
        }
    }
}

impl RoadGraph for GridRoadGraph {
    fn candidate_paths(&self, origin: Position, destination: Position) -> Vec<CandidatePath> {
        let start = self.snap(origin);
        let end = self.snap(destination);

        self.node_sequences(start, end)
            .iter()
            .map(|(label, nodes)| self.build_path(label, origin, destination, nodes))
            .collect()
    }
}

fn push_access_leg(
    legs: &mut Vec<Leg>,
    waypoints: &mut Vec<Position>,
    from: Position,
    to: Position,
    graph: &GridRoadGraph,
) {
    let units = from.distance_to(&to);
    if units > 0.0 {
        let miles = units * graph.miles_per_unit;
        legs.push(Leg {
            segment: None,
            miles,
            free_flow_minutes: graph.minutes(miles),
        });
        waypoints.push(to);
    } else if waypoints.last() != Some(&to) {
        waypoints.push(to);
    }
}

fn intersection_id(node: Node) -> IntersectionId {
    IntersectionId::new(format!("I-{}-{}", node.0, node.1))
}

fn step_toward(from: i64, to: i64) -> i64 {
    from + (to - from).signum()
}

fn walk_x_then_y(start: Node, end: Node) -> Vec<Node> {
    let mut nodes = vec![start];
    let mut current = start;
    while current.0 != end.0 {
        current.0 = step_toward(current.0, end.0);
        nodes.push(current);
    }
    while current.1 != end.1 {
        current.1 = step_toward(current.1, end.1);
        nodes.push(current);
    }
    nodes
}

fn walk_y_then_x(start: Node, end: Node) -> Vec<Node> {
    let mut nodes = vec![start];
    let mut current = start;
    while current.1 != end.1 {
        current.1 = step_toward(current.1, end.1);
        nodes.push(current);
    }
    while current.0 != end.0 {
        current.0 = step_toward(current.0, end.0);
        nodes.push(current);
    }
    nodes
}

fn walk_staircase(start: Node, end: Node) -> Vec<Node> {
    let mut nodes = vec![start];
    let mut current = start;
    let mut horizontal = true;
    while current != end {
        if (horizontal && current.0 != end.0) || current.1 == end.1 {
            current.0 = step_toward(current.0, end.0);
        } else {
            current.1 = step_toward(current.1, end.1);
        }
        horizontal = !horizontal;
        nodes.push(current);
    }
    nodes
}
