use shared::types::{CongestionLevel, Position, Route, RouteId};
use shared::{EngineConfig, EngineError, EngineResult};
use std::sync::Arc;

use crate::graph::{CandidatePath, RoadGraph};
use crate::traffic::CongestionSnapshot;

pub struct RouteScorer {
    graph: Arc<dyn RoadGraph>,
    heavy_alternative_tolerance: f64,
}

impl RouteScorer {
    pub fn new(graph: Arc<dyn RoadGraph>, heavy_alternative_tolerance: f64) -> Self {
        Self {
            graph,
            heavy_alternative_tolerance,
        }
    }

    pub fn from_config(graph: Arc<dyn RoadGraph>, config: &EngineConfig) -> Self {
        Self::new(graph, config.heavy_alternative_tolerance)
    }

    /// Candidate routes ranked by ETA, then distance, then candidate label.
    /// Exactly one entry is marked recommended.
    pub fn rank(
        &self,
        origin: Position,
        destination: Position,
        snapshot: &CongestionSnapshot,
    ) -> EngineResult<Vec<Route>> {
        let mut scored: Vec<(String, Route)> = self
            .graph
            .candidate_paths(origin, destination)
            .into_iter()
            .filter(|path| !path.segments().iter().any(|s| snapshot.is_closed(s)))
            .map(|path| (path.label.clone(), score_path(&path, origin, destination, snapshot)))
            .collect();

        if scored.is_empty() {
            return Err(EngineError::RouteUnreachable {
                from: origin,
                to: destination,
            });
        }

        scored.sort_by(|(a_label, a), (b_label, b)| {
            a.eta_minutes
                .total_cmp(&b.eta_minutes)
                .then_with(|| a.distance_miles.total_cmp(&b.distance_miles))
                .then_with(|| a_label.cmp(b_label))
        });

        let mut routes: Vec<Route> = scored
            .into_iter()
            .enumerate()
            .map(|(rank, (_, mut route))| {
                route.label = format!("Route {}", rank_letter(rank));
                route
            })
            .collect();

        mark_recommended(&mut routes, self.heavy_alternative_tolerance);
        Ok(routes)
    }

    /// The recommended route only.
    pub fn best(
        &self,
        origin: Position,
        destination: Position,
        snapshot: &CongestionSnapshot,
    ) -> EngineResult<Route> {
        let routes = self.rank(origin, destination, snapshot)?;
        routes
            .into_iter()
            .find(|r| r.recommended)
            .ok_or(EngineError::RouteUnreachable {
                from: origin,
                to: destination,
            })
    }
}

impl std::fmt::Debug for RouteScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteScorer")
            .field("heavy_alternative_tolerance", &self.heavy_alternative_tolerance)
            .finish()
    }
}

/// Mark the recommended entry of an already ranked list. The top route wins
/// unless it is heavy and a lighter route is within `tolerance` of its ETA,
/// in which case the best-ranked such route wins.
pub fn mark_recommended(routes: &mut [Route], tolerance: f64) {
    for route in routes.iter_mut() {
        route.recommended = false;
    }

    let Some(top) = routes.first() else {
        return;
    };

    let mut pick = 0;
    if top.congestion == CongestionLevel::Heavy {
        let limit = top.eta_minutes * (1.0 + tolerance);
        if let Some(index) = routes
            .iter()
            .position(|r| r.congestion < CongestionLevel::Heavy && r.eta_minutes <= limit)
        {
            pick = index;
        }
    }

    routes[pick].recommended = true;
}

fn score_path(
    path: &CandidatePath,
    origin: Position,
    destination: Position,
    snapshot: &CongestionSnapshot,
) -> Route {
    let mut eta_minutes = 0.0;
    let mut distance_miles = 0.0;
    let mut weighted = 0.0;

    for leg in &path.legs {
        let multiplier = leg
            .segment
            .as_ref()
            .map_or(1.0, |segment| snapshot.level(segment).multiplier());
        eta_minutes += leg.free_flow_minutes * multiplier;
        distance_miles += leg.miles;
        weighted += leg.miles * multiplier;
    }

    let mean_multiplier = if distance_miles > 0.0 {
        weighted / distance_miles
    } else {
        1.0
    };

    Route {
        id: RouteId::new(format!(
            "R/{}/{},{}/{},{}",
            path.label, origin.x, origin.y, destination.x, destination.y
        )),
        label: path.label.clone(),
        waypoints: path.waypoints.clone(),
        intersections: path.intersections.clone(),
        segments: path.segments(),
        eta_minutes,
        distance_miles,
        congestion: CongestionLevel::from_multiplier(mean_multiplier),
        recommended: false,
    }
}

fn rank_letter(rank: usize) -> String {
    if rank < 26 {
        ((b'A' + rank as u8) as char).to_string()
    } else {
        format!("{}", rank + 1)
    }
}

