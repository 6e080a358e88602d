use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the dispatch map, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(VehicleId);
string_id!(IncidentId);
string_id!(RouteId);
string_id!(IntersectionId);
string_id!(SegmentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Ambulance,
    Firetruck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Available,
    Enroute,
    Responding,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Enroute => "enroute",
            VehicleStatus::Responding => "responding",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    Medical,
    Fire,
    Accident,
    Hazard,
    Other,
}

impl IncidentKind {
    /// Unit kind a matching dispatch restricts itself to, if any.
    pub fn required_unit(&self) -> Option<VehicleKind> {
        match self {
            IncidentKind::Medical => Some(VehicleKind::Ambulance),
            IncidentKind::Fire => Some(VehicleKind::Firetruck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Assigned,
    Closed,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Assigned => "assigned",
            IncidentStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Traffic level on a segment or a whole route. Ordered light to heavy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Light,
    Moderate,
    Heavy,
}

impl CongestionLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            CongestionLevel::Light => 1.0,
            CongestionLevel::Moderate => 1.6,
            CongestionLevel::Heavy => 2.5,
        }
    }

    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier < 1.3 {
            CongestionLevel::Light
        } else if multiplier < 2.0 {
            CongestionLevel::Moderate
        } else {
            CongestionLevel::Heavy
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CongestionLevel::Light => "light",
            CongestionLevel::Moderate => "moderate",
            CongestionLevel::Heavy => "heavy",
        };
        f.write_str(label)
    }
}

/// Override state machine: Inactive -> Requested -> Active -> Expired | Revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideState {
    Inactive,
    Requested,
    Active,
    Expired,
    Revoked,
}

impl OverrideState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OverrideState::Expired | OverrideState::Revoked)
    }
}

impl fmt::Display for OverrideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OverrideState::Inactive => "inactive",
            OverrideState::Requested => "requested",
            OverrideState::Active => "active",
            OverrideState::Expired => "expired",
            OverrideState::Revoked => "revoked",
        };
        f.write_str(label)
    }
}

/// A scored path between two positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub label: String,
    pub waypoints: Vec<Position>,
    pub intersections: Vec<IntersectionId>,
    pub segments: Vec<SegmentId>,
    pub eta_minutes: f64,
    pub distance_miles: f64,
    pub congestion: CongestionLevel,
    pub recommended: bool,
}

impl Route {
    pub fn origin(&self) -> Option<Position> {
        self.waypoints.first().copied()
    }

    pub fn destination(&self) -> Option<Position> {
        self.waypoints.last().copied()
    }

    pub fn crosses(&self, segment: &SegmentId) -> bool {
        self.segments.iter().any(|s| s == segment)
    }
}
