use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::EngineError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Congestion,
    Responder,
    Route,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            read: false,
        }
    }

    /// Dispatcher-facing notification for an engine error. Fatal errors get
    /// none; they never reach the dashboard.
    pub fn from_error(err: &EngineError) -> Option<Self> {
        if !err.is_recoverable() {
            return None;
        }

        let notification = match err {
            EngineError::NoAvailableUnit { incident } => Self::new(
                NotificationKind::Alert,
                Priority::High,
                "No Unit Available",
                format!("No available unit within range of incident {}.", incident),
            ),
            EngineError::RouteUnreachable { from, to } => Self::new(
                NotificationKind::Route,
                Priority::High,
                "Route Unreachable",
                format!("No open route from {} to {}.", from, to),
            ),
            EngineError::OverrideConflict { intersection, holder } => Self::new(
                NotificationKind::Alert,
                Priority::Medium,
                "Override Conflict",
                format!("Intersection {} is already controlled for route {}.", intersection, holder),
            ),
            EngineError::OverrideTimeout { route } => Self::new(
                NotificationKind::Alert,
                Priority::Medium,
                "Override Request Timed Out",
                format!("Signal override for route {} was not granted.", route),
            ),
            other => Self::new(
                NotificationKind::Alert,
                Priority::Low,
                "Request Rejected",
                other.to_string(),
            ),
        };
        Some(notification)
    }

    /// Relative age as shown in the drawer, e.g. "2 min ago".
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        let minutes = (now - self.created_at).num_minutes().max(0);
        match minutes {
            0 => "just now".to_string(),
            1..=59 => format!("{} min ago", minutes),
            60..=1439 => format!("{} h ago", minutes / 60),
            _ => format!("{} d ago", minutes / 1440),
        }
    }
}
