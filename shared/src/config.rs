//! Engine configuration
//!
//! Loaded from an optional TOML file layered under `RESCUE_*` environment
//! variables. Every field has a default so an empty environment is valid.

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_CONFIG_FILE: &str = "rescueroute.toml";
pub const CONFIG_PATH_VAR: &str = "RESCUE_CONFIG";
pub const ENV_PREFIX: &str = "RESCUE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Straight-line radius, in grid units, a unit may be dispatched from.
    #[serde(default = "default_max_dispatch_radius")]
    pub max_dispatch_radius: f64,
    #[serde(default = "default_miles_per_unit")]
    pub miles_per_unit: f64,
    #[serde(default = "default_cruise_speed_mph")]
    pub cruise_speed_mph: f64,
    /// Spacing between grid intersections, in grid units.
    #[serde(default = "default_block_size")]
    pub block_size: f64,
    #[serde(default = "default_heavy_alternative_tolerance")]
    pub heavy_alternative_tolerance: f64,
    #[serde(default = "default_override_duration_secs")]
    pub override_duration_secs: u64,
    #[serde(default = "default_override_lock_timeout_ms")]
    pub override_lock_timeout_ms: u64,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_event_journal_capacity")]
    pub event_journal_capacity: usize,
    #[serde(default)]
    pub match_unit_kind: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_max_dispatch_radius() -> f64 {
    60.0
}

fn default_miles_per_unit() -> f64 {
    0.05
}

fn default_cruise_speed_mph() -> f64 {
    30.0
}

fn default_block_size() -> f64 {
    10.0
}

fn default_heavy_alternative_tolerance() -> f64 {
    0.20
}

fn default_override_duration_secs() -> u64 {
    120
}

fn default_override_lock_timeout_ms() -> u64 {
    250
}

fn default_notification_capacity() -> usize {
    200
}

fn default_event_journal_capacity() -> usize {
    1024
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dispatch_radius: default_max_dispatch_radius(),
            miles_per_unit: default_miles_per_unit(),
            cruise_speed_mph: default_cruise_speed_mph(),
            block_size: default_block_size(),
            heavy_alternative_tolerance: default_heavy_alternative_tolerance(),
            override_duration_secs: default_override_duration_secs(),
            override_lock_timeout_ms: default_override_lock_timeout_ms(),
            notification_capacity: default_notification_capacity(),
            event_journal_capacity: default_event_journal_capacity(),
            match_unit_kind: false,
            tick_interval_ms: default_tick_interval_ms(),
            log_format: default_log_format(),
        }
    }
}

impl EngineConfig {
    /// Load from `RESCUE_CONFIG` (or `rescueroute.toml` when unset) and the
    /// environment, then validate.
    pub fn load() -> EngineResult<Self> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> EngineResult<Self> {
        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(self.max_dispatch_radius > 0.0) {
            return Err(EngineError::Config("max_dispatch_radius must be positive".to_string()));
        }
        if !(self.miles_per_unit > 0.0) {
            return Err(EngineError::Config("miles_per_unit must be positive".to_string()));
        }
        if !(self.cruise_speed_mph > 0.0) {
            return Err(EngineError::Config("cruise_speed_mph must be positive".to_string()));
        }
        if !(self.block_size > 0.0) {
            return Err(EngineError::Config("block_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.heavy_alternative_tolerance) {
            return Err(EngineError::Config(
                "heavy_alternative_tolerance must be within [0, 1]".to_string(),
            ));
        }
        if self.override_duration_secs == 0 {
            return Err(EngineError::Config("override_duration_secs must be positive".to_string()));
        }
        if self.override_lock_timeout_ms == 0 {
            return Err(EngineError::Config("override_lock_timeout_ms must be positive".to_string()));
        }
        if self.notification_capacity == 0 || self.event_journal_capacity == 0 {
            return Err(EngineError::Config("capacities must be positive".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::Config("tick_interval_ms must be positive".to_string()));
        }
        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(EngineError::Config(format!(
                "log_format must be 'json' or 'pretty', got '{}'",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn override_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.override_duration_secs as i64)
    }

    pub fn override_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.override_lock_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
