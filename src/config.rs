use crate::error::ConfigError;
use crate::global_variables::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Every tunable of a simulation run. Fields missing from a config file keep
/// their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub rows: usize,
    pub cols: usize,
    pub taxi_count: usize,
    pub drive_time_ms: u64,
    pub rest_time_ms: u64,
    pub idle_wander_ms: u64,
    pub signal_recheck_ms: u64,
    pub light_period_ms: u64,
    pub flow_refresh_ms: u64,
    pub dispatch_window_ms: u64,
    pub dispatch_poll_ms: u64,
    pub dispatch_radius: i32,
    pub dispatch_award: u64,
    pub service_bonus: u64,
    pub seed: u64,
    pub telemetry_csv: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rows: MAP_ROWS,
            cols: MAP_COLS,
            taxi_count: TAXI_COUNT,
            drive_time_ms: DRIVE_TIME_MS,
            rest_time_ms: REST_TIME_MS,
            idle_wander_ms: IDLE_WANDER_MS,
            signal_recheck_ms: SIGNAL_RECHECK_MS,
            light_period_ms: LIGHT_PERIOD_MS,
            flow_refresh_ms: FLOW_REFRESH_MS,
            dispatch_window_ms: DISPATCH_WINDOW_MS,
            dispatch_poll_ms: DISPATCH_POLL_MS,
            dispatch_radius: DISPATCH_RADIUS,
            dispatch_award: DISPATCH_AWARD,
            service_bonus: SERVICE_BONUS,
            seed: DEFAULT_SEED,
            telemetry_csv: None,
        }
    }
}

impl SimConfig {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    pub fn drive_time(&self) -> Duration {
        Duration::from_millis(self.drive_time_ms)
    }

    pub fn rest_time(&self) -> Duration {
        Duration::from_millis(self.rest_time_ms)
    }

    pub fn signal_recheck(&self) -> Duration {
        Duration::from_millis(self.signal_recheck_ms)
    }

    pub fn light_period(&self) -> Duration {
        Duration::from_millis(self.light_period_ms)
    }

    pub fn flow_refresh(&self) -> Duration {
        Duration::from_millis(self.flow_refresh_ms)
    }

    pub fn dispatch_window(&self) -> Duration {
        Duration::from_millis(self.dispatch_window_ms)
    }

    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms)
    }

    /// Steps an idle taxi wanders before it takes a rest.
    pub fn wander_steps(&self) -> u64 {
        self.idle_wander_ms / self.drive_time_ms.max(1)
    }
}
