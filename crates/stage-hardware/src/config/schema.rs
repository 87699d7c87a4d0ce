//! Stage configuration schema.

use serde::{Deserialize, Serialize};
use stage_core::limits;
use stage_core::motion::WaitOptions;
use std::time::Duration;

/// Top-level hardware configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Wait loop settings shared by every stage
    #[serde(default)]
    pub motion: MotionConfig,
    /// Stages to build
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl HardwareConfig {
    /// Look up a stage entry by id.
    pub fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }
}

/// Settings for move and homing waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Delay between `is_moving` polls in milliseconds (default: 50)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting after this many milliseconds, 0 waits forever
    /// (default: 120000)
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    limits::POLL_INTERVAL.as_millis() as u64
}

fn default_wait_timeout_ms() -> u64 {
    limits::MOTION_TIMEOUT.as_millis() as u64
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl MotionConfig {
    /// Wait options for move and homing waits.
    pub fn wait_options(&self) -> WaitOptions {
        let timeout = (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms));
        WaitOptions::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_timeout(timeout)
    }
}

/// One stage entry (`[[stages]]`)
///
/// Bounds are arrays with one entry per axis. `nan` leaves that side of an
/// axis unbounded:
///
/// ```toml
/// [[stages]]
/// id = "xyz"
/// driver = "corvus"
/// minimums = [0.0, 0.0, nan]
/// maximums = [50000.0, 50000.0, nan]
///
/// [stages.config]
/// port = "/dev/ttyUSB0"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,
    /// Driver type, matched against registered factories
    pub driver: String,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Per-axis lower limits
    #[serde(default)]
    pub minimums: Option<Vec<f64>>,
    /// Per-axis upper limits
    #[serde(default)]
    pub maximums: Option<Vec<f64>>,
    /// Driver-specific configuration
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn to_bounds(values: &Option<Vec<f64>>) -> Option<Vec<Option<f64>>> {
    values
        .as_ref()
        .map(|v| v.iter().map(|x| (!x.is_nan()).then_some(*x)).collect())
}

impl StageConfig {
    /// Minimal entry with an empty driver table.
    pub fn new(id: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: driver.into(),
            name: None,
            minimums: None,
            maximums: None,
            config: empty_table(),
        }
    }

    /// Minimums with `nan` entries mapped to unset.
    pub fn minimum_bounds(&self) -> Option<Vec<Option<f64>>> {
        to_bounds(&self.minimums)
    }

    /// Maximums with `nan` entries mapped to unset.
    pub fn maximum_bounds(&self) -> Option<Vec<Option<f64>>> {
        to_bounds(&self.maximums)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
