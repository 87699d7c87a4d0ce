//! Stage configuration.
//!
//! A configuration file lists the stages to build and the shared wait
//! settings:
//!
//! ```toml
//! [motion]
//! poll_interval_ms = 50
//! timeout_ms = 120000        # 0 waits forever
//!
//! [[stages]]
//! id = "xy"
//! driver = "smc100"
//! maximums = [25.0, 25.0]
//!
//! [stages.config]
//! port = "/dev/ttyUSB0"
//! addresses = [1, 2]
//! ```
//!
//! The `[stages.config]` table is handed to the driver factory untouched.

pub mod loader;
pub mod schema;

pub use loader::{
    load_hardware_config, load_hardware_config_from_str, validate_hardware_config,
    ConfigLoadError,
};
pub use schema::{HardwareConfig, MotionConfig, StageConfig};
