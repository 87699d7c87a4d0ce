//! Driver factories.
//!
//! Each driver crate exports a [`DriverFactory`] that parses its TOML config
//! table, opens the transport, performs the handshake and returns the stage.
//! Factories are registered with the `StageRegistry` at startup:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Composition root (stagectl)                  │
//! │  registry.register_factory(CorvusFactory);    │
//! │  registry.register_factory(Smc100Factory);    │
//! └───────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌───────────────────────────────────────────────┐
//! │  StageRegistry                                │
//! │  factories: driver_type -> DriverFactory      │
//! │  stages:    stage id    -> StageComponents    │
//! └───────────────────────────────────────────────┘
//! ```

use crate::capabilities::Stage;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Optional features a driver family offers beyond the [`Stage`] contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Absolute positioning (every driver).
    Positioning,
    /// Homing / referencing cycle.
    Homing,
    /// Relative moves.
    RelativeMove,
    /// Redefining the current position as origin.
    SetOrigin,
    /// Velocity / acceleration configuration.
    Kinematics,
    /// Device-side calibration routine.
    Calibration,
    /// Stop command.
    Stop,
    /// Readable device settings table.
    Settings,
    /// Several stages share one transport.
    SharedTransport,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Positioning => "Positioning",
            Self::Homing => "Homing",
            Self::RelativeMove => "Relative Move",
            Self::SetOrigin => "Set Origin",
            Self::Kinematics => "Kinematics",
            Self::Calibration => "Calibration",
            Self::Stop => "Stop",
            Self::Settings => "Settings",
            Self::SharedTransport => "Shared Transport",
        }
    }
}

// =============================================================================
// Stage Components
// =============================================================================

/// What a factory hands back to the registry.
pub struct StageComponents {
    /// The constructed stage.
    pub stage: Arc<dyn Stage>,
    /// Descriptive metadata.
    pub metadata: StageMetadata,
}

impl StageComponents {
    /// Components with default metadata.
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            metadata: StageMetadata::default(),
        }
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: StageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl std::fmt::Debug for StageComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageComponents")
            .field("num_axis", &self.stage.num_axis())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Descriptive information about a built stage.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    /// Position units (e.g. "um", "mm", "steps").
    pub position_units: Option<String>,
    /// Identification string reported by the device during the handshake.
    pub identification: Option<String>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create stage instances.
///
/// Factories are registered once at startup and must be
/// `Send + Sync + 'static`. Shared state (such as a shared serial link) uses
/// internal synchronization.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in the TOML `driver` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// Optional features offered by this driver family.
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Positioning]
    }

    /// Validate configuration without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Open the transport, handshake and return the stage.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_name() {
        assert_eq!(Capability::Positioning.name(), "Positioning");
        assert_eq!(Capability::SharedTransport.name(), "Shared Transport");
    }

    #[test]
    fn test_capability_serde() {
        let cap: Capability = toml::Value::String("relative_move".into()).try_into().unwrap();
        assert_eq!(cap, Capability::RelativeMove);
    }
}
