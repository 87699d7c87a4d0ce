//! `stage-hardware`
//!
//! Configuration loading and the [`StageRegistry`] that turns `[[stages]]`
//! entries into live [`Stage`](stage_core::capabilities::Stage) objects.
//!
//! Driver crates are compiled in per feature (`corvus`, `grbl`, `newscale`,
//! `newport`, `pi`, `pololu`); [`register_builtin_factories`] registers
//! whichever are enabled.

pub mod config;
pub mod registry;

pub use config::{load_hardware_config, ConfigLoadError, HardwareConfig, MotionConfig, StageConfig};
pub use registry::{FactoryInfo, RegisteredStage, RegistrationFailure, StageInfo, StageRegistry};

/// Register the factory of every driver enabled at compile time.
pub fn register_builtin_factories(registry: &StageRegistry) {
    #[cfg(feature = "corvus")]
    {
        stage_driver_corvus::link();
        registry.register_factory(stage_driver_corvus::CorvusFactory);
    }
    #[cfg(feature = "grbl")]
    {
        stage_driver_grbl::link();
        registry.register_factory(stage_driver_grbl::CncFactory);
    }
    #[cfg(feature = "newscale")]
    {
        stage_driver_newscale::link();
        registry.register_factory(stage_driver_newscale::M3fsFactory);
    }
    #[cfg(feature = "newport")]
    {
        stage_driver_newport::link();
        registry.register_factory(stage_driver_newport::Smc100Factory);
    }
    #[cfg(feature = "pi")]
    {
        stage_driver_pi::link();
        registry.register_factory(stage_driver_pi::PiFactory);
    }
    #[cfg(feature = "pololu")]
    {
        stage_driver_pololu::link();
        registry.register_factory(stage_driver_pololu::TicFactory);
    }
    tracing::debug!(
        factories = registry.list_factories().len(),
        "Registered built-in driver factories"
    );
}
