//! Stage registry.
//!
//! Maps driver types to [`DriverFactory`] implementations and stage ids to
//! built stages.
//!
//! ```rust,ignore
//! let registry = StageRegistry::with_builtin_factories();
//! registry.register_from_config(&config).await?;
//!
//! let stage = registry.get("xyz").context("no such stage")?;
//! stage.move_to(&Vector::new([1.0, 2.0, 3.0]), Some(&config.motion.wait_options())).await?;
//! ```

use crate::config::{HardwareConfig, StageConfig};
use anyhow::{anyhow, bail, Context, Result};
use dashmap::DashMap;
use stage_core::capabilities::Stage;
use stage_core::driver::{Capability, DriverFactory, StageMetadata};
use std::sync::Arc;

/// A stage that was built and registered.
#[derive(Clone)]
pub struct RegisteredStage {
    /// Stage id from the configuration
    pub id: String,
    /// Display name
    pub name: String,
    /// Driver type that built it
    pub driver_type: String,
    /// The stage
    pub stage: Arc<dyn Stage>,
    /// Metadata reported by the factory
    pub metadata: StageMetadata,
}

/// Summary of a registered stage.
#[derive(Debug, Clone)]
pub struct StageInfo {
    /// Stage id
    pub id: String,
    /// Display name
    pub name: String,
    /// Driver type
    pub driver_type: String,
    /// Axis count
    pub num_axis: usize,
    /// Metadata reported by the factory
    pub metadata: StageMetadata,
}

/// Information about a failed stage registration
#[derive(Debug, Clone)]
pub struct RegistrationFailure {
    /// Stage id that failed to register
    pub stage_id: String,
    /// Driver type that failed
    pub driver_type: String,
    /// Error message describing the failure
    pub error: String,
}

/// Information about a registered driver factory
#[derive(Debug, Clone)]
pub struct FactoryInfo {
    /// The driver_type string this factory handles
    pub driver_type: String,
    /// Human-readable factory name
    pub name: String,
    /// Optional features the driver provides
    pub capabilities: Vec<Capability>,
}

/// Registry of driver factories and built stages.
pub struct StageRegistry {
    /// Registered driver factories by driver_type
    factories: DashMap<String, Box<dyn DriverFactory>>,

    /// Built stages by id
    stages: DashMap<String, RegisteredStage>,

    /// Failures recorded by [`StageRegistry::register_from_config`]
    registration_failures: DashMap<String, RegistrationFailure>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            stages: DashMap::new(),
            registration_failures: DashMap::new(),
        }
    }

    /// Registry with every driver compiled into this build.
    pub fn with_builtin_factories() -> Self {
        let registry = Self::new();
        crate::register_builtin_factories(&registry);
        registry
    }

    // =========================================================================
    // Driver Factory Management
    // =========================================================================

    /// Register a driver factory, replacing any previous one for the same
    /// driver type.
    pub fn register_factory<F: DriverFactory>(&self, factory: F) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::debug!(
            driver_type = %driver_type,
            name = %factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, Box::new(factory))
    }

    /// Unregister a driver factory by driver type.
    pub fn unregister_factory(&self, driver_type: &str) -> Option<Box<dyn DriverFactory>> {
        self.factories
            .remove(driver_type)
            .map(|(_, factory)| factory)
    }

    /// Check if a factory is registered for a driver type.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered factories, sorted by driver type.
    pub fn list_factories(&self) -> Vec<FactoryInfo> {
        let mut infos: Vec<FactoryInfo> = self
            .factories
            .iter()
            .map(|entry| {
                let factory = entry.value();
                FactoryInfo {
                    driver_type: factory.driver_type().to_string(),
                    name: factory.name().to_string(),
                    capabilities: factory.capabilities().to_vec(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.driver_type.cmp(&b.driver_type));
        infos
    }

    fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    // =========================================================================
    // Stage Management
    // =========================================================================

    /// Check a stage entry against its factory without touching hardware.
    pub fn validate(&self, config: &StageConfig) -> Result<()> {
        let factory = self.factories.get(&config.driver).ok_or_else(|| {
            anyhow!(
                "No factory registered for driver '{}'. Available drivers: {:?}",
                config.driver,
                self.driver_types()
            )
        })?;
        factory.validate(&config.config).with_context(|| {
            format!(
                "Configuration validation failed for stage '{}' ({})",
                config.id, config.driver
            )
        })
    }

    /// Build a stage through its factory, apply its bounds and register it.
    pub async fn register_stage(&self, config: &StageConfig) -> Result<()> {
        if self.stages.contains_key(&config.id) {
            bail!("Stage '{}' is already registered", config.id);
        }
        self.validate(config)?;

        let build = {
            let factory = self
                .factories
                .get(&config.driver)
                .ok_or_else(|| anyhow!("No factory registered for driver '{}'", config.driver))?;
            factory.build(config.config.clone())
        };

        tracing::info!(stage_id = %config.id, driver = %config.driver, "Building stage");
        let components = build.await.with_context(|| {
            format!(
                "Factory build failed for stage '{}' ({})",
                config.id, config.driver
            )
        })?;

        let bounds = components.stage.bounds();
        bounds
            .set_minimums(config.minimum_bounds())
            .and_then(|_| bounds.set_maximums(config.maximum_bounds()))
            .with_context(|| format!("Invalid bounds for stage '{}'", config.id))?;

        self.stages.insert(
            config.id.clone(),
            RegisteredStage {
                id: config.id.clone(),
                name: config.display_name().to_string(),
                driver_type: config.driver.clone(),
                stage: components.stage,
                metadata: components.metadata,
            },
        );
        tracing::info!(stage_id = %config.id, "Stage registered successfully");
        Ok(())
    }

    /// Register every stage of a configuration.
    ///
    /// All entries are validated first and any validation error aborts before
    /// hardware is touched. Build failures are recorded (see
    /// [`list_registration_failures`](Self::list_registration_failures)) and
    /// do not stop the remaining stages.
    pub async fn register_from_config(&self, config: &HardwareConfig) -> Result<()> {
        let validation_errors: Vec<String> = config
            .stages
            .iter()
            .filter_map(|stage| self.validate(stage).err())
            .map(|e| format!("{e:#}"))
            .collect();
        if !validation_errors.is_empty() {
            bail!(
                "Hardware configuration validation failed:\n  - {}",
                validation_errors.join("\n  - ")
            );
        }

        for stage in &config.stages {
            if let Err(e) = self.register_stage(stage).await {
                self.record_registration_failure(RegistrationFailure {
                    stage_id: stage.id.clone(),
                    driver_type: stage.driver.clone(),
                    error: format!("{e:#}"),
                });
            }
        }
        Ok(())
    }

    /// Register an already built stage.
    pub fn insert(&self, stage: RegisteredStage) -> Option<RegisteredStage> {
        self.stages.insert(stage.id.clone(), stage)
    }

    /// Remove a stage.
    pub fn unregister(&self, id: &str) -> bool {
        self.stages.remove(id).is_some()
    }

    /// Stage by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(id).map(|entry| entry.stage.clone())
    }

    /// Check if a stage is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.stages.contains_key(id)
    }

    /// Summary of one stage.
    pub fn stage_info(&self, id: &str) -> Option<StageInfo> {
        self.stages.get(id).map(|entry| Self::info(entry.value()))
    }

    /// Summaries of every stage, sorted by id.
    pub fn list_stages(&self) -> Vec<StageInfo> {
        let mut infos: Vec<StageInfo> = self.stages.iter().map(|e| Self::info(e.value())).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    fn info(stage: &RegisteredStage) -> StageInfo {
        StageInfo {
            id: stage.id.clone(),
            name: stage.name.clone(),
            driver_type: stage.driver_type.clone(),
            num_axis: stage.stage.num_axis(),
            metadata: stage.metadata.clone(),
        }
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    // =========================================================================
    // Registration failures
    // =========================================================================

    /// Record a registration failure.
    pub fn record_registration_failure(&self, failure: RegistrationFailure) {
        tracing::error!(
            stage_id = %failure.stage_id,
            driver_type = %failure.driver_type,
            error = %failure.error,
            "Stage registration failed"
        );
        self.registration_failures
            .insert(failure.stage_id.clone(), failure);
    }

    /// All registration failures, sorted by stage id.
    pub fn list_registration_failures(&self) -> Vec<RegistrationFailure> {
        let mut failures: Vec<RegistrationFailure> = self
            .registration_failures
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        failures.sort_by(|a, b| a.stage_id.cmp(&b.stage_id));
        failures
    }

    /// Whether any registration failed.
    pub fn has_registration_failures(&self) -> bool {
        !self.registration_failures.is_empty()
    }

    /// Forget recorded failures.
    pub fn clear_registration_failures(&self) {
        self.registration_failures.clear();
    }
}
