//! Registry tests with an in-memory driver.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use stage_core::capabilities::{AxisBounds, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::motion::WaitOptions;
use stage_core::Vector;
use stage_hardware::config::load_hardware_config_from_str;
use stage_hardware::StageRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stage that reaches its target after a couple of `is_moving` polls.
struct MemoryStage {
    bounds: AxisBounds,
    position: Mutex<Vector>,
    polls_left: AtomicUsize,
}

#[async_trait]
impl Stage for MemoryStage {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    async fn position(&self) -> StageResult<Vector> {
        Ok(self.position.lock().unwrap().clone())
    }

    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        *self.position.lock().unwrap() = target.clone();
        self.polls_left.store(2, Ordering::SeqCst);
        Ok(())
    }

    async fn is_moving(&self) -> StageResult<bool> {
        let left = self.polls_left.load(Ordering::SeqCst);
        if left > 0 {
            self.polls_left.store(left - 1, Ordering::SeqCst);
        }
        Ok(left > 0)
    }

    async fn start_home(&self) -> StageResult<()> {
        self.move_unchecked(&Vector::zeros(self.bounds.num_axis())).await
    }
}

#[derive(serde::Deserialize)]
struct MemoryConfig {
    num_axis: usize,
    #[serde(default)]
    fail: bool,
}

struct MemoryFactory;

impl DriverFactory for MemoryFactory {
    fn driver_type(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &'static str {
        "In-memory stage"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Positioning, Capability::Homing]
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MemoryConfig = config.clone().try_into()?;
        anyhow::ensure!(cfg.num_axis > 0, "num_axis must be positive");
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: MemoryConfig = config.try_into()?;
            if cfg.fail {
                return Err(StageError::ConnectionFailure("no device".into()).into());
            }
            let stage = MemoryStage {
                bounds: AxisBounds::new(cfg.num_axis),
                position: Mutex::new(Vector::zeros(cfg.num_axis)),
                polls_left: AtomicUsize::new(0),
            };
            Ok(StageComponents::new(Arc::new(stage)).with_metadata(StageMetadata {
                position_units: Some("um".into()),
                identification: None,
            }))
        })
    }
}

const CONFIG: &str = r#"
[motion]
poll_interval_ms = 0

[[stages]]
id = "xyz"
driver = "memory"
name = "Scanner"
minimums = [0.0, 0.0, nan]
maximums = [10.0, 10.0, nan]

[stages.config]
num_axis = 3

[[stages]]
id = "broken"
driver = "memory"

[stages.config]
num_axis = 1
fail = true
"#;

fn registry() -> StageRegistry {
    let registry = StageRegistry::new();
    registry.register_factory(MemoryFactory);
    registry
}

#[tokio::test]
async fn test_register_from_config_applies_bounds_and_records_failures() {
    let config = load_hardware_config_from_str(CONFIG).unwrap();
    let registry = registry();
    registry.register_from_config(&config).await.unwrap();

    assert_eq!(registry.len(), 1);
    let info = registry.stage_info("xyz").unwrap();
    assert_eq!(info.name, "Scanner");
    assert_eq!(info.num_axis, 3);
    assert_eq!(info.metadata.position_units.as_deref(), Some("um"));

    let failures = registry.list_registration_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage_id, "broken");
    assert!(failures[0].error.contains("no device"));

    let stage = registry.get("xyz").unwrap();
    assert_eq!(stage.bounds().maximums(), vec![Some(10.0), Some(10.0), None]);

    let err = stage
        .set_position(&Vector::new([11.0, 0.0, 0.0]))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::OutOfRange { axis: 0, .. }));

    stage
        .move_to(
            &Vector::new([1.0, 2.0, 1000.0]),
            Some(&config.motion.wait_options()),
        )
        .await
        .unwrap();
    assert_eq!(stage.position().await.unwrap(), [1.0, 2.0, 1000.0]);
    assert!(!stage.is_moving().await.unwrap());
}

#[tokio::test]
async fn test_validation_failure_builds_nothing() {
    let config = load_hardware_config_from_str(
        r#"
[[stages]]
id = "ok"
driver = "memory"
[stages.config]
num_axis = 2

[[stages]]
id = "unknown"
driver = "teleporter"
"#,
    )
    .unwrap();
    let registry = registry();
    let err = registry.register_from_config(&config).await.unwrap_err();
    assert!(err.to_string().contains("teleporter"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_bounds_dimension_mismatch_is_rejected() {
    let config = load_hardware_config_from_str(
        r#"
[[stages]]
id = "xy"
driver = "memory"
maximums = [1.0, 2.0, 3.0]
[stages.config]
num_axis = 2
"#,
    )
    .unwrap();
    let registry = registry();
    let err = registry.register_stage(&config.stages[0]).await.unwrap_err();
    assert!(format!("{err:#}").contains("Dimension mismatch"));
    assert!(!registry.contains("xy"));
}

#[tokio::test]
async fn test_duplicate_registration_and_removal() {
    let config = load_hardware_config_from_str(
        r#"
[[stages]]
id = "z"
driver = "memory"
[stages.config]
num_axis = 1
"#,
    )
    .unwrap();
    let registry = registry();
    registry.register_stage(&config.stages[0]).await.unwrap();
    assert!(registry.register_stage(&config.stages[0]).await.is_err());

    let stage = registry.get("z").unwrap();
    let opts = WaitOptions::default().with_poll_interval(Duration::ZERO);
    stage.move_to(&Vector::new([4.0]), None).await.unwrap();
    stage.home(Some(&opts)).await.unwrap();
    assert_eq!(stage.position().await.unwrap(), [0.0]);

    assert!(registry.unregister("z"));
    assert!(registry.get("z").is_none());
}

#[test]
fn test_builtin_factories() {
    let registry = StageRegistry::with_builtin_factories();
    let types: Vec<String> = registry
        .list_factories()
        .into_iter()
        .map(|f| f.driver_type)
        .collect();
    assert_eq!(types, ["corvus", "grbl", "m3fs", "pi", "smc100", "tic"]);

    let smc = stage_hardware::StageConfig {
        config: toml::from_str("port = \"/dev/null\"\naddresses = [40]").unwrap(),
        ..stage_hardware::StageConfig::new("bad", "smc100")
    };
    assert!(registry.validate(&smc).is_err());
}
