//! Pololu Tic Stepper Motor Controller Driver
//!
//! Protocol Overview:
//! - Transport: USB vendor control transfers (VID 0x1FFB)
//! - Commands: request code = command byte, payload in wValue / wIndex
//! - Variables: little-endian block reads at fixed offsets
//! - Units: microsteps, single axis
//!
//! The controller drops back to safe start unless the host keeps reasserting
//! control. While homing, [`KeepAlive`] sends `EXIT_SAFE_START`
//! periodically until the homing flag clears or the task is dropped.

use crate::transport::{ControlTransport, TicLink};
use crate::variables::{
    motion_state, ErrorStatus, MiscFlags, OperationState, PlanningMode, TicCommand, TicDirection,
    TicVariable,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, MotionState, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::motion::{poll_until, WaitOptions};
use stage_core::Vector;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::instrument;

// =============================================================================
// TicFactory - DriverFactory implementation
// =============================================================================

fn default_timeout_ms() -> u64 {
    1000
}

fn default_keep_alive_ms() -> u64 {
    100
}

fn default_homing_timeout_ms() -> u64 {
    120_000
}

/// Configuration for the Tic driver
#[derive(Debug, Clone, Deserialize)]
pub struct TicConfig {
    /// USB serial number, required when several Tics are plugged in
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Control transfer timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Keep-alive and homing poll period in milliseconds (default: 100)
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Direction of the homing run (default: reverse)
    #[serde(default)]
    pub homing_direction: TicDirection,
    /// Upper bound for a blocking homing run (default: 120000)
    #[serde(default = "default_homing_timeout_ms")]
    pub homing_timeout_ms: u64,
}

impl Default for TicConfig {
    fn default() -> Self {
        Self {
            serial_number: None,
            timeout_ms: default_timeout_ms(),
            keep_alive_ms: default_keep_alive_ms(),
            homing_direction: TicDirection::default(),
            homing_timeout_ms: default_homing_timeout_ms(),
        }
    }
}

impl TicConfig {
    fn check(&self) -> StageResult<()> {
        if self.keep_alive_ms == 0 {
            return Err(StageError::InvalidArgument(
                "Tic keep_alive_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Factory for creating Tic driver instances.
pub struct TicFactory;

static TIC_CAPABILITIES: &[Capability] = &[
    Capability::Positioning,
    Capability::Homing,
    Capability::Kinematics,
    Capability::Stop,
];

impl DriverFactory for TicFactory {
    fn driver_type(&self) -> &'static str {
        "tic"
    }

    fn name(&self) -> &'static str {
        "Pololu Tic Stepper Motor Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        TIC_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: TicConfig = config.clone().try_into()?;
        cfg.check()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: TicConfig = config.try_into().context("Invalid Tic config")?;
            let transport = open_transport(&cfg).await?;
            let driver = Tic::new(transport, &cfg)
                .await
                .context("Tic initialization failed")?;

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("steps".to_string()),
                identification: cfg.serial_number.map(|s| format!("Pololu Tic {s}")),
            }))
        })
    }
}

#[cfg(feature = "usb")]
async fn open_transport(cfg: &TicConfig) -> Result<Arc<dyn ControlTransport>> {
    let transport = crate::usb::UsbTransport::open(
        cfg.serial_number.clone(),
        Duration::from_millis(cfg.timeout_ms),
    )
    .await
    .context("Failed to open Tic USB device")?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "usb"))]
async fn open_transport(_cfg: &TicConfig) -> Result<Arc<dyn ControlTransport>> {
    Err(StageError::FeatureNotEnabled("usb".to_string()).into())
}

// =============================================================================
// KeepAlive
// =============================================================================

/// Periodic background action, aborted on drop.
///
/// The action returns `Ok(true)` to keep running and `Ok(false)` to stop.
/// An error stops the task after logging it.
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Spawn `action` every `period`, first run immediately.
    pub fn spawn<F, Fut>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = StageResult<bool>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match action().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Tic keep-alive finished");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Tic keep-alive stopped");
                        return;
                    }
                }
            }
        });
        Self { handle }
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_misc_flags(link: &TicLink) -> StageResult<MiscFlags> {
    let raw = link.get_variable(TicVariable::MiscFlags).await?;
    MiscFlags::decode(raw)
}

// =============================================================================
// Tic
// =============================================================================

/// Driver for a Tic controller.
pub struct Tic {
    link: TicLink,
    bounds: AxisBounds,
    homing_direction: TicDirection,
    keep_alive_period: Duration,
    homing_timeout: Duration,
    keep_alive: Mutex<Option<KeepAlive>>,
}

impl Tic {
    /// Take control of the device over `transport` and energize the motor.
    pub async fn new(transport: Arc<dyn ControlTransport>, config: &TicConfig) -> StageResult<Self> {
        config.check()?;
        let driver = Self {
            link: TicLink::new(transport),
            bounds: AxisBounds::new(1),
            homing_direction: config.homing_direction,
            keep_alive_period: Duration::from_millis(config.keep_alive_ms),
            homing_timeout: Duration::from_millis(config.homing_timeout_ms),
            keep_alive: Mutex::new(None),
        };
        driver.energize().await?;
        tracing::info!("Tic energized");
        Ok(driver)
    }

    /// Transfer-level access.
    pub fn link(&self) -> &TicLink {
        &self.link
    }

    /// Enable the motor driver.
    pub async fn energize(&self) -> StageResult<()> {
        self.link.quick(TicCommand::Energize).await
    }

    /// Disable the motor driver.
    pub async fn deenergize(&self) -> StageResult<()> {
        self.link.quick(TicCommand::Deenergize).await
    }

    /// Reload settings and restart the controller state machine.
    pub async fn reset(&self) -> StageResult<()> {
        self.link.quick(TicCommand::Reset).await
    }

    /// Allow motion after a safe-start condition.
    pub async fn exit_safe_start(&self) -> StageResult<()> {
        self.link.quick(TicCommand::ExitSafeStart).await
    }

    /// Force safe start.
    pub async fn enter_safe_start(&self) -> StageResult<()> {
        self.link.quick(TicCommand::EnterSafeStart).await
    }

    /// Stop abruptly and hold position.
    pub async fn halt_and_hold(&self) -> StageResult<()> {
        self.stop_keep_alive();
        self.link.quick(TicCommand::HaltAndHold).await
    }

    /// Stop and redefine the current position.
    pub async fn halt_and_set_position(&self, position: i32) -> StageResult<()> {
        self.link
            .write_i32(TicCommand::HaltAndSetPosition, position)
            .await
    }

    /// Move to `position` steps.
    pub async fn set_target_position(&self, position: i32) -> StageResult<()> {
        self.link
            .write_i32(TicCommand::SetTargetPosition, position)
            .await
    }

    /// Run at `velocity` (microsteps per 10000 s).
    pub async fn set_target_velocity(&self, velocity: i32) -> StageResult<()> {
        self.link
            .write_i32(TicCommand::SetTargetVelocity, velocity)
            .await
    }

    /// Target position variable.
    pub async fn target_position(&self) -> StageResult<i64> {
        self.link.get_variable(TicVariable::TargetPosition).await
    }

    /// Target velocity variable.
    pub async fn target_velocity(&self) -> StageResult<i64> {
        self.link.get_variable(TicVariable::TargetVelocity).await
    }

    /// Current position in steps.
    pub async fn current_position(&self) -> StageResult<i64> {
        self.link.get_variable(TicVariable::CurrentPosition).await
    }

    /// Current velocity.
    pub async fn current_velocity(&self) -> StageResult<i64> {
        self.link.get_variable(TicVariable::CurrentVelocity).await
    }

    /// Temporary maximum speed.
    pub async fn set_max_speed(&self, speed: u32) -> StageResult<()> {
        self.link.write_32(TicCommand::SetMaxSpeed, speed).await
    }

    /// Temporary starting speed.
    pub async fn set_starting_speed(&self, speed: u32) -> StageResult<()> {
        self.link.write_32(TicCommand::SetStartingSpeed, speed).await
    }

    /// Temporary maximum acceleration.
    pub async fn set_max_acceleration(&self, acceleration: u32) -> StageResult<()> {
        self.link
            .write_32(TicCommand::SetMaxAcceleration, acceleration)
            .await
    }

    /// Temporary maximum deceleration.
    pub async fn set_max_deceleration(&self, deceleration: u32) -> StageResult<()> {
        self.link
            .write_32(TicCommand::SetMaxDeceleration, deceleration)
            .await
    }

    /// Step mode code (full, half, 1/4...).
    pub async fn set_step_mode(&self, mode: u8) -> StageResult<()> {
        self.link.write_7(TicCommand::SetStepMode, mode).await
    }

    /// Current limit code.
    pub async fn set_current_limit(&self, limit: u8) -> StageResult<()> {
        self.link.write_7(TicCommand::SetCurrentLimit, limit).await
    }

    /// Decoded `OPERATION_STATE`.
    pub async fn operation_state(&self) -> StageResult<OperationState> {
        let raw = self.link.get_variable(TicVariable::OperationState).await?;
        u8::try_from(raw)
            .ok()
            .and_then(OperationState::from_code)
            .ok_or_else(|| StageError::protocol("GET_VARIABLE OPERATION_STATE", raw.to_string()))
    }

    /// Decoded `PLANNING_MODE`.
    pub async fn planning_mode(&self) -> StageResult<PlanningMode> {
        let raw = self.link.get_variable(TicVariable::PlanningMode).await?;
        u8::try_from(raw)
            .ok()
            .and_then(PlanningMode::from_code)
            .ok_or_else(|| StageError::protocol("GET_VARIABLE PLANNING_MODE", raw.to_string()))
    }

    /// Decoded `MISC_FLAGS`.
    pub async fn misc_flags(&self) -> StageResult<MiscFlags> {
        read_misc_flags(&self.link).await
    }

    /// Errors currently stopping the motor.
    pub async fn error_status(&self) -> StageResult<ErrorStatus> {
        let raw = self.link.get_variable(TicVariable::ErrorStatus).await?;
        ErrorStatus::decode("ERROR_STATUS", raw)
    }

    /// Errors latched since the last call; reading clears them.
    pub async fn take_errors_occurred(&self) -> StageResult<ErrorStatus> {
        let raw = self
            .link
            .get_variable_and_clear_errors(TicVariable::ErrorsOccurred)
            .await?;
        ErrorStatus::decode("ERRORS_OCCURRED", raw)
    }

    /// Whether the homing procedure is running.
    pub async fn is_homing(&self) -> StageResult<bool> {
        Ok(self.misc_flags().await?.contains(MiscFlags::HOMING_ACTIVE))
    }

    /// Run the homing procedure.
    ///
    /// With `wait`, polls the homing flag and reasserts safe-start exit on
    /// every poll until homing ends. Without it, a [`KeepAlive`] task does
    /// the reasserting in the background.
    #[instrument(skip(self, wait), err)]
    pub async fn go_home(
        &self,
        direction: TicDirection,
        wait: Option<&WaitOptions>,
    ) -> StageResult<()> {
        self.link.write_7(TicCommand::GoHome, direction as u8).await?;
        match wait {
            Some(opts) => {
                self.stop_keep_alive();
                poll_until(opts, "Tic homing", || async move {
                    if self.is_homing().await? {
                        self.exit_safe_start().await?;
                        Ok::<bool, StageError>(false)
                    } else {
                        Ok(true)
                    }
                })
                .await
            }
            None => {
                self.start_keep_alive();
                Ok(())
            }
        }
    }

    /// Start reasserting safe-start exit until homing ends.
    pub fn start_keep_alive(&self) {
        let link = self.link.clone();
        let keep_alive = KeepAlive::spawn(self.keep_alive_period, move || {
            let link = link.clone();
            async move {
                link.quick(TicCommand::ExitSafeStart).await?;
                Ok(read_misc_flags(&link)
                    .await?
                    .contains(MiscFlags::HOMING_ACTIVE))
            }
        });
        *self.keep_alive.lock() = Some(keep_alive);
    }

    /// Abort the keep-alive task, if any.
    pub fn stop_keep_alive(&self) {
        self.keep_alive.lock().take();
    }

    /// Whether a keep-alive task is running.
    pub fn keep_alive_running(&self) -> bool {
        self.keep_alive
            .lock()
            .as_ref()
            .is_some_and(KeepAlive::is_running)
    }

    /// Wait options for a blocking homing run.
    pub fn homing_wait(&self) -> WaitOptions {
        WaitOptions::default()
            .with_poll_interval(self.keep_alive_period)
            .with_timeout(Some(self.homing_timeout))
    }

    async fn moving(&self, flags: MiscFlags) -> StageResult<bool> {
        if flags.contains(MiscFlags::HOMING_ACTIVE) || self.current_velocity().await? != 0 {
            return Ok(true);
        }
        if self.planning_mode().await? == PlanningMode::TargetPosition {
            return Ok(self.target_position().await? != self.current_position().await?);
        }
        Ok(false)
    }
}

#[async_trait]
impl Stage for Tic {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    async fn position(&self) -> StageResult<Vector> {
        Ok(Vector::new([self.current_position().await? as f64]))
    }

    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        let steps = target.x().round();
        if !steps.is_finite() || steps < f64::from(i32::MIN) || steps > f64::from(i32::MAX) {
            return Err(StageError::InvalidArgument(format!(
                "Tic target {} is outside the 32-bit step range",
                target.x()
            )));
        }
        self.set_target_position(steps as i32).await
    }

    async fn is_moving(&self) -> StageResult<bool> {
        let flags = self.misc_flags().await?;
        self.moving(flags).await
    }

    async fn start_home(&self) -> StageResult<()> {
        self.go_home(self.homing_direction, None).await
    }

    async fn state(&self) -> StageResult<MotionState> {
        let state = self.operation_state().await?;
        let flags = self.misc_flags().await?;
        let moving = self.moving(flags).await?;
        Ok(motion_state(state, flags, moving))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTic;

    fn config() -> TicConfig {
        TicConfig {
            keep_alive_ms: 1,
            ..TicConfig::default()
        }
    }

    async fn tic(mock: MockTic) -> (Tic, Arc<MockTic>) {
        let mock = Arc::new(mock);
        let tic = Tic::new(mock.clone(), &config()).await.unwrap();
        (tic, mock)
    }

    fn fast() -> WaitOptions {
        WaitOptions::default()
            .with_poll_interval(Duration::ZERO)
            .with_timeout(Some(Duration::from_secs(5)))
    }

    #[test]
    fn test_factory_validation() {
        let factory = TicFactory;
        assert_eq!(factory.driver_type(), "tic");
        assert!(factory.capabilities().contains(&Capability::Homing));

        let cfg: toml::Value = toml::from_str("homing_direction = \"forward\"").unwrap();
        assert!(factory.validate(&cfg).is_ok());
        let parsed: TicConfig = cfg.try_into().unwrap();
        assert_eq!(parsed.homing_direction, TicDirection::Forward);

        let bad: toml::Value = toml::from_str("keep_alive_ms = 0").unwrap();
        assert!(factory.validate(&bad).is_err());
    }

    #[cfg(not(feature = "usb"))]
    #[tokio::test]
    async fn test_build_without_usb_feature() {
        let cfg: toml::Value = toml::from_str("timeout_ms = 10").unwrap();
        let err = TicFactory.build(cfg).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::FeatureNotEnabled(_))
        ));
    }

    #[tokio::test]
    async fn test_new_energizes() {
        let (_tic, mock) = tic(MockTic::new()).await;
        assert_eq!(mock.writes(), vec![(0x85, 0, 0)]);
    }

    #[tokio::test]
    async fn test_position_and_move() {
        let (tic, mock) = tic(MockTic::new()).await;
        mock.set_i32(TicVariable::CurrentPosition, -400);
        assert_eq!(tic.position().await.unwrap(), [-400.0]);

        tic.set_position(&Vector::new([70000.4])).await.unwrap();
        assert_eq!(mock.writes().last(), Some(&(0xE0, 0x1170, 0x0001)));

        let err = tic.set_position(&Vector::new([1.0, 2.0])).await.unwrap_err();
        assert!(matches!(err, StageError::DimensionMismatch { .. }));
        let err = tic.move_unchecked(&Vector::new([1e12])).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_is_moving_from_target_and_velocity() {
        let (tic, mock) = tic(MockTic::new()).await;
        assert!(!tic.is_moving().await.unwrap());

        mock.set_i32(TicVariable::TargetPosition, 100);
        assert!(tic.is_moving().await.unwrap());
        assert_eq!(tic.state().await.unwrap(), MotionState::Moving);

        mock.set_i32(TicVariable::CurrentPosition, 100);
        assert!(!tic.is_moving().await.unwrap());

        mock.set_bytes(0x09, &[PlanningMode::TargetVelocity as u8]);
        mock.set_i32(TicVariable::CurrentVelocity, -50);
        assert!(tic.is_moving().await.unwrap());
    }

    #[tokio::test]
    async fn test_state_decoding() {
        let (tic, mock) = tic(MockTic::new()).await;
        assert_eq!(tic.state().await.unwrap(), MotionState::Idle);

        mock.set_bytes(0x00, &[OperationState::Deenergized as u8]);
        assert_eq!(tic.state().await.unwrap(), MotionState::Disabled);

        mock.set_bytes(0x00, &[3]);
        assert!(matches!(
            tic.state().await.unwrap_err(),
            StageError::Protocol { .. }
        ));
    }

    #[tokio::test]
    async fn test_blocking_home_reasserts_safe_start() {
        let (tic, mock) = tic(MockTic::new().with_homing_reads(3)).await;
        tic.go_home(TicDirection::Forward, Some(&fast())).await.unwrap();

        assert!(mock.writes().contains(&(0x97, 1, 0)));
        assert_eq!(mock.count(TicCommand::ExitSafeStart), 3);
        assert!(!mock.homing_active());
        assert!(!tic.keep_alive_running());
    }

    #[tokio::test]
    async fn test_home_times_out() {
        let (tic, _mock) = tic(MockTic::new().with_homing_reads(usize::MAX)).await;
        let opts = fast().with_timeout(Some(Duration::from_millis(20)));
        let err = tic.go_home(TicDirection::Reverse, Some(&opts)).await.unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_start_home_runs_keep_alive_until_done() {
        let (tic, mock) = tic(MockTic::new().with_homing_reads(5)).await;
        tic.home(Some(&fast())).await.unwrap();

        assert!(mock.writes().contains(&(0x97, 0, 0)));
        assert!(!mock.homing_active());
        poll_until(&fast(), "keep-alive exit", || async {
            Ok::<bool, StageError>(!tic.keep_alive_running())
        })
        .await
        .unwrap();
        assert!(mock.count(TicCommand::ExitSafeStart) >= 1);
    }

    #[tokio::test]
    async fn test_keep_alive_stops_on_error_and_drop() {
        let (tic, mock) = tic(MockTic::new().with_homing_reads(usize::MAX)).await;
        tic.start_home().await.unwrap();
        assert!(tic.keep_alive_running());
        tic.stop_keep_alive();
        assert!(!tic.keep_alive_running());

        tic.start_keep_alive();
        mock.fail_reads();
        poll_until(&fast(), "keep-alive exit", || async {
            Ok::<bool, StageError>(!tic.keep_alive_running())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_move_unchecked_rejects_wrong_dimension() {
        let (tic, mock) = tic(MockTic::new()).await;
        let before = mock.writes().len();
        for target in [Vector::zeros(0), Vector::new([1.0, 2.0])] {
            assert!(matches!(
                tic.move_unchecked(&target).await,
                Err(StageError::DimensionMismatch { expected: 1, .. })
            ));
        }
        assert_eq!(mock.writes().len(), before);
    }

    #[tokio::test]
    async fn test_halt_and_errors() {
        let (tic, mock) = tic(MockTic::new()).await;
        tic.halt_and_hold().await.unwrap();
        tic.halt_and_set_position(-1).await.unwrap();
        tic.reset().await.unwrap();
        let writes = mock.writes();
        assert!(writes.contains(&(0x89, 0, 0)));
        assert!(writes.contains(&(0xEC, 0xffff, 0xffff)));
        assert!(writes.contains(&(0xB0, 0, 0)));

        mock.set_bytes(0x02, &[0x80, 0x00]);
        let status = tic.error_status().await.unwrap();
        assert_eq!(status, ErrorStatus::SAFE_START_VIOLATION);
        assert_eq!(status.fault().unwrap().code, 0x80);

        mock.set_bytes(0x04, &[0x40, 0, 0, 0]);
        assert_eq!(
            tic.take_errors_occurred().await.unwrap(),
            ErrorStatus::COMMAND_TIMEOUT
        );
        assert!(tic.take_errors_occurred().await.unwrap().is_empty());

        mock.set_bytes(0x02, &[0x00, 0x02]);
        assert!(matches!(
            tic.error_status().await,
            Err(StageError::Protocol { .. })
        ));
        mock.set_bytes(0x01, &[0x81]);
        assert!(matches!(
            tic.is_moving().await,
            Err(StageError::Protocol { .. })
        ));
    }
}
