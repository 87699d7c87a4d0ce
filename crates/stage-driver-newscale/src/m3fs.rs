//! New Scale Technologies M3-FS Focus Module Driver
//!
//! Protocol Overview:
//! - Format: framed ASCII over a virtual COM port, 250000 baud, 8N2
//! - Frames: `<NN data>\r` in both directions, `NN` = command ID
//! - Positions: signed encoder counts, big-endian hex
//! - Resolution: 0.5 um per count unless configured otherwise
//!
//! The module is single axis. Moves block until the closed-loop status word
//! reports the motor stopped.

use crate::frame::{encode, read_frame, split_reply, ClosedLoopStatus, M3fsCommand};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::motion::{poll_until, WaitOptions};
use stage_core::serial::{open_serial_async, wrap_shared, write_frame, SerialSettings, SharedPort};
use stage_core::Vector;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Firmware versions the driver was tested with.
pub const SUPPORTED_VERSIONS: &[&str] = &["1 VER 4.7.3 M3-FS"];

// =============================================================================
// M3fsFactory - DriverFactory implementation
// =============================================================================

fn default_baud_rate() -> u32 {
    250000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_resolution_um() -> f64 {
    0.5
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_move_timeout_ms() -> u64 {
    30_000
}

/// Configuration for the M3-FS driver
#[derive(Debug, Clone, Deserialize)]
pub struct M3fsConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default: 250000)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Micrometers per encoder count (default: 0.5)
    #[serde(default = "default_resolution_um")]
    pub resolution_um: f64,
    /// Position reached by `home`, in micrometers (default: 0)
    #[serde(default)]
    pub home_position_um: f64,
    /// Status poll interval while a move settles (default: 10)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for a move to settle (default: 30000)
    #[serde(default = "default_move_timeout_ms")]
    pub move_timeout_ms: u64,
}

impl M3fsConfig {
    /// Defaults for the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            resolution_um: default_resolution_um(),
            home_position_um: 0.0,
            poll_interval_ms: default_poll_interval_ms(),
            move_timeout_ms: default_move_timeout_ms(),
        }
    }

    fn check(&self) -> StageResult<()> {
        if !(self.resolution_um.is_finite() && self.resolution_um > 0.0) {
            return Err(StageError::InvalidArgument(format!(
                "M3-FS resolution must be positive, got {}",
                self.resolution_um
            )));
        }
        Ok(())
    }
}

/// Factory for creating M3-FS driver instances.
pub struct M3fsFactory;

static M3FS_CAPABILITIES: &[Capability] = &[Capability::Positioning, Capability::Homing];

impl DriverFactory for M3fsFactory {
    fn driver_type(&self) -> &'static str {
        "m3fs"
    }

    fn name(&self) -> &'static str {
        "New Scale M3-FS Focus Module"
    }

    fn capabilities(&self) -> &'static [Capability] {
        M3FS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: M3fsConfig = config.clone().try_into()?;
        cfg.check()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: M3fsConfig = config.try_into().context("Invalid M3-FS config")?;
            let driver = M3fs::connect(&cfg)
                .await
                .with_context(|| format!("M3-FS initialization failed on {}", cfg.port))?;
            let version = driver.version.clone();

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("um".to_string()),
                identification: Some(version),
            }))
        })
    }
}

// =============================================================================
// M3fs
// =============================================================================

/// Driver for the M3-FS focus module.
pub struct M3fs {
    port: SharedPort,
    bounds: AxisBounds,
    timeout: Duration,
    resolution_um: f64,
    home_position_um: f64,
    settle: WaitOptions,
    version: String,
}

impl M3fs {
    /// Open the serial port and check the firmware version.
    pub async fn connect(config: &M3fsConfig) -> StageResult<Self> {
        config.check()?;
        let port = open_serial_async(
            &config.port,
            SerialSettings::new(config.baud_rate).with_two_stop_bits(),
            "M3-FS",
        )
        .await?;
        Self::with_port(wrap_shared(Box::new(port)), config).await
    }

    /// Check the firmware version over an already open port.
    ///
    /// A garbled handshake is a connection failure; a well-formed but
    /// unknown version string is reported as unsupported.
    pub async fn with_port(port: SharedPort, config: &M3fsConfig) -> StageResult<Self> {
        config.check()?;
        let mut driver = Self {
            port,
            bounds: AxisBounds::new(1),
            timeout: Duration::from_millis(config.timeout_ms),
            resolution_um: config.resolution_um,
            home_position_um: config.home_position_um,
            settle: WaitOptions::default()
                .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
                .with_timeout(Some(Duration::from_millis(config.move_timeout_ms))),
            version: String::new(),
        };

        let version = match driver.command(M3fsCommand::ReadFirmwareVersion, None).await {
            Ok(version) => version.unwrap_or_default(),
            Err(e @ (StageError::Protocol { .. } | StageError::Timeout { .. })) => {
                return Err(StageError::ConnectionFailure(format!(
                    "M3-FS handshake failed: {e}"
                )))
            }
            Err(e) => return Err(e),
        };
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(StageError::VersionNotSupported(version));
        }
        tracing::info!(%version, "M3-FS connected");
        driver.version = version;
        Ok(driver)
    }

    /// Firmware version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Send a command and return the reply data, if any.
    pub async fn command(
        &self,
        command: M3fsCommand,
        data: Option<&str>,
    ) -> StageResult<Option<String>> {
        let frame = encode(command, data)?;
        let operation = String::from_utf8_lossy(&frame).trim_end().to_string();
        let payload = {
            let mut guard = self.port.lock().await;
            write_frame(guard.get_mut(), &frame).await?;
            read_frame(&mut *guard, self.timeout, &operation).await?
        };
        Ok(split_reply(command, &payload)?.map(str::to_string))
    }

    /// Query motor status, position and position error.
    pub async fn closed_loop_status(&self) -> StageResult<ClosedLoopStatus> {
        let command = M3fsCommand::ViewClosedLoopStatus;
        let data = self.command(command, None).await?.ok_or_else(|| {
            StageError::protocol(format!("<{:02}>", command.id()), "reply without data")
        })?;
        ClosedLoopStatus::parse(&data)
    }
}

#[async_trait]
impl Stage for M3fs {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    async fn position(&self) -> StageResult<Vector> {
        let status = self.closed_loop_status().await?;
        Ok(Vector::new([status.position as f64 * self.resolution_um]))
    }

    /// Send the move and block until the motor stops.
    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        let counts = (target.x() / self.resolution_um).round();
        if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&counts) {
            return Err(StageError::InvalidArgument(format!(
                "M3-FS target {} um is beyond the 32 bit counter",
                target.x()
            )));
        }
        let data = format!("{:08x}", counts as i32);
        self.command(M3fsCommand::MoveToTarget, Some(&data)).await?;

        poll_until(&self.settle, "M3-FS move", || async move {
            Ok::<bool, StageError>(!self.is_moving().await?)
        })
        .await
    }

    async fn is_moving(&self) -> StageResult<bool> {
        Ok(self.closed_loop_status().await?.is_moving())
    }

    /// The module has no reference switch; homing moves to the configured
    /// home position.
    async fn start_home(&self) -> StageResult<()> {
        self.set_position(&Vector::new([self.home_position_um])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::testing::{scripted_port, Exchange};

    const HANDSHAKE_REPLY: &str = "<01 1 VER 4.7.3 M3-FS>\r";

    fn config() -> M3fsConfig {
        let mut cfg = M3fsConfig::new("test");
        cfg.timeout_ms = 200;
        cfg.poll_interval_ms = 0;
        cfg
    }

    fn with_handshake(rest: Vec<Exchange>) -> Vec<Exchange> {
        let mut script = vec![Exchange::new("<01>\r", HANDSHAKE_REPLY)];
        script.extend(rest);
        script
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = M3fsFactory;
        assert_eq!(factory.driver_type(), "m3fs");
        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            resolution_um = 0.25
        });
        assert!(factory.validate(&valid).is_ok());
        let invalid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            resolution_um = 0.0
        });
        assert!(factory.validate(&invalid).is_err());
    }

    #[tokio::test]
    async fn test_handshake_and_position() {
        let (port, device) = scripted_port(with_handshake(vec![Exchange::new(
            "<10>\r",
            "<10 000000 00000064 00000000>\r",
        )]));
        let m3fs = M3fs::with_port(port, &config()).await.unwrap();
        assert_eq!(m3fs.version(), "1 VER 4.7.3 M3-FS");
        assert_eq!(m3fs.position().await.unwrap(), [50.0]);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_unknown_version() {
        let (port, device) = scripted_port(vec![Exchange::new(
            "<01>\r",
            "<01 1 VER 5.0.0 M3-FS>\r",
        )]);
        let err = M3fs::with_port(port, &config()).await.err().unwrap();
        assert!(matches!(err, StageError::VersionNotSupported(v) if v == "1 VER 5.0.0 M3-FS"));
        device.finish().await;
    }

    #[tokio::test]
    async fn test_garbled_handshake_is_connection_failure() {
        let (port, device) = scripted_port(vec![Exchange::new("<01>\r", "<01 1 VER\n")]);
        let err = M3fs::with_port(port, &config()).await.err().unwrap();
        assert!(matches!(err, StageError::ConnectionFailure(_)));
        device.finish().await;
    }

    #[tokio::test]
    async fn test_move_waits_for_motor_to_stop() {
        let (port, device) = scripted_port(with_handshake(vec![
            Exchange::new("<08 000000c8>\r", "<08>\r"),
            Exchange::new("<10>\r", "<10 000004 00000010 00000000>\r"),
            Exchange::new("<10>\r", "<10 000004 000000a0 00000000>\r"),
            Exchange::new("<10>\r", "<10 000000 000000c8 00000000>\r"),
            Exchange::new("<08 fffffffe>\r", "<08>\r"),
            Exchange::new("<10>\r", "<10 000000 fffffffe 00000000>\r"),
        ]));
        let m3fs = M3fs::with_port(port, &config()).await.unwrap();
        m3fs.set_position(&Vector::new([100.0])).await.unwrap();
        m3fs.set_position(&Vector::new([-1.0])).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_command_id_mismatch() {
        let (port, device) = scripted_port(with_handshake(vec![Exchange::new(
            "<10>\r",
            "<08>\r",
        )]));
        let m3fs = M3fs::with_port(port, &config()).await.unwrap();
        match m3fs.is_moving().await {
            Err(StageError::Protocol { query, response }) => {
                assert_eq!(query, "<10>");
                assert_eq!(response, "<08>");
            }
            other => panic!("unexpected result {other:?}"),
        }
        device.finish().await;
    }

    #[tokio::test]
    async fn test_missing_trailing_cr() {
        let (port, device) = scripted_port(with_handshake(vec![Exchange::new(
            "<10>\r",
            "<10 000000 00000000 00000000>\n",
        )]));
        let m3fs = M3fs::with_port(port, &config()).await.unwrap();
        assert!(matches!(
            m3fs.position().await,
            Err(StageError::Protocol { .. })
        ));
        device.finish().await;
    }

    #[tokio::test]
    async fn test_home_moves_to_reference() {
        let mut cfg = config();
        cfg.home_position_um = 10.0;
        let (port, device) = scripted_port(with_handshake(vec![
            Exchange::new("<08 00000014>\r", "<08>\r"),
            Exchange::new("<10>\r", "<10 000000 00000014 00000000>\r"),
        ]));
        let m3fs = M3fs::with_port(port, &cfg).await.unwrap();
        m3fs.home(None).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_out_of_range_rejected_before_io() {
        let (port, device) = scripted_port(with_handshake(vec![]));
        let m3fs = M3fs::with_port(port, &config()).await.unwrap();
        m3fs.bounds()
            .set_maximums(Some(vec![Some(1000.0)]))
            .unwrap();
        assert!(matches!(
            m3fs.set_position(&Vector::new([2000.0])).await,
            Err(StageError::OutOfRange { .. })
        ));
        assert!(matches!(
            m3fs.set_position(&Vector::new([1.0, 2.0])).await,
            Err(StageError::DimensionMismatch { .. })
        ));
        device.finish().await;
    }
}
