//! Corvus Eco XYZ Stage Controller Driver
//!
//! Protocol Overview:
//! - Format: ASCII over RS-232, 57600 baud, 8N1
//! - Commands: terminated by a single trailing space (`"p "`)
//! - Replies: terminated by CR-LF, numeric fields separated by whitespace
//! - Units: forced to micrometers for every axis during initialization
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_corvus::CorvusFactory;
//!
//! registry.register_factory(CorvusFactory);
//!
//! // stages.toml
//! // [[stages]]
//! // id = "xyz"
//! // driver = "corvus"
//! // config = { port = "/dev/ttyUSB0" }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::motion::{poll_until, WaitOptions};
use stage_core::serial::{
    open_serial_async, read_line_until, wrap_shared, write_frame, SerialSettings, SharedPort,
};
use stage_core::Vector;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default baud rate of the controller.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Unit code for micrometers.
const UNIT_MICROMETER: i64 = 1;

/// `getcaldone` value once both limit switches of an axis were reached.
const CALIBRATION_DONE: i64 = 3;

// =============================================================================
// CorvusFactory - DriverFactory implementation
// =============================================================================

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_joystick() -> bool {
    true
}

/// Configuration for the Corvus driver
#[derive(Debug, Clone, Deserialize)]
pub struct CorvusConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default: 57600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Enable the joystick after initialization (default: true)
    #[serde(default = "default_joystick")]
    pub joystick: bool,
}

/// Factory for creating Corvus driver instances.
pub struct CorvusFactory;

static CORVUS_CAPABILITIES: &[Capability] = &[
    Capability::Positioning,
    Capability::Homing,
    Capability::RelativeMove,
    Capability::SetOrigin,
    Capability::Kinematics,
    Capability::Calibration,
];

impl DriverFactory for CorvusFactory {
    fn driver_type(&self) -> &'static str {
        "corvus"
    }

    fn name(&self) -> &'static str {
        "Corvus Eco XYZ Stage Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CORVUS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: CorvusConfig = config.clone().try_into()?;
        if cfg.port.is_empty() {
            anyhow::bail!("Corvus port must not be empty");
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: CorvusConfig = config.try_into().context("Invalid Corvus config")?;
            let driver = Corvus::connect(&cfg)
                .await
                .with_context(|| format!("Corvus initialization failed on {}", cfg.port))?;

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("um".to_string()),
                identification: None,
            }))
        })
    }
}

// =============================================================================
// Corvus
// =============================================================================

/// Driver for the Corvus Eco three axis controller.
pub struct Corvus {
    port: SharedPort,
    bounds: AxisBounds,
    timeout: Duration,
}

impl Corvus {
    /// Open the serial port and initialize the controller.
    pub async fn connect(config: &CorvusConfig) -> StageResult<Self> {
        let port = open_serial_async(
            &config.port,
            SerialSettings::new(config.baud_rate),
            "Corvus",
        )
        .await?;
        Self::with_port(
            wrap_shared(Box::new(port)),
            Duration::from_millis(config.timeout_ms),
            config.joystick,
        )
        .await
    }

    /// Initialize the controller over an already open port.
    pub async fn with_port(port: SharedPort, timeout: Duration, joystick: bool) -> StageResult<Self> {
        let driver = Self {
            port,
            bounds: AxisBounds::new(3),
            timeout,
        };
        driver.init(joystick).await?;
        Ok(driver)
    }

    #[instrument(skip(self), err)]
    async fn init(&self, joystick: bool) -> StageResult<()> {
        // Move commands carry three coordinates.
        self.send("3 setdim").await?;
        self.send(&format!("{} -1 setunit", UNIT_MICROMETER)).await?;

        // Moving with the wrong unit is dangerous, so verify the echo.
        let query = "-1 getunit";
        let res = self.send_receive(query).await?;
        let units = parse_ints(query, &res)?;
        if units.is_empty() || units.iter().any(|u| *u != UNIT_MICROMETER) {
            return Err(StageError::protocol(query, res));
        }

        if joystick {
            self.enable_joystick().await?;
        }
        tracing::info!("Corvus initialized, units set to micrometers");
        Ok(())
    }

    /// Send a command. The trailing space terminator is appended here.
    pub async fn send(&self, command: &str) -> StageResult<()> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), format!("{} ", command).as_bytes()).await
    }

    /// Send a command and return its CR-LF terminated reply.
    pub async fn send_receive(&self, command: &str) -> StageResult<String> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), format!("{} ", command).as_bytes()).await?;
        read_line_until(&mut *guard, b"\r\n", self.timeout, command).await
    }

    async fn query_f64(&self, command: &str) -> StageResult<f64> {
        let res = self.send_receive(command).await?;
        res.trim()
            .parse()
            .map_err(|_| StageError::protocol(command, res))
    }

    async fn query_i64(&self, command: &str) -> StageResult<i64> {
        let res = self.send_receive(command).await?;
        res.trim()
            .parse()
            .map_err(|_| StageError::protocol(command, res))
    }

    /// Run the limit-switch calibration on all three axes and wait for it.
    ///
    /// Check for collisions before calling this.
    #[instrument(skip(self, opts), err)]
    pub async fn calibrate(&self, opts: &WaitOptions) -> StageResult<()> {
        self.send("cal").await?;
        self.send("rm").await?;
        self.wait_calibration(3, opts).await
    }

    /// Calibrate X and Y only. Z is disabled for the duration.
    #[instrument(skip(self, opts), err)]
    pub async fn calibrate_xy(&self, opts: &WaitOptions) -> StageResult<()> {
        self.send("3 3 setaxis").await?;
        self.send("cal").await?;
        self.send("rm").await?;
        let waited = self.wait_calibration(2, opts).await;
        // Z is re-enabled even when the wait failed.
        self.send("1 3 setaxis").await?;
        waited
    }

    async fn wait_calibration(&self, axes: usize, opts: &WaitOptions) -> StageResult<()> {
        for axis in 1..=axes {
            let query = format!("{} getcaldone", axis);
            let query = query.as_str();
            poll_until(opts, "calibration", || async move {
                Ok::<bool, StageError>(self.query_i64(query).await? == CALIBRATION_DONE)
            })
            .await?;
        }
        Ok(())
    }

    /// Move relative to the current position and wait for the move to finish.
    #[instrument(skip(self, opts), fields(offset = %offset), err)]
    pub async fn move_relative(&self, offset: &Vector, opts: &WaitOptions) -> StageResult<()> {
        self.bounds.check_dimension(offset)?;
        self.send("3 setdim").await?;
        self.send(&format!("{} {} {} rmove", offset.x(), offset.y(), offset.z()))
            .await?;
        self.wait_move_finished(opts).await
    }

    /// Define the current coordinates as origin.
    pub async fn set_origin(&self) -> StageResult<()> {
        self.send("0 0 0 setpos").await
    }

    /// Enable the joystick (manual mode).
    pub async fn enable_joystick(&self) -> StageResult<()> {
        self.send("1 j").await
    }

    /// Motor velocity in µm/s.
    pub async fn velocity(&self) -> StageResult<f64> {
        self.query_f64("gv").await
    }

    /// Update the motor velocity in µm/s.
    #[instrument(skip(self), err)]
    pub async fn set_velocity(&self, value: f64) -> StageResult<()> {
        if value < 0.0 {
            return Err(StageError::InvalidArgument(
                "Velocity parameter cannot be negative".into(),
            ));
        }
        self.send(&format!("{} sv", value)).await
    }

    /// Motor acceleration in µm/s².
    pub async fn acceleration(&self) -> StageResult<f64> {
        self.query_f64("ga").await
    }

    /// Update the motor acceleration in µm/s².
    #[instrument(skip(self), err)]
    pub async fn set_acceleration(&self, value: f64) -> StageResult<()> {
        if value < 0.0 {
            return Err(StageError::InvalidArgument(
                "Acceleration parameter cannot be negative".into(),
            ));
        }
        self.send(&format!("{} sa", value)).await
    }

    /// Save current parameters in non-volatile memory.
    pub async fn save(&self) -> StageResult<()> {
        self.send("save").await
    }

    /// Reactivate the last saved parameters.
    ///
    /// This may change units; re-run initialization afterwards if unsure.
    pub async fn restore(&self) -> StageResult<()> {
        self.send("restore").await
    }
}

fn parse_ints(query: &str, res: &str) -> StageResult<Vec<i64>> {
    res.split_whitespace()
        .map(|t| t.parse().map_err(|_| StageError::protocol(query, res)))
        .collect()
}

#[async_trait]
impl Stage for Corvus {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    #[instrument(skip(self), err)]
    async fn position(&self) -> StageResult<Vector> {
        let res = self.send_receive("p").await?;
        let values = res
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| StageError::protocol("p", res.clone()))?;
        Ok(Vector::from(values))
    }

    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        self.send("3 setdim").await?;
        self.send(&format!("{} {} {} move", target.x(), target.y(), target.z()))
            .await
    }

    async fn is_moving(&self) -> StageResult<bool> {
        Ok(self.query_i64("st").await? & 1 != 0)
    }

    /// Limit-switch move. Check for collisions before calling this.
    #[instrument(skip(self), err)]
    async fn start_home(&self) -> StageResult<()> {
        self.send("cal").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::testing::{scripted_port, Exchange};
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn init_script() -> Vec<Exchange> {
        vec![
            Exchange::silent("3 setdim "),
            Exchange::silent("1 -1 setunit "),
            Exchange::new("-1 getunit ", "1 1 1\r\n"),
            Exchange::silent("1 j "),
        ]
    }

    fn with_init(rest: Vec<Exchange>) -> Vec<Exchange> {
        let mut script = init_script();
        script.extend(rest);
        script
    }

    fn fast() -> WaitOptions {
        WaitOptions::default().with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = CorvusFactory;
        assert_eq!(factory.driver_type(), "corvus");
        assert!(factory.capabilities().contains(&Capability::Calibration));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = CorvusFactory;
        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
        });
        assert!(factory.validate(&valid).is_ok());

        let cfg: CorvusConfig = valid.try_into().unwrap();
        assert_eq!(cfg.baud_rate, 57600);
        assert!(cfg.joystick);

        let missing_port = toml::Value::Table(toml::toml! {
            baud_rate = 9600
        });
        assert!(factory.validate(&missing_port).is_err());
    }

    #[tokio::test]
    async fn test_init_and_position() {
        let (port, device) = scripted_port(with_init(vec![Exchange::new(
            "p ",
            "10.5 -2 3000\r\n",
        )]));
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        assert_eq!(corvus.position().await.unwrap(), [10.5, -2.0, 3000.0]);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_unit_mismatch_aborts_init() {
        let (port, device) = scripted_port(vec![
            Exchange::silent("3 setdim "),
            Exchange::silent("1 -1 setunit "),
            Exchange::new("-1 getunit ", "1 2 1\r\n"),
        ]);
        let err = Corvus::with_port(port, TIMEOUT, true).await.err().unwrap();
        assert!(matches!(err, StageError::Protocol { .. }));
        device.finish().await;
    }

    #[tokio::test]
    async fn test_move_and_wait() {
        let (port, device) = scripted_port(with_init(vec![
            Exchange::silent("3 setdim "),
            Exchange::silent("1 2.5 -3 move "),
            Exchange::new("st ", "1\r\n"),
            Exchange::new("st ", "0\r\n"),
        ]));
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        corvus
            .move_to(&Vector::new([1.0, 2.5, -3.0]), Some(&fast()))
            .await
            .unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_invalid_moves_write_nothing() {
        let (port, device) = scripted_port(init_script());
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        corvus
            .bounds()
            .set_maximums(Some(vec![Some(100.0), None, None]))
            .unwrap();
        assert!(corvus
            .set_position(&Vector::new([1.0, 2.0]))
            .await
            .is_err());
        assert!(corvus
            .set_position(&Vector::new([101.0, 0.0, 0.0]))
            .await
            .is_err());
        // Any stray write would be left unread here.
        let mut stream = device.finish().await;
        let mut buf = [0u8; 1];
        let pending = tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_calibrate_xy_restores_z() {
        let (port, device) = scripted_port(with_init(vec![
            Exchange::silent("3 3 setaxis "),
            Exchange::silent("cal "),
            Exchange::silent("rm "),
            Exchange::new("1 getcaldone ", "1\r\n"),
            Exchange::new("1 getcaldone ", "3\r\n"),
            Exchange::new("2 getcaldone ", "3\r\n"),
            Exchange::silent("1 3 setaxis "),
        ]));
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        corvus.calibrate_xy(&fast()).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_kinematics() {
        let (port, device) = scripted_port(with_init(vec![
            Exchange::new("gv ", "12.5\r\n"),
            Exchange::silent("20 sv "),
            Exchange::new("ga ", "100\r\n"),
            Exchange::silent("50 sa "),
        ]));
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        assert_eq!(corvus.velocity().await.unwrap(), 12.5);
        assert!(matches!(
            corvus.set_velocity(-1.0).await,
            Err(StageError::InvalidArgument(_))
        ));
        corvus.set_velocity(20.0).await.unwrap();
        assert_eq!(corvus.acceleration().await.unwrap(), 100.0);
        assert!(corvus.set_acceleration(-0.5).await.is_err());
        corvus.set_acceleration(50.0).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_relative_move_and_origin() {
        let (port, device) = scripted_port(with_init(vec![
            Exchange::silent("3 setdim "),
            Exchange::silent("0 0 -5 rmove "),
            Exchange::new("st ", "0\r\n"),
            Exchange::silent("0 0 0 setpos "),
            Exchange::silent("cal "),
        ]));
        let corvus = Corvus::with_port(port, TIMEOUT, true).await.unwrap();
        corvus
            .move_relative(&Vector::new([0.0, 0.0, -5.0]), &fast())
            .await
            .unwrap();
        corvus.set_origin().await.unwrap();
        corvus.home(None).await.unwrap();
        device.finish().await;
    }
}
