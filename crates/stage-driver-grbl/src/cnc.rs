//! GRBL CNC Router Driver
//!
//! Reference: GRBL v1.1 interface documentation
//!
//! Protocol Overview:
//! - Format: LF-terminated ASCII lines over USB serial, 115200 baud, 8N1
//! - Synchronous commands are acknowledged by `ok` (or `error:N`)
//! - Real-time commands (`?`, Ctrl-X) are single bytes without terminator
//! - Status reports: `<State|Key:v1,v2|Key:v>`
//! - `ALARM:N` lines are followed by a message line
//!
//! Positions are reported in work coordinates: `WPos` when the status mask
//! asks for it, otherwise `MPos - WCO`. GRBL only sends `WCO` every few
//! reports, so the last offset seen is cached.

use crate::alarms::GrblFault;
use crate::settings::{parse_settings, GrblSetting, SettingValue};
use crate::status::{GrblState, StatusReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, MotionState, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::limits::DRAIN_TIMEOUT;
use stage_core::serial::{
    drain_serial_buffer, open_serial_async, read_line_until, wrap_shared, write_frame, DynSerial,
    SerialSettings, SharedPort,
};
use stage_core::Vector;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::instrument;

/// Soft reset real-time command (Ctrl-X).
const SOFT_RESET: &[u8] = b"\x18";

/// Sent after reset when the machine needs homing or unlocking.
const LOCKED_MESSAGE: &str = "[MSG:'$H'|'$X' to unlock]";

/// Reply to a successful `$X`.
const UNLOCKED_MESSAGE: &str = "[MSG:Caution: Unlocked]";

// =============================================================================
// CncFactory - DriverFactory implementation
// =============================================================================

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_reset_delay_ms() -> u64 {
    50
}

fn default_homing_timeout_ms() -> u64 {
    120_000
}

fn default_num_axis() -> usize {
    3
}

fn default_wco_polls() -> usize {
    30
}

/// Configuration for the GRBL driver
#[derive(Debug, Clone, Deserialize)]
pub struct CncConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Settle delay after the soft reset byte (default: 50)
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
    /// Upper bound for the `$H` homing cycle (default: 120000)
    #[serde(default = "default_homing_timeout_ms")]
    pub homing_timeout_ms: u64,
    /// Number of driven axes, 1 to 3 (default: 3)
    #[serde(default = "default_num_axis")]
    pub num_axis: usize,
    /// Status reports to poll while waiting for a work coordinate offset (default: 30)
    #[serde(default = "default_wco_polls")]
    pub wco_polls: usize,
}

impl CncConfig {
    /// Defaults for the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reset_delay_ms: default_reset_delay_ms(),
            homing_timeout_ms: default_homing_timeout_ms(),
            num_axis: default_num_axis(),
            wco_polls: default_wco_polls(),
        }
    }

    fn check(&self) -> StageResult<()> {
        if !(1..=3).contains(&self.num_axis) {
            return Err(StageError::InvalidArgument(format!(
                "GRBL num_axis must be 1-3, got {}",
                self.num_axis
            )));
        }
        Ok(())
    }
}

/// Factory for creating GRBL driver instances.
pub struct CncFactory;

static CNC_CAPABILITIES: &[Capability] = &[
    Capability::Positioning,
    Capability::Homing,
    Capability::SetOrigin,
    Capability::Settings,
];

impl DriverFactory for CncFactory {
    fn driver_type(&self) -> &'static str {
        "grbl"
    }

    fn name(&self) -> &'static str {
        "GRBL CNC Router"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CNC_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: CncConfig = config.clone().try_into()?;
        cfg.check()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: CncConfig = config.try_into().context("Invalid GRBL config")?;
            let driver = CncRouter::connect(&cfg)
                .await
                .with_context(|| format!("GRBL initialization failed on {}", cfg.port))?;
            let banner = driver.banner.clone();

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("mm".to_string()),
                identification: Some(banner),
            }))
        })
    }
}

// =============================================================================
// CncRouter
// =============================================================================

fn fault(f: GrblFault) -> StageError {
    StageError::Fault(f.into())
}

fn alarm(line: &str, message: String) -> StageError {
    match GrblFault::alarm(line, message) {
        Some(f) => fault(f),
        None => StageError::protocol("ALARM", line),
    }
}

/// Driver for GRBL based CNC routers.
pub struct CncRouter {
    port: SharedPort,
    bounds: AxisBounds,
    timeout: Duration,
    homing_timeout: Duration,
    wco_polls: usize,
    /// Last work coordinate offset seen in a status report.
    wco: Mutex<Option<Vec<f64>>>,
    banner: String,
}

impl CncRouter {
    /// Open the serial port and reset the controller.
    pub async fn connect(config: &CncConfig) -> StageResult<Self> {
        config.check()?;
        let port = open_serial_async(
            &config.port,
            SerialSettings::new(config.baud_rate),
            "GRBL",
        )
        .await?;
        Self::with_port(wrap_shared(Box::new(port)), config).await
    }

    /// Reset the controller over an already open port.
    pub async fn with_port(port: SharedPort, config: &CncConfig) -> StageResult<Self> {
        config.check()?;
        let mut driver = Self {
            port,
            bounds: AxisBounds::new(config.num_axis),
            timeout: Duration::from_millis(config.timeout_ms),
            homing_timeout: Duration::from_millis(config.homing_timeout_ms),
            wco_polls: config.wco_polls.max(1),
            wco: Mutex::new(None),
            banner: String::new(),
        };
        driver.banner = driver
            .reset(Duration::from_millis(config.reset_delay_ms))
            .await?;
        Ok(driver)
    }

    /// Banner reported at the last reset (e.g. `Grbl 1.1f ['$' for help]`).
    pub fn banner(&self) -> &str {
        &self.banner
    }

    async fn read_line(
        &self,
        port: &mut BufReader<DynSerial>,
        timeout: Duration,
        operation: &str,
    ) -> StageResult<String> {
        let line = read_line_until(port, b"\n", timeout, operation).await?;
        Ok(line.trim().to_string())
    }

    /// Collect non-empty lines until `until`. Error and alarm lines abort.
    async fn receive_lines(
        &self,
        port: &mut BufReader<DynSerial>,
        until: &str,
        timeout: Duration,
        operation: &str,
    ) -> StageResult<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line(port, timeout, operation).await?;
            if line == until {
                return Ok(lines);
            }
            if let Some(f) = GrblFault::parse_error(&line) {
                return Err(fault(f));
            }
            if GrblFault::parse_alarm_code(&line).is_some() {
                let message = self.read_line(port, timeout, operation).await?;
                return Err(alarm(&line, message));
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }

    /// Send a synchronous command and return the lines before `ok`.
    pub async fn command(&self, command: &str) -> StageResult<Vec<String>> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), format!("{command}\n").as_bytes()).await?;
        self.receive_lines(&mut guard, "ok", self.timeout, command)
            .await
    }

    /// Soft reset and check the banner. Unlocks automatically when the
    /// controller asks for it. Returns the banner line.
    #[instrument(skip(self), err)]
    pub async fn reset(&self, settle: Duration) -> StageResult<String> {
        let lines = {
            let mut guard = self.port.lock().await;
            drain_serial_buffer(&mut *guard, DRAIN_TIMEOUT).await;
            write_frame(guard.get_mut(), SOFT_RESET).await?;
            tokio::time::sleep(settle).await;
            write_frame(guard.get_mut(), b"\n").await?;
            self.receive_lines(&mut guard, "ok", self.timeout, "reset")
                .await?
        };

        let banner = lines.first().cloned().unwrap_or_default();
        if !(banner.starts_with("Grbl") && banner.ends_with("['$' for help]")) {
            return Err(StageError::ConnectionFailure(format!(
                "unexpected GRBL banner {banner:?}"
            )));
        }
        tracing::info!(%banner, "GRBL reset");

        if lines.iter().any(|l| l == LOCKED_MESSAGE) {
            self.unlock().await?;
        }
        *self.wco.lock() = None;
        Ok(banner)
    }

    /// Clear the alarm lock (`$X`).
    #[instrument(skip(self), err)]
    pub async fn unlock(&self) -> StageResult<()> {
        let lines = self.command("$X").await?;
        if !lines.iter().any(|l| l == UNLOCKED_MESSAGE) {
            return Err(StageError::protocol("$X", lines.join("\n")));
        }
        tracing::warn!("GRBL unlocked, position may be unreferenced");
        Ok(())
    }

    /// Enter sleep mode (`$SLP`). Returns the controller's message.
    #[instrument(skip(self), err)]
    pub async fn sleep(&self) -> StageResult<String> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), b"$SLP\n").await?;
        self.receive_lines(&mut guard, "ok", self.timeout, "$SLP")
            .await?;
        self.read_line(&mut guard, self.timeout, "$SLP").await
    }

    /// Read and decode the `$$` settings table.
    #[instrument(skip(self), err)]
    pub async fn settings(&self) -> StageResult<BTreeMap<GrblSetting, SettingValue>> {
        let lines = self.command("$$").await?;
        parse_settings(&lines)
    }

    /// Define the current position as work origin.
    pub async fn set_origin(&self) -> StageResult<()> {
        self.command("G92 X0 Y0 Z0").await?;
        *self.wco.lock() = None;
        Ok(())
    }

    /// Query a real-time status report.
    ///
    /// An empty or missing reply is retried once; a second miss is reported
    /// as a timeout.
    pub async fn status(&self) -> StageResult<StatusReport> {
        let mut guard = self.port.lock().await;
        if let Some(report) = self.status_once(&mut guard).await? {
            return Ok(report);
        }
        tracing::warn!("empty GRBL status report, retrying once");
        self.status_once(&mut guard)
            .await?
            .ok_or_else(|| StageError::Timeout {
                operation: "GRBL status report".to_string(),
                elapsed: self.timeout,
            })
    }

    async fn status_once(
        &self,
        port: &mut BufReader<DynSerial>,
    ) -> StageResult<Option<StatusReport>> {
        write_frame(port.get_mut(), b"?").await?;
        let mut line = match self.read_line(port, self.timeout, "?").await {
            Ok(line) => line,
            Err(StageError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        // Acknowledgement of an earlier command still in the buffer.
        if line == "ok" {
            line = match self.read_line(port, self.timeout, "?").await {
                Ok(line) => line,
                Err(StageError::Timeout { .. }) => return Ok(None),
                Err(e) => return Err(e),
            };
        }
        if line.is_empty() {
            return Ok(None);
        }
        if GrblFault::parse_alarm_code(&line).is_some() {
            let message = self.read_line(port, self.timeout, "?").await?;
            return Err(alarm(&line, message));
        }
        if let Some(f) = GrblFault::parse_error(&line) {
            return Err(fault(f));
        }
        tracing::trace!(%line, "status report");
        StatusReport::parse(&line).map(Some)
    }

    /// Machine state from a fresh status report.
    pub async fn grbl_state(&self) -> StageResult<GrblState> {
        Ok(self.status().await?.state)
    }

    fn truncate(&self, values: Vec<f64>) -> Vector {
        values.into_iter().take(self.bounds.num_axis()).collect()
    }
}

#[async_trait]
impl Stage for CncRouter {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    #[instrument(skip(self), err)]
    async fn position(&self) -> StageResult<Vector> {
        for _ in 0..self.wco_polls {
            let report = self.status().await?;
            if let Some(wpos) = report.work_position() {
                return Ok(self.truncate(wpos?));
            }
            let mpos = Vector::from(
                report
                    .machine_position()
                    .ok_or_else(|| StageError::protocol("?", "status report without MPos or WPos"))??,
            );
            if let Some(wco) = report.work_coordinate_offset() {
                let wco = wco?;
                *self.wco.lock() = Some(wco.clone());
                return Ok(self.truncate(mpos.try_sub(&wco)?.into()));
            }
            let cached = self.wco.lock().clone();
            if let Some(wco) = cached {
                return Ok(self.truncate(mpos.try_sub(&wco)?.into()));
            }
        }
        Err(StageError::protocol(
            "?",
            format!("no WCO field in {} status reports", self.wco_polls),
        ))
    }

    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        let mut command = format!("G0 X{}", target.x());
        if target.len() > 1 {
            command.push_str(&format!(" Y{}", target.y()));
        }
        if target.len() > 2 {
            command.push_str(&format!(" Z{}", target.z()));
        }
        self.command(&command).await?;
        Ok(())
    }

    async fn is_moving(&self) -> StageResult<bool> {
        Ok(self.grbl_state().await?.is_moving())
    }

    /// `$H` homing cycle. GRBL acknowledges only once homing completed.
    #[instrument(skip(self), err)]
    async fn start_home(&self) -> StageResult<()> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), b"$H\n").await?;
        self.receive_lines(&mut guard, "ok", self.homing_timeout, "$H")
            .await?;
        *self.wco.lock() = None;
        Ok(())
    }

    async fn state(&self) -> StageResult<MotionState> {
        Ok(self.grbl_state().await?.into())
    }
}
