//! Physik Instrumente (PI) GCS Stage Driver
//!
//! Reference: PI General Command Set (GCS) 2.0 manual
//!
//! Protocol Overview:
//! - Format: ASCII over USB/RS-232, 115200 baud, 8N1
//! - Commands: `{addr} {CMD} {args}\n`; most setters send no reply
//! - Queries: `{addr} {CMD}? {args}\n`
//! - Replies: `0 {addr} {payload}\n`; a line ending with a space before the
//!   LF announces another line
//! - Single-byte commands (`#5` motion status) carry no LF
//!
//! Each stage axis is a controller on the daisy chain; the driver only uses
//! controller axis 1.

use crate::errors::PiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::serial::{
    open_serial_async, read_line_until, wrap_shared, write_frame, DynSerial, SerialSettings,
    SharedPort,
};
use stage_core::Vector;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::instrument;

/// Manufacturer string every `*IDN?` reply must contain.
pub const MANUFACTURER: &str = "Physik Instrumente";

/// `#5` motion status request.
const MOTION_STATUS: u8 = 0x05;

/// Axis identifier on each controller.
const AXIS: &str = "1";

/// How an axis may get its absolute position (`RON`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencingMethod {
    /// `POS` may set the position; FRF/FNL/FPL may reference.
    PosAllowed = 0,
    /// Only a referencing move (FRF/FNL/FPL) may set the position.
    ReferencingOnly = 1,
}

impl ReferencingMethod {
    fn from_value(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(ReferencingMethod::PosAllowed),
            "1" => Some(ReferencingMethod::ReferencingOnly),
            _ => None,
        }
    }
}

// =============================================================================
// PiFactory - DriverFactory implementation
// =============================================================================

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_addresses() -> Vec<u8> {
    vec![1]
}

/// Configuration for the PI GCS driver
#[derive(Debug, Clone, Deserialize)]
pub struct PiConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Controller address of each axis (default: [1])
    #[serde(default = "default_addresses")]
    pub addresses: Vec<u8>,
}

fn check_addresses(addresses: &[u8]) -> StageResult<()> {
    if addresses.is_empty() || addresses.contains(&0) {
        return Err(StageError::InvalidArgument(format!(
            "PI addresses must be a non-empty list of controller numbers, got {addresses:?}"
        )));
    }
    Ok(())
}

/// Factory for creating PI GCS driver instances.
pub struct PiFactory;

static PI_CAPABILITIES: &[Capability] = &[
    Capability::Positioning,
    Capability::Homing,
    Capability::Stop,
];

impl DriverFactory for PiFactory {
    fn driver_type(&self) -> &'static str {
        "pi"
    }

    fn name(&self) -> &'static str {
        "Physik Instrumente GCS Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        PI_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: PiConfig = config.clone().try_into()?;
        check_addresses(&cfg.addresses)?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: PiConfig = config.try_into().context("Invalid PI config")?;
            let driver = PiStage::connect(&cfg)
                .await
                .with_context(|| format!("PI initialization failed on {}", cfg.port))?;
            let identification = driver.identification().join("; ");

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("mm".to_string()),
                identification: Some(identification),
            }))
        })
    }
}

// =============================================================================
// PiStage
// =============================================================================

/// Driver for a chain of PI GCS controllers, one axis each.
pub struct PiStage {
    port: SharedPort,
    addresses: Vec<u8>,
    bounds: AxisBounds,
    timeout: Duration,
    idns: Vec<String>,
}

impl PiStage {
    /// Open the serial port and identify every controller.
    pub async fn connect(config: &PiConfig) -> StageResult<Self> {
        check_addresses(&config.addresses)?;
        let port = open_serial_async(&config.port, SerialSettings::new(config.baud_rate), "PI")
            .await?;
        Self::with_port(
            wrap_shared(Box::new(port)),
            config.addresses.clone(),
            Duration::from_millis(config.timeout_ms),
        )
        .await
    }

    /// Identify every controller over an already open port.
    pub async fn with_port(
        port: SharedPort,
        addresses: Vec<u8>,
        timeout: Duration,
    ) -> StageResult<Self> {
        check_addresses(&addresses)?;
        let mut stage = Self {
            port,
            bounds: AxisBounds::new(addresses.len()),
            addresses,
            timeout,
            idns: Vec::new(),
        };
        let idns = stage.idn().await?;
        if let Some(foreign) = idns.iter().find(|idn| !idn.contains(MANUFACTURER)) {
            return Err(StageError::VersionNotSupported(foreign.clone()));
        }
        tracing::info!(?idns, "PI controllers identified");
        stage.idns = idns;
        Ok(stage)
    }

    /// `*IDN?` replies recorded at connection.
    pub fn identification(&self) -> &[String] {
        &self.idns
    }

    /// Controller address of each axis.
    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    /// Read one reply line and check its `0 {address} ` header.
    /// Returns the payload and whether another line follows.
    async fn receive_line(
        &self,
        port: &mut BufReader<DynSerial>,
        address: u8,
        operation: &str,
    ) -> StageResult<(String, bool)> {
        let line = read_line_until(port, b"\n", self.timeout, operation).await?;
        let line = line.trim_end_matches('\r');
        let mut parts = line.splitn(3, ' ');
        let header_ok = parts.next() == Some("0")
            && parts.next().and_then(|a| a.parse::<u8>().ok()) == Some(address);
        let payload = parts.next();
        match payload {
            Some(payload) if header_ok => Ok((payload.trim().to_string(), payload.ends_with(' '))),
            _ => Err(StageError::protocol(operation, line)),
        }
    }

    /// Send `{address} {command}?[ args]` and collect every reply line.
    pub async fn query(
        &self,
        address: u8,
        command: &str,
        args: &[&str],
    ) -> StageResult<Vec<String>> {
        let mut request = format!("{address} {command}?");
        for arg in args {
            request.push(' ');
            request.push_str(arg);
        }
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), format!("{request}\n").as_bytes()).await?;

        let mut lines = Vec::new();
        loop {
            let (payload, more) = self.receive_line(&mut guard, address, &request).await?;
            lines.push(payload);
            if !more {
                return Ok(lines);
            }
        }
    }

    async fn query_one(&self, address: u8, command: &str) -> StageResult<String> {
        let mut lines = self.query(address, command, &[]).await?;
        match lines.len() {
            1 => Ok(lines.remove(0)),
            _ => Err(StageError::protocol(
                format!("{address} {command}?"),
                lines.join("\n"),
            )),
        }
    }

    /// Value of axis 1 in a `1=value` reply.
    async fn query_axis(&self, address: u8, command: &str) -> StageResult<String> {
        let reply = self.query_one(address, command).await?;
        match reply.split_once('=') {
            Some((axis, value)) if axis.trim() == AXIS => Ok(value.trim().to_string()),
            _ => Err(StageError::protocol(format!("{address} {command}?"), reply)),
        }
    }

    /// Send a command that has no reply.
    pub async fn send(&self, address: u8, command: &str) -> StageResult<()> {
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), format!("{address} {command}\n").as_bytes()).await
    }

    /// `*IDN?` of every controller.
    pub async fn idn(&self) -> StageResult<Vec<String>> {
        let mut idns = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            idns.extend(self.query(address, "*IDN", &[]).await?);
        }
        Ok(idns)
    }

    /// Move one controller's axis (`MOV`).
    pub async fn move_axis(&self, address: u8, position: f64) -> StageResult<()> {
        self.send(address, &format!("MOV {AXIS} {position}")).await
    }

    async fn axis_moving(&self, address: u8) -> StageResult<bool> {
        let operation = format!("{address} #5");
        let mut frame = address.to_string().into_bytes();
        frame.extend([b' ', MOTION_STATUS]);
        let mut guard = self.port.lock().await;
        write_frame(guard.get_mut(), &frame).await?;
        let (payload, _) = self.receive_line(&mut guard, address, &operation).await?;
        Ok(payload != "0")
    }

    /// Referencing method of every axis (`RON?`).
    pub async fn reference_methods(&self) -> StageResult<Vec<ReferencingMethod>> {
        let mut methods = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            let value = self.query_axis(address, "RON").await?;
            let method = ReferencingMethod::from_value(&value)
                .ok_or_else(|| StageError::protocol(format!("{address} RON?"), value))?;
            methods.push(method);
        }
        Ok(methods)
    }

    /// Set the referencing method of every axis (`RON`).
    pub async fn set_reference_methods(&self, methods: &[ReferencingMethod]) -> StageResult<()> {
        if methods.len() != self.addresses.len() {
            return Err(StageError::DimensionMismatch {
                expected: self.addresses.len(),
                actual: methods.len(),
            });
        }
        for (&address, method) in self.addresses.iter().zip(methods) {
            self.send(address, &format!("RON {AXIS} {}", *method as u8))
                .await?;
        }
        Ok(())
    }

    /// Set the same referencing method on every axis.
    pub async fn set_reference_method(&self, method: ReferencingMethod) -> StageResult<()> {
        self.set_reference_methods(&vec![method; self.addresses.len()])
            .await
    }

    /// Servo on, then a reference move to the negative (`FNL`) or positive
    /// (`FPL`) limit switch on every axis.
    #[instrument(skip(self), err)]
    pub async fn fast_reference(&self, negative_limit: bool) -> StageResult<()> {
        let command = if negative_limit { "FNL" } else { "FPL" };
        for &address in &self.addresses {
            self.send(address, &format!("SVO {AXIS} 1")).await?;
            self.send(address, &format!("{command} {AXIS}")).await?;
        }
        Ok(())
    }

    /// Whether at least one axis has not been referenced (`FRF?`).
    pub async fn is_reference_needed(&self) -> StageResult<bool> {
        for &address in &self.addresses {
            if self.query_axis(address, "FRF").await? != "1" {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop every axis (`STP`).
    #[instrument(skip(self), err)]
    pub async fn stop(&self) -> StageResult<()> {
        for &address in &self.addresses {
            self.send(address, "STP").await?;
        }
        Ok(())
    }

    /// Last error of every controller (`ERR?`). Reading clears it.
    pub async fn errors(&self) -> StageResult<Vec<PiError>> {
        let mut errors = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            let reply = self.query_one(address, "ERR").await?;
            let code = reply
                .trim()
                .parse()
                .map_err(|_| StageError::protocol(format!("{address} ERR?"), reply.clone()))?;
            errors.push(PiError::from_code(code));
        }
        Ok(errors)
    }

    /// Fail with a device fault if any controller reports an error.
    pub async fn check_errors(&self) -> StageResult<()> {
        let errors = self.errors().await?;
        match self
            .addresses
            .iter()
            .zip(&errors)
            .find(|(_, e)| e.is_error())
        {
            Some((&address, error)) => Err(StageError::Fault(error.to_fault(address))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Stage for PiStage {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    async fn position(&self) -> StageResult<Vector> {
        let mut position = Vector::zeros(self.addresses.len());
        for (i, &address) in self.addresses.iter().enumerate() {
            let value = self.query_axis(address, "POS").await?;
            let parsed: f64 = value
                .parse()
                .map_err(|_| StageError::protocol(format!("{address} POS?"), value.clone()))?;
            position[i] = parsed;
        }
        Ok(position)
    }

    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        for (&address, &value) in self.addresses.iter().zip(target) {
            self.move_axis(address, value).await?;
        }
        Ok(())
    }

    async fn is_moving(&self) -> StageResult<bool> {
        for &address in &self.addresses {
            if self.axis_moving(address).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reference against the negative limit switches.
    async fn start_home(&self) -> StageResult<()> {
        self.fast_reference(true).await
    }
}
