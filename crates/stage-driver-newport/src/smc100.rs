//! Newport SMC100 Single-Axis Motion Controller Driver
//!
//! Reference: SMC100CC & SMC100PP User's Manual
//!
//! Protocol Overview:
//! - Format: ASCII over RS-232, 57600 baud, 8N1, XON/XOFF
//! - Commands: `{addr}{cmd}{value}\r\n` (e.g. `1PA5.0`)
//! - Queries: `{addr}{cmd}?\r\n`, answered by `{addr}{cmd}{value}\r\n`
//! - Up to 31 controllers daisy-chained behind the first one's serial port
//!
//! A stage is a list of controller addresses, one per axis. Several stages
//! can share the chain through one [`Smc100Link`].
//!
//! # Usage
//!
//! ```rust,ignore
//! // stages.toml
//! // [[stages]]
//! // id = "xy"
//! // driver = "smc100"
//! // config = { port = "/dev/ttyUSB0", addresses = [1, 2] }
//! //
//! // [[stages]]
//! // id = "z"
//! // driver = "smc100"
//! // config = { port = "/dev/ttyUSB0", addresses = [3] }
//! ```

use crate::link::{LinkSession, Smc100Link, DEFAULT_BAUD_RATE};
use crate::shared_ports::get_or_open_link;
use crate::state::ErrorAndState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use stage_core::capabilities::{AxisBounds, MotionState, Stage};
use stage_core::driver::{Capability, DriverFactory, StageComponents, StageMetadata};
use stage_core::error::{StageError, StageResult};
use stage_core::motion::{poll_until, WaitOptions};
use stage_core::Vector;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Valid RS-485 controller addresses.
pub const ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 1..=31;

/// Addresses a controller can be reassigned to with `SA`.
pub const CONFIGURABLE_ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 2..=31;

// =============================================================================
// Smc100Factory - DriverFactory implementation
// =============================================================================

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_addresses() -> Vec<u8> {
    vec![1]
}

fn default_shared() -> bool {
    true
}

/// Configuration for the SMC100 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Smc100Config {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default: 57600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Controller address of each axis (default: [1])
    #[serde(default = "default_addresses")]
    pub addresses: Vec<u8>,
    /// Reuse a link already open on the same port (default: true)
    #[serde(default = "default_shared")]
    pub shared: bool,
}

fn check_addresses(addresses: &[u8]) -> StageResult<()> {
    if addresses.is_empty() {
        return Err(StageError::InvalidArgument(
            "SMC100 stage needs at least one controller address".to_string(),
        ));
    }
    if let Some(bad) = addresses.iter().find(|a| !ADDRESS_RANGE.contains(*a)) {
        return Err(StageError::InvalidArgument(format!(
            "SMC100 address {bad} outside 1-31"
        )));
    }
    Ok(())
}

/// Factory for creating SMC100 driver instances.
pub struct Smc100Factory;

static SMC100_CAPABILITIES: &[Capability] = &[
    Capability::Positioning,
    Capability::Homing,
    Capability::RelativeMove,
    Capability::Stop,
    Capability::Settings,
    Capability::SharedTransport,
];

impl DriverFactory for Smc100Factory {
    fn driver_type(&self) -> &'static str {
        "smc100"
    }

    fn name(&self) -> &'static str {
        "Newport SMC100 Motion Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        SMC100_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Smc100Config = config.clone().try_into()?;
        check_addresses(&cfg.addresses)?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<StageComponents>> {
        Box::pin(async move {
            let cfg: Smc100Config = config.try_into().context("Invalid SMC100 config")?;
            let timeout = Duration::from_millis(cfg.timeout_ms);
            let link = if cfg.shared {
                get_or_open_link(&cfg.port, cfg.baud_rate, timeout).await
            } else {
                Smc100Link::open(&cfg.port, cfg.baud_rate, timeout).await
            }
            .with_context(|| format!("Failed to open SMC100 link on {}", cfg.port))?;
            let driver = Smc100::new(link, cfg.addresses.clone())
                .await
                .with_context(|| format!("SMC100 initialization failed on {}", cfg.port))?;

            Ok(StageComponents::new(Arc::new(driver)).with_metadata(StageMetadata {
                position_units: Some("mm".to_string()),
                identification: Some(format!("SMC100 addresses {:?}", cfg.addresses)),
            }))
        })
    }
}

// =============================================================================
// Smc100
// =============================================================================

/// A stage made of one or more daisy-chained SMC100 controllers.
pub struct Smc100 {
    link: Smc100Link,
    addresses: Vec<u8>,
    bounds: AxisBounds,
}

impl Smc100 {
    /// Build a stage on `link`, one axis per address.
    ///
    /// Reading the state clears latched errors, which would otherwise make
    /// the controllers ignore commands, so every controller is queried once.
    pub async fn new(link: Smc100Link, addresses: Vec<u8>) -> StageResult<Self> {
        check_addresses(&addresses)?;
        let stage = Self {
            link,
            bounds: AxisBounds::new(addresses.len()),
            addresses,
        };
        for &address in &stage.addresses {
            let es = stage.query_error_and_state(address).await?;
            tracing::debug!(address, state = ?es.state, faults = ?es.faults, "SMC100 initial state");
        }
        Ok(stage)
    }

    /// Build another stage on the same chain.
    pub async fn sharing(other: &Smc100, addresses: Vec<u8>) -> StageResult<Self> {
        Self::new(other.link.clone(), addresses).await
    }

    /// Link to the controller chain.
    pub fn link(&self) -> &Smc100Link {
        &self.link
    }

    /// Controller address of each axis.
    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    fn address(&self, axis: usize) -> StageResult<u8> {
        self.addresses.get(axis).copied().ok_or_else(|| {
            StageError::InvalidArgument(format!(
                "axis {axis} out of range for {} axes",
                self.addresses.len()
            ))
        })
    }

    async fn query_error_and_state(&self, address: u8) -> StageResult<ErrorAndState> {
        ErrorAndState::parse(&self.link.query(address, "TS").await?)
    }

    async fn send_all(&self, command: &str) -> StageResult<()> {
        let mut session = self.link.session().await;
        for &address in &self.addresses {
            session.send(Some(address), command).await?;
        }
        Ok(())
    }

    /// Reset all controllers of the stage.
    #[instrument(skip(self), err)]
    pub async fn reset(&self) -> StageResult<()> {
        self.send_all("RS").await
    }

    /// Home search on every axis, referenced or not.
    #[instrument(skip(self), err)]
    pub async fn home_search(&self) -> StageResult<()> {
        self.send_all("OR").await
    }

    /// Home search on the axes that are not referenced.
    #[instrument(skip(self), err)]
    pub async fn home_search_if_required(&self) -> StageResult<()> {
        for &address in &self.addresses {
            if !self.query_error_and_state(address).await?.is_referenced() {
                self.link.send(Some(address), "OR").await?;
            }
        }
        Ok(())
    }

    /// Query positioner errors and controller state of one axis.
    ///
    /// Querying may clear latched error flags.
    pub async fn error_and_state(&self, axis: usize) -> StageResult<ErrorAndState> {
        self.query_error_and_state(self.address(axis)?).await
    }

    /// Enter configuration state (`PW1`).
    pub async fn enter_configuration_state(&self, address: u8) -> StageResult<()> {
        self.link.send(Some(address), "PW1").await
    }

    /// Leave configuration state (`PW0`). Valid parameters are saved to flash.
    pub async fn leave_configuration_state(&self, address: u8) -> StageResult<()> {
        self.link.send(Some(address), "PW0").await
    }

    /// RS-485 address of a controller.
    pub async fn controller_address(&self, address: u8) -> StageResult<u8> {
        let res = self.link.query(address, "SA").await?;
        res.trim()
            .parse()
            .map_err(|_| StageError::protocol(format!("{address}SA?"), res))
    }

    /// Change a controller's RS-485 address. Only possible in configuration
    /// state.
    pub async fn set_controller_address(&self, address: u8, value: u8) -> StageResult<()> {
        if !CONFIGURABLE_ADDRESS_RANGE.contains(&value) {
            return Err(StageError::InvalidArgument(format!(
                "controller address {value} outside 2-31"
            )));
        }
        self.link.send(Some(address), &format!("SA{value}")).await
    }

    /// Relative move of the axis at `address`.
    pub async fn move_relative(&self, address: u8, offset: f64) -> StageResult<()> {
        self.link.send(Some(address), &format!("PR{offset}")).await
    }

    /// Stop one controller, or every controller on the chain when `address`
    /// is `None`.
    #[instrument(skip(self), err)]
    pub async fn stop(&self, address: Option<u8>) -> StageResult<()> {
        self.link.send(address, "ST").await
    }

    /// Move the axis at `address`. With `wait`, poll that axis until it is
    /// no longer moving.
    #[instrument(skip(self, wait), err)]
    pub async fn set_axis_position(
        &self,
        address: u8,
        value: f64,
        wait: Option<&WaitOptions>,
    ) -> StageResult<()> {
        self.link.send(Some(address), &format!("PA{value}")).await?;
        if let Some(opts) = wait {
            poll_until(opts, "SMC100 axis move", || async move {
                Ok::<bool, StageError>(!self.query_error_and_state(address).await?.is_moving())
            })
            .await?;
        }
        Ok(())
    }
}

async fn read_positions(session: &mut LinkSession<'_>, addresses: &[u8]) -> StageResult<Vec<String>> {
    for &address in addresses {
        session.query_lazy(address, "TP").await?;
    }
    let mut replies = Vec::with_capacity(addresses.len());
    for _ in addresses {
        replies.push(session.next_response().await?);
    }
    Ok(replies)
}

#[async_trait]
impl Stage for Smc100 {
    fn bounds(&self) -> &AxisBounds {
        &self.bounds
    }

    /// All `TP` queries are sent before the first reply is read, and every
    /// reply is read before any is parsed.
    async fn position(&self) -> StageResult<Vector> {
        let mut session = self.link.session().await;
        let replies = match read_positions(&mut session, &self.addresses).await {
            Ok(replies) => replies,
            Err(e) => {
                session.abandon().await;
                return Err(e);
            }
        };
        drop(session);

        let mut position = Vector::zeros(self.addresses.len());
        for (i, (&address, res)) in self.addresses.iter().zip(replies).enumerate() {
            position[i] = res
                .trim()
                .parse()
                .map_err(|_| StageError::protocol(format!("{address}TP?"), res.clone()))?;
        }
        Ok(position)
    }

    #[instrument(skip(self, target), fields(target = %target), err)]
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
        self.bounds().check_dimension(target)?;
        let mut session = self.link.session().await;
        for (&address, value) in self.addresses.iter().zip(target) {
            session.send(Some(address), &format!("PA{value}")).await?;
        }
        Ok(())
    }

    async fn is_moving(&self) -> StageResult<bool> {
        for &address in &self.addresses {
            if self.query_error_and_state(address).await?.is_moving() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn start_home(&self) -> StageResult<()> {
        self.home_search().await
    }

    async fn state(&self) -> StageResult<MotionState> {
        let mut states = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            states.push(MotionState::from(self.query_error_and_state(address).await?.state));
        }
        let priority = [
            MotionState::Homing,
            MotionState::Moving,
            MotionState::NotReferenced,
            MotionState::Disabled,
        ];
        Ok(priority
            .into_iter()
            .find(|p| states.contains(p))
            .unwrap_or(MotionState::Idle))
    }

    /// Wait until every axis is ready. An axis that stopped with error bits
    /// set fails the wait with a device fault.
    async fn wait_move_finished(&self, opts: &WaitOptions) -> StageResult<()> {
        for &address in &self.addresses {
            poll_until(opts, "SMC100 axes ready", || async move {
                let es = self.query_error_and_state(address).await?;
                if es.is_ready() {
                    return Ok(true);
                }
                match es.fault(address) {
                    Some(fault) if !es.is_moving() => Err(StageError::Fault(fault)),
                    _ => Ok(false),
                }
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::testing::{scripted_port, Exchange};

    fn link(script: Vec<Exchange>) -> (Smc100Link, stage_core::testing::ScriptedDevice) {
        let (port, device) = scripted_port(script);
        (Smc100Link::new(port, Duration::from_millis(200)), device)
    }

    fn init(addresses: &[u8]) -> Vec<Exchange> {
        addresses
            .iter()
            .map(|a| Exchange::new(format!("{a}TS?\r\n"), format!("{a}TS000032\r\n")))
            .collect()
    }

    fn script(addresses: &[u8], rest: Vec<Exchange>) -> Vec<Exchange> {
        let mut script = init(addresses);
        script.extend(rest);
        script
    }

    fn fast() -> WaitOptions {
        WaitOptions::default().with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Smc100Factory;
        assert_eq!(factory.driver_type(), "smc100");
        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            addresses = [1, 2]
        });
        assert!(factory.validate(&valid).is_ok());
        let invalid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            addresses = [0]
        });
        assert!(factory.validate(&invalid).is_err());
    }

    #[tokio::test]
    async fn test_position_pipelines_queries() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::silent("1TP?\r\n"),
                Exchange::new("2TP?\r\n", "1TP10.5\r\n2TP-3\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), [10.5, -3.0]);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_bad_position_reply_leaves_link_clean() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::silent("1TP?\r\n"),
                Exchange::new("2TP?\r\n", "1TPabc\r\n2TP-3\r\n"),
                Exchange::silent("1TP?\r\n"),
                Exchange::new("2TP?\r\n", "1TP1\r\n2TP2\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        match stage.position().await {
            Err(StageError::Protocol { query, response }) => {
                assert_eq!(query, "1TP?");
                assert_eq!(response, "abc");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(stage.position().await.unwrap(), [1.0, 2.0]);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_move_and_wait_ready() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::silent("1PA1.5\r\n"),
                Exchange::silent("2PA2\r\n"),
                Exchange::new("1TS?\r\n", "1TS000028\r\n"),
                Exchange::new("1TS?\r\n", "1TS000033\r\n"),
                Exchange::new("2TS?\r\n", "2TS000033\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        stage
            .move_to(&Vector::new([1.5, 2.0]), Some(&fast()))
            .await
            .unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_wait_fails_on_stopped_axis_with_faults() {
        let (link, device) = link(script(
            &[1],
            vec![Exchange::new("1TS?\r\n", "1TS01000A\r\n")],
        ));
        let stage = Smc100::new(link, vec![1]).await.unwrap();
        let err = stage.wait_move_finished(&fast()).await.unwrap_err();
        let fault = err.fault().unwrap();
        assert_eq!(fault.code, 0x0100);
        assert!(fault.description.contains("DC_VOLTAGE_TOO_LOW"));
        device.finish().await;
    }

    #[tokio::test]
    async fn test_moving_state_and_is_moving() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::new("1TS?\r\n", "1TS000032\r\n"),
                Exchange::new("2TS?\r\n", "2TS000028\r\n"),
                Exchange::new("1TS?\r\n", "1TS000032\r\n"),
                Exchange::new("2TS?\r\n", "2TS00001E\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        assert!(stage.is_moving().await.unwrap());
        assert_eq!(stage.state().await.unwrap(), MotionState::Homing);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_home_search_if_required() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::new("1TS?\r\n", "1TS00000A\r\n"),
                Exchange::silent("1OR\r\n"),
                Exchange::new("2TS?\r\n", "2TS000032\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        stage.home_search_if_required().await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_controller_commands() {
        let (link, device) = link(script(
            &[3],
            vec![
                Exchange::silent("3RS\r\n"),
                Exchange::silent("3PW1\r\n"),
                Exchange::new("3SA?\r\n", "3SA3\r\n"),
                Exchange::silent("3SA7\r\n"),
                Exchange::silent("3PW0\r\n"),
                Exchange::silent("3PR-0.25\r\n"),
                Exchange::silent("3ST\r\n"),
                Exchange::silent("ST\r\n"),
                Exchange::silent("3OR\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![3]).await.unwrap();
        stage.reset().await.unwrap();
        stage.enter_configuration_state(3).await.unwrap();
        assert_eq!(stage.controller_address(3).await.unwrap(), 3);
        assert!(stage.set_controller_address(3, 1).await.is_err());
        stage.set_controller_address(3, 7).await.unwrap();
        stage.leave_configuration_state(3).await.unwrap();
        stage.move_relative(3, -0.25).await.unwrap();
        stage.stop(Some(3)).await.unwrap();
        stage.stop(None).await.unwrap();
        stage.home(None).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_set_axis_position_polls_that_axis() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::silent("2PA4\r\n"),
                Exchange::new("2TS?\r\n", "2TS000028\r\n"),
                Exchange::new("2TS?\r\n", "2TS000033\r\n"),
            ],
        ));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        stage.set_axis_position(2, 4.0, Some(&fast())).await.unwrap();
        device.finish().await;
    }

    #[tokio::test]
    async fn test_two_stages_share_one_link() {
        let (link, device) = link(script(
            &[1, 2],
            vec![
                Exchange::new("1TP?\r\n", "1TP1\r\n"),
                Exchange::new("2TP?\r\n", "2TP2\r\n"),
            ],
        ));
        let x = Smc100::new(link, vec![1]).await.unwrap();
        let y = Smc100::sharing(&x, vec![2]).await.unwrap();
        assert!(x.link().same_line(y.link()));
        assert_eq!(x.position().await.unwrap(), [1.0]);
        assert_eq!(y.position().await.unwrap(), [2.0]);
        assert!(x.error_and_state(1).await.is_err());
        device.finish().await;
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected_before_io() {
        let (link, device) = link(script(&[1, 2], vec![]));
        let stage = Smc100::new(link, vec![1, 2]).await.unwrap();
        assert!(matches!(
            stage.set_position(&Vector::new([1.0])).await,
            Err(StageError::DimensionMismatch { .. })
        ));
        device.finish().await;
    }
}
