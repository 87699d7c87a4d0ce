//! Daisy-chain link shared by SMC100 controllers.
//!
//! Every controller on the chain answers on the same serial line, so a
//! request and its reply must not interleave with another stage's traffic.
//! [`LinkSession`] holds the port lock for the duration of one exchange (or
//! one pipelined batch of lazy queries).
//!
//! Frames are `{addr}{cmd}\r\n`. A query reply starts with the echoed
//! `{addr}{cmd}`; CR and NUL bytes (sent after a controller reset) are
//! dropped on receive.

use stage_core::error::{StageError, StageResult};
use stage_core::limits::DRAIN_TIMEOUT;
use stage_core::serial::{
    drain_serial_buffer, open_serial_async, read_until_suffix, wrap_shared, write_frame,
    DynSerial, FlowControl, SerialSettings, SharedPort,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::MutexGuard;

/// Default baud rate of the SMC100 RS-232 port.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Handle on the serial line of a controller chain. Cloning shares the line.
#[derive(Clone)]
pub struct Smc100Link {
    port: SharedPort,
    timeout: Duration,
}

impl Smc100Link {
    /// Wrap an already open port.
    pub fn new(port: SharedPort, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Open a serial port with SMC100 settings (8N1, XON/XOFF).
    pub async fn open(path: &str, baud_rate: u32, timeout: Duration) -> StageResult<Self> {
        let port = open_serial_async(
            path,
            SerialSettings::new(baud_rate).with_flow_control(FlowControl::Software),
            "SMC100",
        )
        .await?;
        Ok(Self::new(wrap_shared(Box::new(port)), timeout))
    }

    /// Reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether both handles drive the same serial line.
    pub fn same_line(&self, other: &Smc100Link) -> bool {
        Arc::ptr_eq(&self.port, &other.port)
    }

    pub(crate) fn port(&self) -> &SharedPort {
        &self.port
    }

    /// Lock the line for an exchange.
    pub async fn session(&self) -> LinkSession<'_> {
        LinkSession {
            port: self.port.lock().await,
            timeout: self.timeout,
            pending: VecDeque::new(),
        }
    }

    /// Send a command without reading anything back.
    pub async fn send(&self, address: Option<u8>, command: &str) -> StageResult<()> {
        self.session().await.send(address, command).await
    }

    /// Send `command?` and return the reply value.
    pub async fn query(&self, address: u8, command: &str) -> StageResult<String> {
        self.session().await.query(address, command).await
    }
}

/// Exclusive access to the line.
///
/// Lazy queries are answered in the order they were sent; the session keeps
/// the expected reply prefixes in a FIFO and [`LinkSession::next_response`]
/// consumes them front to back.
pub struct LinkSession<'a> {
    port: MutexGuard<'a, BufReader<DynSerial>>,
    timeout: Duration,
    pending: VecDeque<String>,
}

impl LinkSession<'_> {
    /// Send `{address}{command}\r\n`. `None` omits the address (broadcast).
    pub async fn send(&mut self, address: Option<u8>, command: &str) -> StageResult<()> {
        let frame = match address {
            Some(address) => format!("{address}{command}\r\n"),
            None => format!("{command}\r\n"),
        };
        write_frame(self.port.get_mut(), frame.as_bytes()).await
    }

    async fn receive(&mut self, operation: &str) -> StageResult<String> {
        let raw = read_until_suffix(&mut *self.port, b"\n", self.timeout, operation).await?;
        Ok(raw
            .into_iter()
            .filter(|b| !matches!(b, b'\r' | 0))
            .map(char::from)
            .collect())
    }

    /// Send `command?` and return the reply with its echoed prefix removed.
    ///
    /// A reply with the wrong prefix is retried once after draining the
    /// input buffer.
    pub async fn query(&mut self, address: u8, command: &str) -> StageResult<String> {
        if !self.pending.is_empty() {
            return Err(StageError::InvalidArgument(format!(
                "{} lazy SMC100 replies still pending",
                self.pending.len()
            )));
        }
        let prefix = format!("{address}{command}");
        let request = format!("{command}?");

        self.send(Some(address), &request).await?;
        let response = self.receive(&prefix).await?;
        if let Some(value) = response.strip_prefix(&prefix) {
            return Ok(value.to_string());
        }

        tracing::warn!(%prefix, %response, "SMC100 reply prefix mismatch, retrying once");
        drain_serial_buffer(&mut *self.port, DRAIN_TIMEOUT).await;
        self.send(Some(address), &request).await?;
        let response = self.receive(&prefix).await?;
        match response.strip_prefix(&prefix) {
            Some(value) => Ok(value.to_string()),
            None => Err(StageError::protocol(format!("{prefix}?"), response)),
        }
    }

    /// Send `command?` without reading the reply.
    pub async fn query_lazy(&mut self, address: u8, command: &str) -> StageResult<()> {
        self.send(Some(address), &format!("{command}?")).await?;
        self.pending.push_back(format!("{address}{command}"));
        Ok(())
    }

    /// Read the reply to the oldest pending lazy query.
    ///
    /// Any failure abandons the remaining pending replies and drains the
    /// line.
    pub async fn next_response(&mut self) -> StageResult<String> {
        let prefix = self.pending.pop_front().ok_or_else(|| {
            StageError::InvalidArgument("no lazy SMC100 query pending".to_string())
        })?;
        let result = match self.receive(&prefix).await {
            Ok(response) => match response.strip_prefix(&prefix) {
                Some(value) => Ok(value.to_string()),
                None => Err(StageError::protocol(format!("{prefix}?"), response)),
            },
            Err(e) => Err(e),
        };
        if result.is_err() && !self.pending.is_empty() {
            self.abandon().await;
        }
        result
    }

    /// Forget every pending lazy reply and drain whatever reached the line.
    ///
    /// Call this when a batch is cut short, so the next exchange on the link
    /// does not read a stale reply as its own.
    pub async fn abandon(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "abandoning unread SMC100 replies"
            );
            self.pending.clear();
        }
        drain_serial_buffer(&mut *self.port, DRAIN_TIMEOUT).await;
    }

    /// Number of lazy replies not read yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for LinkSession<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "SMC100 session released with unread replies"
            );
        }
    }
}
