//! Serial port abstractions shared by the driver crates.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: type-erased boxed port
//! - [`SharedPort`]: mutex-guarded, buffered port shared between stages
//!
//! # Utilities
//!
//! - [`open_serial_async`]: open a port inside `spawn_blocking` (feature `serial`)
//! - [`drain_serial_buffer`]: discard stale bytes before a retry
//! - [`write_frame`], [`read_until_suffix`], [`read_byte`]: timeout-bounded
//!   framing primitives used by every ASCII protocol driver
//!
//! Holding the [`SharedPort`] mutex guard is what makes a request/response
//! turn exclusive. Drivers lock, write, read, and only then release.
//!
//! ```rust,ignore
//! let mut guard = port.lock().await;
//! write_frame(guard.get_mut(), b"1TS\r\n").await?;
//! let line = read_until_suffix(&mut *guard, b"\n", READ_TIMEOUT, "1TS").await?;
//! ```

use crate::error::{StageError, StageResult};
use crate::limits::MAX_LINE_BYTES;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` on real hardware and by
/// `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

// =============================================================================
// Type Aliases
// =============================================================================

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a type-erased port into a [`SharedPort`].
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

// =============================================================================
// Port settings
// =============================================================================

/// Flow control applied when opening a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// XON/XOFF.
    Software,
    /// RTS/CTS.
    Hardware,
}

/// Line settings for [`open_serial_async`]. Always 8 data bits, no parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Two stop bits instead of one.
    pub two_stop_bits: bool,
    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// 8N1 without flow control at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            two_stop_bits: false,
            flow_control: FlowControl::None,
        }
    }

    /// Use two stop bits.
    pub fn with_two_stop_bits(mut self) -> Self {
        self.two_stop_bits = true;
        self
    }

    /// Set flow control.
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using `spawn_blocking`.
///
/// Any failure (missing device, permissions, runtime) is reported as
/// [`StageError::ConnectionFailure`] naming the device and the port.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    settings: SerialSettings,
    device_name: &str,
) -> StageResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    let opened = spawn_blocking(move || {
        let stop_bits = if settings.two_stop_bits {
            tokio_serial::StopBits::Two
        } else {
            tokio_serial::StopBits::One
        };
        let flow_control = match settings.flow_control {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        };
        tokio_serial::new(&port_path_owned, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| {
                StageError::ConnectionFailure(format!(
                    "Failed to open {} serial port {}: {}",
                    device_name_owned, port_path_owned, e
                ))
            })
    })
    .await
    .map_err(|e| {
        StageError::ConnectionFailure(format!("spawn_blocking for serial port opening failed: {e}"))
    })??;

    tracing::info!(port = port_path, device = device_name, baud = settings.baud_rate, "serial port opened");
    Ok(opened)
}

/// Stub used when the crate is built without the `serial` feature.
#[cfg(not(feature = "serial"))]
pub async fn open_serial_async(
    _port_path: &str,
    _settings: SerialSettings,
    _device_name: &str,
) -> StageResult<DynSerial> {
    Err(StageError::FeatureNotEnabled("serial".into()))
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives within `timeout`. Returns the
/// number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + timeout;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    if total_discarded > 0 {
        tracing::debug!(bytes = total_discarded, "discarded stale serial data");
    }
    total_discarded
}

/// Write a complete frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(port: &mut W, frame: &[u8]) -> StageResult<()> {
    tracing::trace!(frame = %String::from_utf8_lossy(frame).escape_debug(), "tx");
    port.write_all(frame).await?;
    port.flush().await?;
    Ok(())
}

fn link_closed(operation: &str) -> StageError {
    StageError::ConnectionFailure(format!("link closed while waiting for reply to {operation}"))
}

/// Read one byte, bounded by `timeout`.
pub async fn read_byte<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    timeout: Duration,
    operation: &str,
) -> StageResult<u8> {
    match tokio::time::timeout(timeout, port.read_u8()).await {
        Ok(Ok(b)) => Ok(b),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(link_closed(operation)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(StageError::Timeout {
            operation: operation.to_string(),
            elapsed: timeout,
        }),
    }
}

/// Read bytes until the accumulated buffer ends with `suffix`.
///
/// The returned buffer excludes the suffix. The whole read is bounded by
/// `timeout`; a reply longer than [`MAX_LINE_BYTES`] is a protocol error.
pub async fn read_until_suffix<R: AsyncBufRead + Unpin + ?Sized>(
    port: &mut R,
    suffix: &[u8],
    timeout: Duration,
    operation: &str,
) -> StageResult<Vec<u8>> {
    let read = async {
        let mut buf = Vec::new();
        loop {
            let b = match port.read_u8().await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(link_closed(operation))
                }
                Err(e) => return Err(e.into()),
            };
            buf.push(b);
            if buf.ends_with(suffix) {
                buf.truncate(buf.len() - suffix.len());
                return Ok(buf);
            }
            if buf.len() > MAX_LINE_BYTES {
                return Err(StageError::protocol(
                    operation,
                    String::from_utf8_lossy(&buf).into_owned(),
                ));
            }
        }
    };
    let buf = tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| StageError::Timeout {
            operation: operation.to_string(),
            elapsed: timeout,
        })??;
    tracing::trace!(frame = %String::from_utf8_lossy(&buf).escape_debug(), "rx");
    Ok(buf)
}

/// [`read_until_suffix`] decoded as UTF-8 (lossy).
pub async fn read_line_until<R: AsyncBufRead + Unpin + ?Sized>(
    port: &mut R,
    suffix: &[u8],
    timeout: Duration,
    operation: &str,
) -> StageResult<String> {
    let buf = read_until_suffix(port, suffix, timeout, operation).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        host.write_all(b"Hello\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "Hello");
    }

    #[tokio::test]
    async fn test_read_until_suffix_strips_terminator() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));
        host.write_all(b"1 2 3\r\nrest").await.unwrap();

        let mut guard = port.lock().await;
        let line = read_line_until(&mut *guard, b"\r\n", Duration::from_secs(1), "p")
            .await
            .unwrap();
        assert_eq!(line, "1 2 3");
    }

    #[tokio::test]
    async fn test_read_until_suffix_times_out() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));
        host.write_all(b"no terminator").await.unwrap();

        let mut guard = port.lock().await;
        let err = read_until_suffix(&mut *guard, b"\n", Duration::from_millis(20), "st")
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_closed_link_is_connection_failure() {
        let (host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));
        drop(host);

        let mut guard = port.lock().await;
        let err = read_until_suffix(&mut *guard, b"\n", Duration::from_secs(1), "st")
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ConnectionFailure(_)));
        let err = read_byte(&mut *guard, Duration::from_secs(1), "st")
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ConnectionFailure(_)));
    }

    #[tokio::test]
    async fn test_write_frame_reaches_peer() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));
        {
            let mut guard = port.lock().await;
            write_frame(guard.get_mut(), b"1TS\r\n").await.unwrap();
        }
        let mut buf = [0u8; 5];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"1TS\r\n");
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, Duration::from_millis(50)).await;
        assert_eq!(discarded, 16);
    }
}
