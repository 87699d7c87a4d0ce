//! Scripted serial device for driver tests.
//!
//! A test describes the exact bytes the driver must send and the bytes the
//! device answers with. [`scripted_port`] spawns a task playing the device
//! side of a `tokio::io::duplex` pair and hands back the driver side as a
//! [`SharedPort`].
//!
//! ```rust,ignore
//! let (port, device) = scripted_port(vec![
//!     Exchange::new("1TS?\r\n", "1TS000032\r\n"),
//! ]);
//! let stage = Smc100::with_port(port, &[1]).await?;
//! device.finish().await;
//! ```
//!
//! The device task fails (and [`ScriptedDevice::finish`] panics) when the
//! driver sends anything other than the scripted request.

use crate::serial::{wrap_shared, SharedPort};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// How long the device waits for each scripted request.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// One request/response turn.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Bytes the driver must send.
    pub request: Vec<u8>,
    /// Bytes the device answers with (may be empty).
    pub response: Vec<u8>,
}

impl Exchange {
    /// Request followed by a response.
    pub fn new(request: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> Self {
        Self {
            request: request.as_ref().to_vec(),
            response: response.as_ref().to_vec(),
        }
    }

    /// Request the device does not answer.
    pub fn silent(request: impl AsRef<[u8]>) -> Self {
        Self::new(request, b"")
    }

    /// Unsolicited bytes pushed by the device without waiting for a request.
    pub fn unsolicited(response: impl AsRef<[u8]>) -> Self {
        Self::new(b"", response)
    }
}

/// Handle on the spawned device task.
pub struct ScriptedDevice {
    handle: JoinHandle<Result<DuplexStream, String>>,
}

impl ScriptedDevice {
    /// Wait for the script to complete and panic on any mismatch.
    ///
    /// Returns the device end of the link so a test can keep talking to the
    /// driver or assert that nothing else was sent.
    #[allow(clippy::panic)]
    pub async fn finish(self) -> DuplexStream {
        match self.handle.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(msg)) => panic!("scripted device: {msg}"),
            Err(e) => panic!("scripted device task failed: {e}"),
        }
    }
}

async fn play(mut stream: DuplexStream, script: Vec<Exchange>) -> Result<DuplexStream, String> {
    for (i, exchange) in script.into_iter().enumerate() {
        if !exchange.request.is_empty() {
            let mut got = vec![0u8; exchange.request.len()];
            match tokio::time::timeout(EXCHANGE_TIMEOUT, stream.read_exact(&mut got)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(format!("exchange {i}: read failed: {e}")),
                Err(_) => {
                    return Err(format!(
                        "exchange {i}: timed out waiting for {:?}",
                        String::from_utf8_lossy(&exchange.request)
                    ))
                }
            }
            if got != exchange.request {
                return Err(format!(
                    "exchange {i}: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&exchange.request),
                    String::from_utf8_lossy(&got)
                ));
            }
        }
        if !exchange.response.is_empty() {
            stream
                .write_all(&exchange.response)
                .await
                .map_err(|e| format!("exchange {i}: write failed: {e}"))?;
        }
    }
    Ok(stream)
}

/// Spawn a scripted device and return the driver side of the link.
pub fn scripted_port(script: Vec<Exchange>) -> (SharedPort, ScriptedDevice) {
    let (driver_end, device_end) = tokio::io::duplex(4096);
    let handle = tokio::spawn(play(device_end, script));
    (wrap_shared(Box::new(driver_end)), ScriptedDevice { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{read_line_until, write_frame};

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let (port, device) = scripted_port(vec![
            Exchange::new("a\n", "1\n"),
            Exchange::silent("b\n"),
            Exchange::new("c\n", "3\n"),
        ]);
        let mut guard = port.lock().await;
        write_frame(guard.get_mut(), b"a\n").await.unwrap();
        let one = read_line_until(&mut *guard, b"\n", EXCHANGE_TIMEOUT, "a")
            .await
            .unwrap();
        write_frame(guard.get_mut(), b"b\nc\n").await.unwrap();
        let three = read_line_until(&mut *guard, b"\n", EXCHANGE_TIMEOUT, "c")
            .await
            .unwrap();
        assert_eq!((one.as_str(), three.as_str()), ("1", "3"));
        drop(guard);
        device.finish().await;
    }

    #[tokio::test]
    async fn test_mismatch_is_reported() {
        let (port, device) = scripted_port(vec![Exchange::new("ab", "")]);
        {
            let mut guard = port.lock().await;
            write_frame(guard.get_mut(), b"xy").await.unwrap();
        }
        let result = device.handle.await.unwrap();
        assert!(result.unwrap_err().contains("expected"));
    }
}
