//! libusb transport for the Tic.
//!
//! libusb calls block, so every transfer runs on the blocking thread pool.

use crate::transport::{ControlTransport, REQUEST_TYPE_IN, REQUEST_TYPE_OUT};
use async_trait::async_trait;
use rusb::{DeviceHandle, GlobalContext};
use stage_core::error::{StageError, StageResult};
use std::sync::Arc;
use std::time::Duration;

/// Pololu USB vendor ID.
pub const VENDOR_ID: u16 = 0x1FFB;
/// Tic T825 product ID.
pub const PRODUCT_ID: u16 = 0x00B5;

/// An opened Tic.
pub struct UsbTransport {
    handle: Arc<DeviceHandle<GlobalContext>>,
    timeout: Duration,
}

fn usb_error(operation: &str, timeout: Duration, e: rusb::Error) -> StageError {
    match e {
        rusb::Error::Timeout => StageError::Timeout {
            operation: operation.to_string(),
            elapsed: timeout,
        },
        other => StageError::ConnectionFailure(format!("{operation}: {other}")),
    }
}

fn join_error(e: tokio::task::JoinError) -> StageError {
    StageError::ConnectionFailure(format!("USB task failed: {e}"))
}

impl UsbTransport {
    /// Find and open the Tic.
    ///
    /// Without a serial number exactly one Tic must be attached. With one,
    /// exactly one Tic must report it.
    pub async fn open(serial_number: Option<String>, timeout: Duration) -> StageResult<Self> {
        let handle = tokio::task::spawn_blocking(move || find_device(serial_number.as_deref(), timeout))
            .await
            .map_err(join_error)??;
        Ok(Self {
            handle: Arc::new(handle),
            timeout,
        })
    }
}

fn find_device(
    serial_number: Option<&str>,
    timeout: Duration,
) -> StageResult<DeviceHandle<GlobalContext>> {
    let devices = rusb::devices().map_err(|e| usb_error("list USB devices", timeout, e))?;
    let mut matches = Vec::new();

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
            continue;
        }
        let handle = device
            .open()
            .map_err(|e| usb_error("open Tic", timeout, e))?;
        if let Some(wanted) = serial_number {
            let serial = handle
                .read_serial_number_string_ascii(&descriptor)
                .map_err(|e| usb_error("read Tic serial number", timeout, e))?;
            if serial != wanted {
                continue;
            }
        }
        matches.push(handle);
    }

    match matches.len() {
        0 => Err(StageError::ConnectionFailure(match serial_number {
            Some(s) => format!("no Tic with serial number {s}"),
            None => "no Tic found".to_string(),
        })),
        1 => {
            let handle = matches.remove(0);
            if let Err(e) = handle.set_active_configuration(1) {
                tracing::warn!(error = %e, "Could not set Tic USB configuration");
            }
            tracing::info!(serial = ?serial_number, "Opened Tic");
            Ok(handle)
        }
        n => Err(StageError::ConnectionFailure(format!(
            "{n} Tics match, set serial_number"
        ))),
    }
}

#[async_trait]
impl ControlTransport for UsbTransport {
    async fn control_out(&self, request: u8, value: u16, index: u16) -> StageResult<()> {
        let handle = Arc::clone(&self.handle);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            handle
                .write_control(REQUEST_TYPE_OUT, request, value, index, &[], timeout)
                .map(|_| ())
                .map_err(|e| usb_error("Tic control out", timeout, e))
        })
        .await
        .map_err(join_error)?
    }

    async fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> StageResult<Vec<u8>> {
        let handle = Arc::clone(&self.handle);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; usize::from(length)];
            let n = handle
                .read_control(REQUEST_TYPE_IN, request, value, index, &mut buf, timeout)
                .map_err(|e| usb_error("Tic control in", timeout, e))?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(join_error)?
    }
}
