//! Control-transfer transport and the Tic transfer shapes built on it.
//!
//! The Tic has no byte framing. Every command is a vendor control transfer:
//! the command code is `bRequest`, and payloads ride in `wValue` / `wIndex`.
//!
//! | shape        | direction | wValue      | wIndex       | length |
//! |--------------|-----------|-------------|--------------|--------|
//! | quick        | out       | 0           | 0            | 0      |
//! | 7-bit write  | out       | data        | 0            | 0      |
//! | 32-bit write | out       | low 16 bits | high 16 bits | 0      |
//! | block read   | in        | 0           | offset       | n      |
//! | set setting  | out       | data        | offset       | 0      |

use crate::variables::{TicCommand, TicVariable};
use async_trait::async_trait;
use stage_core::error::{StageError, StageResult};
use std::sync::Arc;

/// `bmRequestType` for host-to-device vendor requests.
pub const REQUEST_TYPE_OUT: u8 = 0x40;
/// `bmRequestType` for device-to-host vendor requests.
pub const REQUEST_TYPE_IN: u8 = 0xC0;

/// A USB device endpoint that accepts vendor control transfers.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Host-to-device transfer without data stage.
    async fn control_out(&self, request: u8, value: u16, index: u16) -> StageResult<()>;

    /// Device-to-host transfer returning up to `length` bytes.
    async fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> StageResult<Vec<u8>>;
}

/// Tic transfer shapes over a shared transport.
#[derive(Clone)]
pub struct TicLink {
    transport: Arc<dyn ControlTransport>,
}

impl TicLink {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn ControlTransport>) -> Self {
        Self { transport }
    }

    /// Command with no data.
    pub async fn quick(&self, command: TicCommand) -> StageResult<()> {
        tracing::trace!(?command, "Tic quick");
        self.transport.control_out(command.code(), 0, 0).await
    }

    /// Command with a 7-bit argument.
    pub async fn write_7(&self, command: TicCommand, data: u8) -> StageResult<()> {
        if data > 0x7f {
            return Err(StageError::InvalidArgument(format!(
                "{command:?} takes a 7-bit value, got {data}"
            )));
        }
        tracing::trace!(?command, data, "Tic write_7");
        self.transport
            .control_out(command.code(), u16::from(data), 0)
            .await
    }

    /// Command with a 32-bit argument, split across value (low) and index (high).
    pub async fn write_32(&self, command: TicCommand, data: u32) -> StageResult<()> {
        tracing::trace!(?command, data, "Tic write_32");
        self.transport
            .control_out(command.code(), (data & 0xffff) as u16, (data >> 16) as u16)
            .await
    }

    /// Signed 32-bit argument, sent two's complement.
    pub async fn write_i32(&self, command: TicCommand, data: i32) -> StageResult<()> {
        self.write_32(command, data as u32).await
    }

    /// Read `length` bytes starting at `offset`.
    pub async fn block_read(
        &self,
        command: TicCommand,
        offset: u16,
        length: u16,
    ) -> StageResult<Vec<u8>> {
        let data = self
            .transport
            .control_in(command.code(), 0, offset, length)
            .await?;
        tracing::trace!(?command, offset, ?data, "Tic block_read");
        if data.len() != usize::from(length) {
            return Err(StageError::protocol(
                format!("{command:?} offset {offset:#04x} length {length}"),
                format!("{data:02x?}"),
            ));
        }
        Ok(data)
    }

    /// Write one settings byte at `offset`.
    pub async fn set_setting(&self, command: TicCommand, data: u8, offset: u16) -> StageResult<()> {
        self.transport
            .control_out(command.code(), u16::from(data), offset)
            .await
    }

    /// Read and decode a variable.
    pub async fn get_variable(&self, variable: TicVariable) -> StageResult<i64> {
        self.read_variable(TicCommand::GetVariable, variable).await
    }

    /// Read a variable and clear `ERRORS_OCCURRED` in the same transfer.
    pub async fn get_variable_and_clear_errors(&self, variable: TicVariable) -> StageResult<i64> {
        self.read_variable(TicCommand::GetVariableAndClearErrorsOccurred, variable)
            .await
    }

    async fn read_variable(&self, command: TicCommand, variable: TicVariable) -> StageResult<i64> {
        let layout = variable.layout();
        let bytes = self.block_read(command, layout.offset, layout.size).await?;
        layout.decode(&bytes)
    }
}

/// In-memory Tic used by the driver tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::variables::MiscFlags;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// One recorded out transfer: (request, value, index).
    pub type OutTransfer = (u8, u16, u16);

    /// Variable memory with scripted overrides.
    ///
    /// Reads at an offset with queued values consume the queue first; once
    /// drained, reads fall back to the memory image. `GO_HOME` sets the
    /// homing flag, which then clears after `homing_reads` flag reads.
    pub struct MockTic {
        memory: Mutex<Vec<u8>>,
        queued: Mutex<Vec<(u16, VecDeque<Vec<u8>>)>>,
        writes: Mutex<Vec<OutTransfer>>,
        homing_reads: Mutex<usize>,
        homing_budget: usize,
        fail_reads: Mutex<bool>,
    }

    impl MockTic {
        pub fn new() -> Self {
            let mut memory = vec![0u8; 256];
            memory[0] = 10; // operation state: normal
            memory[1] = MiscFlags::ENERGIZED.bits();
            memory[0x09] = 1; // planning mode: target position
            Self {
                memory: Mutex::new(memory),
                queued: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
                homing_reads: Mutex::new(0),
                homing_budget: 3,
                fail_reads: Mutex::new(false),
            }
        }

        pub fn with_homing_reads(mut self, reads: usize) -> Self {
            self.homing_budget = reads;
            self
        }

        pub fn set_bytes(&self, offset: u16, bytes: &[u8]) {
            let start = usize::from(offset);
            self.memory.lock()[start..start + bytes.len()].copy_from_slice(bytes);
        }

        pub fn set_i32(&self, variable: TicVariable, value: i32) {
            self.set_bytes(variable.layout().offset, &value.to_le_bytes());
        }

        pub fn queue(&self, offset: u16, bytes: Vec<u8>) {
            let mut queued = self.queued.lock();
            match queued.iter_mut().find(|(o, _)| *o == offset) {
                Some((_, q)) => q.push_back(bytes),
                None => queued.push((offset, VecDeque::from([bytes]))),
            }
        }

        pub fn fail_reads(&self) {
            *self.fail_reads.lock() = true;
        }

        pub fn writes(&self) -> Vec<OutTransfer> {
            self.writes.lock().clone()
        }

        pub fn count(&self, command: TicCommand) -> usize {
            self.writes
                .lock()
                .iter()
                .filter(|(r, _, _)| *r == command.code())
                .count()
        }

        pub fn homing_active(&self) -> bool {
            self.memory.lock()[1] & MiscFlags::HOMING_ACTIVE.bits() != 0
        }
    }

    #[async_trait]
    impl ControlTransport for MockTic {
        async fn control_out(&self, request: u8, value: u16, index: u16) -> StageResult<()> {
            self.writes.lock().push((request, value, index));
            if request == TicCommand::GoHome.code() {
                self.memory.lock()[1] |= MiscFlags::HOMING_ACTIVE.bits();
                *self.homing_reads.lock() = self.homing_budget;
            }
            Ok(())
        }

        async fn control_in(
            &self,
            request: u8,
            value: u16,
            index: u16,
            length: u16,
        ) -> StageResult<Vec<u8>> {
            if *self.fail_reads.lock() {
                return Err(StageError::ConnectionFailure("device unplugged".into()));
            }
            assert!(
                request == TicCommand::GetVariable.code()
                    || request == TicCommand::GetVariableAndClearErrorsOccurred.code()
            );
            assert_eq!(value, 0);

            if let Some((_, q)) = self.queued.lock().iter_mut().find(|(o, _)| *o == index) {
                if let Some(bytes) = q.pop_front() {
                    return Ok(bytes);
                }
            }

            if index == 1 {
                let mut remaining = self.homing_reads.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                } else {
                    self.memory.lock()[1] &= !MiscFlags::HOMING_ACTIVE.bits();
                }
            }

            let mut memory = self.memory.lock();
            let start = usize::from(index);
            let out = memory[start..start + usize::from(length)].to_vec();
            if request == TicCommand::GetVariableAndClearErrorsOccurred.code() {
                memory[0x04..0x08].fill(0);
            }
            Ok(out)
        }
    }
}
