//! Tic command codes, variable layout and status decoding.
//!
//! Reference: Pololu Tic user's guide, sections "Command reference" and
//! "Variable reference". Variables are little-endian and read with
//! `GET_VARIABLE` at a byte offset.

use serde::Deserialize;
use stage_core::capabilities::MotionState;
use stage_core::error::{DeviceFault, StageError, StageResult};

// =============================================================================
// Commands
// =============================================================================

/// Command codes, sent as the `bRequest` field of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum TicCommand {
    SetTargetPosition = 0xE0,
    SetTargetVelocity = 0xE3,
    HaltAndSetPosition = 0xEC,
    HaltAndHold = 0x89,
    GoHome = 0x97,
    ResetCommandTimeout = 0x8C,
    Deenergize = 0x86,
    Energize = 0x85,
    ExitSafeStart = 0x83,
    EnterSafeStart = 0x8F,
    Reset = 0xB0,
    ClearDriverError = 0x8A,
    SetMaxSpeed = 0xE6,
    SetStartingSpeed = 0xE5,
    SetMaxAcceleration = 0xEA,
    SetMaxDeceleration = 0xE9,
    SetStepMode = 0x94,
    SetCurrentLimit = 0x91,
    SetDecayMode = 0x92,
    SetAgcOption = 0x98,
    GetVariable = 0xA1,
    GetVariableAndClearErrorsOccurred = 0xA2,
    GetSetting = 0xA8,
    SetSetting = 0x13,
    Reinitialize = 0x10,
    StartBootloader = 0xFF,
}

impl TicCommand {
    /// Request code on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Variables
// =============================================================================

/// Where a variable lives in the Tic variable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    /// Byte offset.
    pub offset: u16,
    /// Size in bytes (1, 2 or 4).
    pub size: u16,
    /// Two's complement when true.
    pub signed: bool,
}

impl VariableLayout {
    const fn new(offset: u16, size: u16, signed: bool) -> Self {
        Self {
            offset,
            size,
            signed,
        }
    }

    /// Decode little-endian bytes read for this variable.
    pub fn decode(&self, bytes: &[u8]) -> StageResult<i64> {
        if bytes.len() != usize::from(self.size) {
            return Err(StageError::protocol(
                format!("GET_VARIABLE offset {:#04x} size {}", self.offset, self.size),
                format!("{bytes:02x?}"),
            ));
        }
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        let unsigned = u64::from_le_bytes(raw);
        if self.signed {
            let shift = 64 - 8 * u32::from(self.size);
            Ok(((unsigned << shift) as i64) >> shift)
        } else {
            Ok(unsigned as i64)
        }
    }
}

/// Variables readable with `GET_VARIABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TicVariable {
    OperationState,
    MiscFlags,
    ErrorStatus,
    ErrorsOccurred,
    PlanningMode,
    TargetPosition,
    TargetVelocity,
    StartingSpeed,
    MaxSpeed,
    MaxDeceleration,
    MaxAcceleration,
    CurrentPosition,
    CurrentVelocity,
    ActingTargetPosition,
    TimeSinceLastStep,
    DeviceReset,
    VinVoltage,
    UpTime,
    EncoderPosition,
    RcPulseWidth,
    AnalogReadingScl,
    AnalogReadingSda,
    AnalogReadingTx,
    AnalogReadingRx,
    DigitalReadings,
    PinStates,
    StepMode,
    CurrentLimit,
    DecayMode,
    InputState,
    InputAfterAveraging,
    InputAfterHysteresis,
    InputAfterScaling,
    LastMotorDriverError,
    AgcMode,
    AgcBottomCurrentLimit,
    AgcCurrentBoostStep,
    AgcFrequencyLimit,
    LastHpDriverErrors,
}

impl TicVariable {
    /// Offset, size and signedness.
    pub fn layout(self) -> VariableLayout {
        use TicVariable::*;
        match self {
            OperationState => VariableLayout::new(0x00, 1, false),
            MiscFlags => VariableLayout::new(0x01, 1, false),
            ErrorStatus => VariableLayout::new(0x02, 2, false),
            ErrorsOccurred => VariableLayout::new(0x04, 4, false),
            PlanningMode => VariableLayout::new(0x09, 1, false),
            TargetPosition => VariableLayout::new(0x0a, 4, true),
            TargetVelocity => VariableLayout::new(0x0e, 4, true),
            StartingSpeed => VariableLayout::new(0x12, 4, false),
            MaxSpeed => VariableLayout::new(0x16, 4, false),
            MaxDeceleration => VariableLayout::new(0x1a, 4, false),
            MaxAcceleration => VariableLayout::new(0x1e, 4, false),
            CurrentPosition => VariableLayout::new(0x22, 4, true),
            CurrentVelocity => VariableLayout::new(0x26, 4, true),
            ActingTargetPosition => VariableLayout::new(0x2a, 4, true),
            TimeSinceLastStep => VariableLayout::new(0x2e, 4, false),
            DeviceReset => VariableLayout::new(0x32, 1, false),
            VinVoltage => VariableLayout::new(0x33, 2, false),
            UpTime => VariableLayout::new(0x35, 4, false),
            EncoderPosition => VariableLayout::new(0x39, 4, true),
            RcPulseWidth => VariableLayout::new(0x3d, 2, false),
            AnalogReadingScl => VariableLayout::new(0x3f, 2, false),
            AnalogReadingSda => VariableLayout::new(0x41, 2, false),
            AnalogReadingTx => VariableLayout::new(0x43, 2, false),
            AnalogReadingRx => VariableLayout::new(0x45, 2, false),
            DigitalReadings => VariableLayout::new(0x47, 1, false),
            PinStates => VariableLayout::new(0x48, 1, false),
            StepMode => VariableLayout::new(0x49, 1, false),
            CurrentLimit => VariableLayout::new(0x4a, 1, false),
            DecayMode => VariableLayout::new(0x4b, 1, false),
            InputState => VariableLayout::new(0x4c, 1, false),
            InputAfterAveraging => VariableLayout::new(0x4d, 2, false),
            InputAfterHysteresis => VariableLayout::new(0x4f, 2, false),
            InputAfterScaling => VariableLayout::new(0x51, 4, true),
            LastMotorDriverError => VariableLayout::new(0x55, 1, false),
            AgcMode => VariableLayout::new(0x56, 1, false),
            AgcBottomCurrentLimit => VariableLayout::new(0x57, 1, false),
            AgcCurrentBoostStep => VariableLayout::new(0x58, 1, false),
            AgcFrequencyLimit => VariableLayout::new(0x59, 1, false),
            LastHpDriverErrors => VariableLayout::new(0xff, 1, false),
        }
    }
}

// =============================================================================
// Decoded values
// =============================================================================

/// Homing direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
#[repr(u8)]
pub enum TicDirection {
    #[default]
    Reverse = 0,
    Forward = 1,
}

/// `OPERATION_STATE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum OperationState {
    Reset = 0,
    Deenergized = 2,
    SoftError = 4,
    WaitingForErrLine = 6,
    StartingUp = 8,
    Normal = 10,
}

impl OperationState {
    /// Decode a raw state byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Reset),
            2 => Some(Self::Deenergized),
            4 => Some(Self::SoftError),
            6 => Some(Self::WaitingForErrLine),
            8 => Some(Self::StartingUp),
            10 => Some(Self::Normal),
            _ => None,
        }
    }
}

/// `PLANNING_MODE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum PlanningMode {
    Off = 0,
    TargetPosition = 1,
    TargetVelocity = 2,
}

impl PlanningMode {
    /// Decode a raw mode byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::TargetPosition),
            2 => Some(Self::TargetVelocity),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// `MISC_FLAGS` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MiscFlags: u8 {
        const ENERGIZED = 1;
        const POSITION_UNCERTAIN = 1 << 1;
        const FORWARD_LIMIT_ACTIVE = 1 << 2;
        const REVERSE_LIMIT_ACTIVE = 1 << 3;
        const HOMING_ACTIVE = 1 << 4;
    }
}

impl MiscFlags {
    /// Decode a raw `MISC_FLAGS` value. Undefined bits are a protocol error.
    pub fn decode(raw: i64) -> StageResult<Self> {
        u8::try_from(raw)
            .ok()
            .and_then(Self::from_bits)
            .ok_or_else(|| StageError::protocol("GET_VARIABLE MISC_FLAGS", format!("{raw:#x}")))
    }
}

bitflags::bitflags! {
    /// `ERROR_STATUS` bits. `ERRORS_OCCURRED` also latches the serial and
    /// encoder bits from 16 up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorStatus: u32 {
        const INTENTIONALLY_DEENERGIZED = 1;
        const MOTOR_DRIVER_ERROR = 1 << 1;
        const LOW_VIN = 1 << 2;
        const KILL_SWITCH_ACTIVE = 1 << 3;
        const REQUIRED_INPUT_INVALID = 1 << 4;
        const SERIAL_ERROR = 1 << 5;
        const COMMAND_TIMEOUT = 1 << 6;
        const SAFE_START_VIOLATION = 1 << 7;
        const ERR_LINE_HIGH = 1 << 8;
        const SERIAL_FRAMING = 1 << 16;
        const SERIAL_RX_OVERRUN = 1 << 17;
        const SERIAL_FORMAT = 1 << 18;
        const SERIAL_CRC = 1 << 19;
        const ENCODER_SKIP = 1 << 20;
    }
}

impl ErrorStatus {
    /// Decode a raw error variable. Undefined bits are a protocol error.
    pub fn decode(variable: &str, raw: i64) -> StageResult<Self> {
        u32::try_from(raw)
            .ok()
            .and_then(Self::from_bits)
            .ok_or_else(|| StageError::protocol(format!("GET_VARIABLE {variable}"), format!("{raw:#x}")))
    }

    /// The error bits as a device fault, if any is set.
    pub fn fault(&self) -> Option<DeviceFault> {
        if self.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        Some(DeviceFault::new(
            "Pololu Tic",
            i64::from(self.bits()),
            names.join(" | "),
        ))
    }
}

/// Coarse motion state from the decoded status variables.
pub fn motion_state(state: OperationState, flags: MiscFlags, moving: bool) -> MotionState {
    if state != OperationState::Normal {
        MotionState::Disabled
    } else if flags.contains(MiscFlags::HOMING_ACTIVE) {
        MotionState::Homing
    } else if moving {
        MotionState::Moving
    } else if flags.contains(MiscFlags::POSITION_UNCERTAIN) {
        MotionState::NotReferenced
    } else {
        MotionState::Idle
    }
}
