//! `TS` (positioner error and controller state) decoding.
//!
//! The reply is six hex digits: four for the positioner error bitmask,
//! two for the controller state code.

use stage_core::capabilities::MotionState;
use stage_core::error::{DeviceFault, StageError, StageResult};

bitflags::bitflags! {
    /// Positioner error bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Faults: u16 {
        const NEGATIVE_END_OF_RUN = 1;
        const POSITIVE_END_OF_RUN = 1 << 1;
        const PEAK_CURRENT_LIMIT = 1 << 2;
        const RMS_CURRENT_LIMIT = 1 << 3;
        const SHORT_CIRCUIT = 1 << 4;
        const FOLLOWING_ERROR = 1 << 5;
        const HOMING_TIMEOUT = 1 << 6;
        const WRONG_STAGE = 1 << 7;
        const DC_VOLTAGE_TOO_LOW = 1 << 8;
        const OUTPUT_POWER_EXCEEDED = 1 << 9;
    }
}

/// Controller state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum ControllerState {
    NotReferencedFromReset = 0x0a,
    NotReferencedFromHoming = 0x0b,
    NotReferencedFromConfiguration = 0x0c,
    NotReferencedFromDisable = 0x0d,
    NotReferencedFromReady = 0x0e,
    NotReferencedFromMoving = 0x0f,
    NotReferencedStageError = 0x10,
    NotReferencedFromJogging = 0x11,
    Configuration = 0x14,
    HomingRs232 = 0x1e,
    HomingSmcrc = 0x1f,
    Moving = 0x28,
    ReadyFromHoming = 0x32,
    ReadyFromMoving = 0x33,
    ReadyFromDisable = 0x34,
    ReadyFromJogging = 0x35,
    DisableFromReady = 0x3c,
    DisableFromMoving = 0x3d,
    DisableFromJogging = 0x3e,
    JoggingFromReady = 0x46,
    JoggingFromDisable = 0x47,
}

impl ControllerState {
    /// Decode a state code.
    pub fn from_code(code: u8) -> Option<Self> {
        use ControllerState::*;
        let state = match code {
            0x0a => NotReferencedFromReset,
            0x0b => NotReferencedFromHoming,
            0x0c => NotReferencedFromConfiguration,
            0x0d => NotReferencedFromDisable,
            0x0e => NotReferencedFromReady,
            0x0f => NotReferencedFromMoving,
            0x10 => NotReferencedStageError,
            0x11 => NotReferencedFromJogging,
            0x14 => Configuration,
            0x1e => HomingRs232,
            0x1f => HomingSmcrc,
            0x28 => Moving,
            0x32 => ReadyFromHoming,
            0x33 => ReadyFromMoving,
            0x34 => ReadyFromDisable,
            0x35 => ReadyFromJogging,
            0x3c => DisableFromReady,
            0x3d => DisableFromMoving,
            0x3e => DisableFromJogging,
            0x46 => JoggingFromReady,
            0x47 => JoggingFromDisable,
            _ => return None,
        };
        Some(state)
    }

    /// Raw state code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    fn in_range(&self, first: ControllerState, last: ControllerState) -> bool {
        (first..=last).contains(self)
    }

    /// Not one of the NOT REFERENCED states.
    pub fn is_referenced(&self) -> bool {
        !self.in_range(
            ControllerState::NotReferencedFromReset,
            ControllerState::NotReferencedFromJogging,
        )
    }

    /// One of the READY states.
    pub fn is_ready(&self) -> bool {
        self.in_range(
            ControllerState::ReadyFromHoming,
            ControllerState::ReadyFromJogging,
        )
    }

    /// One of the HOMING states.
    pub fn is_homing(&self) -> bool {
        self.in_range(ControllerState::HomingRs232, ControllerState::HomingSmcrc)
    }

    /// One of the DISABLE states.
    pub fn is_disabled(&self) -> bool {
        self.in_range(
            ControllerState::DisableFromReady,
            ControllerState::DisableFromJogging,
        )
    }

    /// One of the JOGGING states.
    pub fn is_jogging(&self) -> bool {
        self.in_range(
            ControllerState::JoggingFromReady,
            ControllerState::JoggingFromDisable,
        )
    }

    /// Moving, homing or jogging.
    pub fn is_moving(&self) -> bool {
        *self == ControllerState::Moving || self.is_homing() || self.is_jogging()
    }
}

impl From<ControllerState> for MotionState {
    fn from(state: ControllerState) -> Self {
        if state.is_homing() {
            MotionState::Homing
        } else if state.is_moving() {
            MotionState::Moving
        } else if !state.is_referenced() {
            MotionState::NotReferenced
        } else if state.is_ready() {
            MotionState::Idle
        } else {
            MotionState::Disabled
        }
    }
}

/// Decoded `TS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorAndState {
    /// Positioner error bits.
    pub faults: Faults,
    /// Controller state.
    pub state: ControllerState,
}

impl ErrorAndState {
    /// Parse the six hex digits following the `TS` prefix.
    pub fn parse(reply: &str) -> StageResult<Self> {
        let bad = || StageError::protocol("TS?", reply);
        if reply.len() != 6 || !reply.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad());
        }
        let bits = u16::from_str_radix(&reply[..4], 16).map_err(|_| bad())?;
        let code = u8::from_str_radix(&reply[4..], 16).map_err(|_| bad())?;
        Ok(Self {
            faults: Faults::from_bits(bits).ok_or_else(bad)?,
            state: ControllerState::from_code(code).ok_or_else(bad)?,
        })
    }

    /// Not in a NOT REFERENCED state.
    pub fn is_referenced(&self) -> bool {
        self.state.is_referenced()
    }

    /// In a READY state.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Moving, homing or jogging.
    pub fn is_moving(&self) -> bool {
        self.state.is_moving()
    }

    /// Positioner errors as a device fault, if any bit is set.
    pub fn fault(&self, address: u8) -> Option<DeviceFault> {
        if self.faults.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.faults.iter_names().map(|(name, _)| name).collect();
        Some(DeviceFault::new(
            format!("SMC100 #{address}"),
            i64::from(self.faults.bits()),
            format!("{} ({:?})", names.join(" | "), self.state),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_without_faults() {
        let es = ErrorAndState::parse("000028").unwrap();
        assert!(es.faults.is_empty());
        assert_eq!(es.state, ControllerState::Moving);
        assert!(es.is_moving());
        assert!(!es.is_ready());
        assert!(es.is_referenced());
        assert!(es.fault(1).is_none());
        assert_eq!(MotionState::from(es.state), MotionState::Moving);
    }

    #[test]
    fn test_faults_and_ready_state() {
        let es = ErrorAndState::parse("002832").unwrap();
        assert_eq!(es.faults, Faults::FOLLOWING_ERROR | Faults::RMS_CURRENT_LIMIT);
        assert_eq!(es.state, ControllerState::ReadyFromHoming);
        assert!(es.is_ready());
        let fault = es.fault(2).unwrap();
        assert_eq!(fault.device, "SMC100 #2");
        assert_eq!(fault.code, 0x28);
        assert!(fault.description.contains("FOLLOWING_ERROR"));
    }

    #[test]
    fn test_state_ranges() {
        let not_referenced = ErrorAndState::parse("00000A").unwrap();
        assert!(!not_referenced.is_referenced());
        assert_eq!(
            MotionState::from(not_referenced.state),
            MotionState::NotReferenced
        );
        assert!(ControllerState::HomingSmcrc.is_homing());
        assert!(ControllerState::JoggingFromDisable.is_moving());
        assert!(ControllerState::DisableFromMoving.is_disabled());
        assert_eq!(
            MotionState::from(ControllerState::Configuration),
            MotionState::Disabled
        );
        assert_eq!(ControllerState::ReadyFromJogging.code(), 0x35);
    }

    #[test]
    fn test_invalid_replies() {
        assert!(ErrorAndState::parse("0000").is_err());
        assert!(ErrorAndState::parse("0000zz").is_err());
        assert!(ErrorAndState::parse("000099").is_err());
    }

    #[test]
    fn test_undefined_fault_bits_are_rejected() {
        match ErrorAndState::parse("FC0032") {
            Err(StageError::Protocol { query, response }) => {
                assert_eq!(query, "TS?");
                assert_eq!(response, "FC0032");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(ErrorAndState::parse("040032").is_err());
        assert_eq!(
            ErrorAndState::parse("030032").unwrap().faults,
            Faults::DC_VOLTAGE_TOO_LOW | Faults::OUTPUT_POWER_EXCEEDED
        );
    }
}
