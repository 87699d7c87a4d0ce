//! Real-time status reports (`?`).
//!
//! A report looks like `<Idle|MPos:1.000,3.000,4.000|FS:0,0|WCO:0.000,0.000,0.000>`:
//! chevrons around pipe-separated fields, the first being the machine state.
//! Every other field is `Key:value`, where a value containing `,` is a list.

use stage_core::capabilities::MotionState;
use stage_core::error::{StageError, StageResult};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Machine state, first field of a status report.
///
/// `Hold` and `Door` may carry a sub-state code (`Hold:1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrblState {
    /// Ready for commands.
    Idle,
    /// Executing motion.
    Run,
    /// Feed hold.
    Hold(Option<u8>),
    /// Jogging.
    Jog,
    /// Locked by an alarm.
    Alarm,
    /// Safety door open.
    Door(Option<u8>),
    /// G-code check mode.
    Check,
    /// Homing cycle.
    Home,
    /// Sleep mode (`$SLP`).
    Sleep,
}

impl GrblState {
    /// Whether the machine is moving (running, jogging or homing).
    pub fn is_moving(&self) -> bool {
        matches!(self, GrblState::Run | GrblState::Jog | GrblState::Home)
    }
}

impl From<GrblState> for MotionState {
    fn from(state: GrblState) -> Self {
        match state {
            GrblState::Idle | GrblState::Check => MotionState::Idle,
            GrblState::Run | GrblState::Jog => MotionState::Moving,
            GrblState::Home => MotionState::Homing,
            GrblState::Alarm => MotionState::Alarm,
            GrblState::Hold(_) | GrblState::Door(_) | GrblState::Sleep => MotionState::Disabled,
        }
    }
}

impl FromStr for GrblState {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        let (name, sub) = match s.split_once(':') {
            Some((name, sub)) => {
                let code = sub
                    .parse::<u8>()
                    .map_err(|_| StageError::protocol("?", s.to_string()))?;
                (name, Some(code))
            }
            None => (s, None),
        };
        let state = match (name, sub) {
            ("Idle", None) => GrblState::Idle,
            ("Run", None) => GrblState::Run,
            ("Hold", sub) => GrblState::Hold(sub),
            ("Jog", None) => GrblState::Jog,
            ("Alarm", None) => GrblState::Alarm,
            ("Door", sub) => GrblState::Door(sub),
            ("Check", None) => GrblState::Check,
            ("Home", None) => GrblState::Home,
            ("Sleep", None) => GrblState::Sleep,
            _ => return Err(StageError::protocol("?", s.to_string())),
        };
        Ok(state)
    }
}

/// Value of a status report field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Key without `:value`.
    Flag,
    /// Single value.
    Scalar(String),
    /// Comma separated values.
    List(Vec<String>),
}

/// A decoded status report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state.
    pub state: GrblState,
    /// Remaining fields by key.
    pub fields: BTreeMap<String, FieldValue>,
}

impl StatusReport {
    /// Parse a report line, chevrons included.
    pub fn parse(line: &str) -> StageResult<Self> {
        let inner = line
            .strip_prefix('<')
            .and_then(|l| l.strip_suffix('>'))
            .ok_or_else(|| StageError::protocol("?", line))?;

        let mut elements = inner.split('|');
        let state = elements
            .next()
            .ok_or_else(|| StageError::protocol("?", line))?
            .parse()?;

        let fields = elements
            .map(|element| {
                let (key, value) = match element.split_once(':') {
                    None => (element, FieldValue::Flag),
                    Some((key, value)) if value.contains(',') => (
                        key,
                        FieldValue::List(value.split(',').map(str::to_string).collect()),
                    ),
                    Some((key, value)) => (key, FieldValue::Scalar(value.to_string())),
                };
                (key.to_string(), value)
            })
            .collect();

        Ok(Self { state, fields })
    }

    /// Field parsed as a list of floats. A scalar counts as a one-element list.
    pub fn floats(&self, key: &str) -> Option<StageResult<Vec<f64>>> {
        let values: Vec<&str> = match self.fields.get(key)? {
            FieldValue::Flag => Vec::new(),
            FieldValue::Scalar(v) => vec![v.as_str()],
            FieldValue::List(v) => v.iter().map(String::as_str).collect(),
        };
        Some(
            values
                .into_iter()
                .map(|v| {
                    v.parse::<f64>()
                        .map_err(|_| StageError::protocol("?", format!("{key}:{v}")))
                })
                .collect(),
        )
    }

    /// Machine position (`MPos`), if reported.
    pub fn machine_position(&self) -> Option<StageResult<Vec<f64>>> {
        self.floats("MPos")
    }

    /// Work position (`WPos`), if reported.
    pub fn work_position(&self) -> Option<StageResult<Vec<f64>>> {
        self.floats("WPos")
    }

    /// Work coordinate offset (`WCO`), if reported.
    pub fn work_coordinate_offset(&self) -> Option<StageResult<Vec<f64>>> {
        self.floats("WCO")
    }
}
