//! `$$` settings table.
//!
//! GRBL lists its settings as `$N=V` lines. Every known setting has a value
//! type, a factory default and a description; the table below is static and
//! immutable. Unknown setting numbers and out-of-range mask values are
//! rejected.

use stage_core::error::{StageError, StageResult};
use std::collections::BTreeMap;
use std::fmt;

bitflags::bitflags! {
    /// Per-axis invert mask ($2, $3, $23).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InvertMask: u8 {
        const INVERT_X = 1;
        const INVERT_Y = 1 << 1;
        const INVERT_Z = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Content of real-time status reports ($10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusReportMask: u8 {
        const MACHINE_POSITION = 1;
        const WORK_POSITION = 1 << 1;
        const PLANNER_BUFFER = 1 << 2;
        const RX_BUFFER = 1 << 3;
        const LIMIT_PINS = 1 << 4;
    }
}

/// Typed setting value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    /// Numeric setting.
    Float(f64),
    /// Boolean switch, sent as 0/1.
    Bool(bool),
    /// Axis invert mask.
    Invert(InvertMask),
    /// Status report mask.
    StatusReport(StatusReportMask),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Bool(v) => write!(f, "{}", u8::from(*v)),
            SettingValue::Invert(m) => write!(f, "{}", m.bits()),
            SettingValue::StatusReport(m) => write!(f, "{}", m.bits()),
        }
    }
}

macro_rules! grbl_settings {
    ($($name:ident = $num:literal, $default:expr, $desc:literal;)*) => {
        /// Known GRBL settings.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[allow(missing_docs)]
        pub enum GrblSetting {
            $($name,)*
        }

        impl GrblSetting {
            /// Every known setting in numeric order.
            pub const ALL: &'static [GrblSetting] = &[$(GrblSetting::$name,)*];

            /// Setting number (`N` in `$N`).
            pub fn number(&self) -> u16 {
                match self {
                    $(GrblSetting::$name => $num,)*
                }
            }

            /// Factory default value.
            pub fn default_value(&self) -> SettingValue {
                match self {
                    $(GrblSetting::$name => $default,)*
                }
            }

            /// Human readable description.
            pub fn description(&self) -> &'static str {
                match self {
                    $(GrblSetting::$name => $desc,)*
                }
            }

            /// Look a setting up by number.
            pub fn from_number(number: u16) -> Option<Self> {
                match number {
                    $($num => Some(GrblSetting::$name),)*
                    _ => None,
                }
            }
        }
    };
}

use SettingValue::{Bool, Float};

grbl_settings! {
    StepPulse = 0, Float(10.0), "Step pulse, usec";
    StepIdleDelay = 1, Float(25.0), "Step idle delay, msec";
    StepPortInvert = 2, SettingValue::Invert(InvertMask::empty()), "Step port invert";
    DirPortInvert = 3, SettingValue::Invert(InvertMask::INVERT_Y.union(InvertMask::INVERT_Z)), "Direction port invert";
    StepEnableInvert = 4, Bool(false), "Step enable invert";
    LimitPinsInvert = 5, Bool(false), "Limit pins invert";
    ProbePinInvert = 6, Bool(false), "Probe pin invert";
    StatusReportMask = 10, SettingValue::StatusReport(StatusReportMask::MACHINE_POSITION.union(StatusReportMask::WORK_POSITION)), "Status report mask";
    JunctionDeviation = 11, Float(0.020), "Junction deviation, mm";
    ArcTolerance = 12, Float(0.002), "Arc tolerance, mm";
    ReportInches = 13, Bool(false), "Report inches";
    SoftLimits = 20, Bool(false), "Soft limits";
    HardLimits = 21, Bool(false), "Hard limits";
    HomingCycle = 22, Bool(false), "Homing cycle";
    HomingDirInvert = 23, SettingValue::Invert(InvertMask::INVERT_X), "Homing dir invert";
    HomingFeed = 24, Float(50.0), "Homing feed, mm/min";
    HomingSeek = 25, Float(635.0), "Homing seek, mm/min";
    HomingDebounce = 26, Float(250.0), "Homing debounce, msec";
    HomingPullOff = 27, Float(1.0), "Homing pull-off, mm";
    SpindleRpmMax = 30, Float(1000.0), "Spindle maximal rotation speed, rpm";
    SpindleRpmMin = 31, Float(0.0), "Spindle minimal rotation speed, rpm";
    LaserMode = 32, Bool(false), "Laser mode activated";
    StepsPerMmX = 100, Float(800.0), "X steps/mm";
    StepsPerMmY = 101, Float(800.0), "Y steps/mm";
    StepsPerMmZ = 102, Float(800.0), "Z steps/mm";
    MaxRateX = 110, Float(635.0), "X max rate, mm/min";
    MaxRateY = 111, Float(635.0), "Y max rate, mm/min";
    MaxRateZ = 112, Float(635.0), "Z max rate, mm/min";
    AccelerationX = 120, Float(50.0), "X acceleration, mm/sec^2";
    AccelerationY = 121, Float(50.0), "Y acceleration, mm/sec^2";
    AccelerationZ = 122, Float(50.0), "Z acceleration, mm/sec^2";
    MaxTravelX = 130, Float(225.0), "X max travel, mm";
    MaxTravelY = 131, Float(125.0), "Y max travel, mm";
    MaxTravelZ = 132, Float(170.0), "Z max travel, mm";
}

impl GrblSetting {
    /// Decode a raw value with this setting's type.
    pub fn parse_value(&self, raw: &str) -> StageResult<SettingValue> {
        let bad = || StageError::protocol("$$", format!("${}={}", self.number(), raw));
        match self.default_value() {
            SettingValue::Float(_) => raw.trim().parse().map(Float).map_err(|_| bad()),
            SettingValue::Bool(_) => match raw.trim().parse::<u8>().map_err(|_| bad())? {
                0 => Ok(Bool(false)),
                1 => Ok(Bool(true)),
                _ => Err(bad()),
            },
            SettingValue::Invert(_) => {
                let bits = raw.trim().parse::<u8>().map_err(|_| bad())?;
                InvertMask::from_bits(bits)
                    .map(SettingValue::Invert)
                    .ok_or_else(bad)
            }
            SettingValue::StatusReport(_) => {
                let bits = raw.trim().parse::<u8>().map_err(|_| bad())?;
                StatusReportMask::from_bits(bits)
                    .map(SettingValue::StatusReport)
                    .ok_or_else(bad)
            }
        }
    }
}

impl fmt::Display for GrblSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: (default value: {})",
            self.description(),
            self.default_value()
        )
    }
}

/// Parse the `$N=V` lines of a `$$` reply.
pub fn parse_settings<S: AsRef<str>>(lines: &[S]) -> StageResult<BTreeMap<GrblSetting, SettingValue>> {
    lines
        .iter()
        .map(|line| {
            let line = line.as_ref();
            let bad = || StageError::protocol("$$", line);
            let (key, value) = line.split_once('=').ok_or_else(bad)?;
            let number = key
                .strip_prefix('$')
                .and_then(|n| n.parse::<u16>().ok())
                .ok_or_else(bad)?;
            let setting = GrblSetting::from_number(number).ok_or_else(bad)?;
            Ok((setting, setting.parse_value(value)?))
        })
        .collect()
}
