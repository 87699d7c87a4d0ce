//! Alarm and error codes.
//!
//! `ALARM:N` lines are followed by a message line from the controller; both
//! end up in [`GrblFault::Alarm`]. `error:N` lines answer a rejected command.

use stage_core::error::DeviceFault;
use thiserror::Error;

static ALARMS: &[(i64, &str)] = &[
    (1, "Hard limit triggered, machine position is likely lost"),
    (2, "Motion target exceeds machine travel"),
    (3, "Reset while in motion, position may be lost"),
    (4, "Probe fail, probe not in expected initial state"),
    (5, "Probe fail, probe did not contact the workpiece"),
    (6, "Homing fail, reset during active homing cycle"),
    (7, "Homing fail, safety door opened during homing cycle"),
    (8, "Homing fail, cycle failed to clear limit switch when pulling off"),
    (9, "Homing fail, could not find limit switch within search distance"),
];

static ERRORS: &[(i64, &str)] = &[
    (1, "Expected command letter"),
    (2, "Bad number format"),
    (3, "Invalid '$' system command"),
    (4, "Negative value"),
    (5, "Homing cycle not enabled"),
    (6, "Step pulse time must be greater than 3usec"),
    (7, "EEPROM read failed, defaults restored"),
    (8, "'$' command requires IDLE state"),
    (9, "G-code locked out during alarm or jog state"),
    (10, "Soft limits require homing to be enabled"),
    (11, "Line overflow"),
    (12, "Step rate exceeds maximum"),
    (13, "Safety door detected as opened"),
    (14, "Build info or startup line too long"),
    (15, "Jog target exceeds machine travel"),
    (16, "Invalid jog command"),
    (17, "Laser mode requires PWM output"),
    (20, "Unsupported or invalid g-code command"),
    (21, "More than one command from the same modal group"),
    (22, "Feed rate has not yet been set"),
    (23, "G-code command requires an integer value"),
    (24, "More than one command requiring axis words"),
    (25, "Repeated g-code word"),
    (26, "No axis words found in command block"),
    (27, "Line number value is invalid"),
    (28, "Missing required value word"),
    (29, "Work coordinate systems not supported"),
    (30, "G53 only valid with G0 and G1"),
    (31, "Unneeded axis words in block"),
    (32, "G2/G3 arcs need at least one in-plane axis word"),
    (33, "Motion command target is invalid"),
    (34, "Arc radius value is invalid"),
    (35, "G2/G3 arcs need at least one in-plane offset word"),
    (36, "Unused value words in block"),
    (37, "G43.1 tool length offset not assigned to configured axis"),
    (38, "Tool number greater than max supported value"),
];

/// Code given to an `ALARM:` line whose code does not parse.
pub const UNKNOWN_ALARM_CODE: i64 = -1;

fn lookup(table: &[(i64, &'static str)], code: i64) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, d)| *d)
}

/// Description of an alarm code.
pub fn alarm_description(code: i64) -> Option<&'static str> {
    lookup(ALARMS, code)
}

/// Description of an error code.
pub fn error_description(code: i64) -> Option<&'static str> {
    lookup(ERRORS, code)
}

/// A fault reported by the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrblFault {
    /// `ALARM:N` followed by a message line.
    #[error("alarm {code}: {message}")]
    Alarm {
        /// Alarm code.
        code: i64,
        /// Message line sent after the alarm.
        message: String,
    },
    /// `error:N` reply to a command.
    #[error("error {code}")]
    Error {
        /// Error code.
        code: i64,
    },
}

impl GrblFault {
    /// Parse `error:N`. Returns `None` for any other line.
    pub fn parse_error(line: &str) -> Option<Self> {
        let code = line.strip_prefix("error:")?.trim().parse().ok()?;
        Some(GrblFault::Error { code })
    }

    /// Alarm code from an `ALARM:N` line. Any `ALARM:` line is an alarm; an
    /// unreadable code yields [`UNKNOWN_ALARM_CODE`].
    pub fn parse_alarm_code(line: &str) -> Option<i64> {
        let code = line.strip_prefix("ALARM:")?;
        Some(code.trim().parse().unwrap_or(UNKNOWN_ALARM_CODE))
    }

    /// Alarm built from its `ALARM:` line and the message line that follows.
    /// The raw alarm line is kept in the message when its code is unknown.
    pub fn alarm(line: &str, message: String) -> Option<Self> {
        let code = Self::parse_alarm_code(line)?;
        let message = if code == UNKNOWN_ALARM_CODE {
            format!("{line} {message}")
        } else {
            message
        };
        Some(GrblFault::Alarm { code, message })
    }
}

impl From<GrblFault> for DeviceFault {
    fn from(fault: GrblFault) -> Self {
        match fault {
            GrblFault::Alarm { code, message } => {
                let known = alarm_description(code).unwrap_or("Unknown alarm");
                DeviceFault::new("GRBL alarm", code, format!("{known} {message}"))
            }
            GrblFault::Error { code } => DeviceFault::new(
                "GRBL error",
                code,
                error_description(code).unwrap_or("Unknown error"),
            ),
        }
    }
}
