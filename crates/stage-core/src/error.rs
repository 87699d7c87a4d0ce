//! Error types shared by every stage driver.
//!
//! [`StageError`] is the typed taxonomy returned by all capability methods.
//! It separates three broad failure families:
//!
//! - **Link errors**: `ConnectionFailure`, `Protocol`, `VersionNotSupported`,
//!   `Timeout`, `Io`. Something is wrong with the wire or with the device's
//!   identity.
//! - **Argument errors**: `DimensionMismatch`, `OutOfRange`, `InvalidArgument`.
//!   Raised by validation before any byte is written.
//! - **Device faults**: `Fault(DeviceFault)`. The device answered correctly but
//!   reported an alarm, an error code or fault bits. Driver crates keep their
//!   own typed decodings and convert them into a [`DeviceFault`] at the
//!   boundary.
//!
//! Factories, configuration loading and the CLI use `anyhow` on top of this,
//! adding context with `.context(..)`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Which end of an axis range was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Value below the configured minimum.
    Minimum,
    /// Value above the configured maximum.
    Maximum,
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bound::Minimum => write!(f, "minimum"),
            Bound::Maximum => write!(f, "maximum"),
        }
    }
}

/// A fault reported by the device itself (alarm, error code, fault bit).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{device} fault {code}: {description}")]
pub struct DeviceFault {
    /// Device family that reported the fault (e.g. "GRBL alarm").
    pub device: String,
    /// Raw fault code as reported on the wire.
    pub code: i64,
    /// Human readable description from the lookup table or the device.
    pub description: String,
}

impl DeviceFault {
    /// Build a fault record.
    pub fn new(device: impl Into<String>, code: i64, description: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            code,
            description: description.into(),
        }
    }
}

/// Primary error type for stage operations.
#[derive(Error, Debug)]
pub enum StageError {
    /// Transport could not be opened or the handshake was garbled.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Reply did not match the framing expected for the request.
    #[error("Protocol error: query {query:?} got response {response:?}")]
    Protocol {
        /// Request that was sent (or a description of it).
        query: String,
        /// Raw response that was received.
        response: String,
    },

    /// Device identified itself with an unsupported firmware string.
    #[error("Version not supported: {0}")]
    VersionNotSupported(String),

    /// A vector had the wrong number of components.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Required number of components.
        expected: usize,
        /// Number of components supplied.
        actual: usize,
    },

    /// A target component was outside the configured axis range.
    #[error("Axis {axis} value {value} violates {bound} {limit}")]
    OutOfRange {
        /// Axis index.
        axis: usize,
        /// Offending value.
        value: f64,
        /// Configured limit.
        limit: f64,
        /// Which limit was violated.
        bound: Bound,
    },

    /// Device reported an alarm, error code or fault bits.
    #[error(transparent)]
    Fault(#[from] DeviceFault),

    /// Read or polling loop did not finish in time.
    #[error("Timed out after {elapsed:?} waiting for {operation}")]
    Timeout {
        /// Operation that was waiting.
        operation: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// Wait loop was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Argument rejected by a driver before any I/O (negative speed, etc.).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Focus plane requested with fewer than three registered points.
    #[error("At least three focus points are required, have {0}")]
    NotEnoughFocusPoints(usize),

    /// The first three focus points are collinear.
    #[error("Focus points are collinear, plane is undefined")]
    DegenerateFocusPlane,

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please recompile with the feature flag.")]
    FeatureNotEnabled(String),

    /// Underlying transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Shorthand for a protocol error from displayable parts.
    pub fn protocol(query: impl Into<String>, response: impl Into<String>) -> Self {
        StageError::Protocol {
            query: query.into(),
            response: response.into(),
        }
    }

    /// True for errors that indicate the link itself is broken or confused.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            StageError::ConnectionFailure(_)
                | StageError::Protocol { .. }
                | StageError::Timeout { .. }
                | StageError::Io(_)
        )
    }

    /// The structured device fault, if this error carries one.
    pub fn fault(&self) -> Option<&DeviceFault> {
        match self {
            StageError::Fault(f) => Some(f),
            _ => None,
        }
    }
}
