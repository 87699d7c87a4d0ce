//! Shared timing defaults for serial drivers and motion polling.
//!
//! Drivers take these as defaults for their config structs; every value can
//! be overridden per stage in the TOML configuration.

use std::time::Duration;

// =============================================================================
// Transport
// =============================================================================

/// Default read timeout for a single request/response turn.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Time spent draining stale bytes before a retry.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest accepted reply line. Guards against a device streaming garbage.
pub const MAX_LINE_BYTES: usize = 4096;

// =============================================================================
// Motion polling
// =============================================================================

/// Interval between `is_moving` polls while waiting for a move to settle.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default upper bound for a move or homing wait.
pub const MOTION_TIMEOUT: Duration = Duration::from_secs(120);
