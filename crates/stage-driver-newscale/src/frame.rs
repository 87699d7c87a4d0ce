//! M3-FS serial framing.
//!
//! Requests and replies share the same shape: `<NN data>\r`, where `NN` is
//! the two digit command ID and `data` an optional space separated payload.
//! A reply echoes the ID of the command it answers.

use stage_core::error::{StageError, StageResult};
use stage_core::serial::read_byte;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Command IDs used by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M3fsCommand {
    /// Firmware version string.
    ReadFirmwareVersion,
    /// Absolute move, target in counts as 8 hex digits.
    MoveToTarget,
    /// Motor status, position and position error.
    ViewClosedLoopStatus,
}

impl M3fsCommand {
    /// Two digit command ID.
    pub fn id(&self) -> u8 {
        match self {
            M3fsCommand::ReadFirmwareVersion => 1,
            M3fsCommand::MoveToTarget => 8,
            M3fsCommand::ViewClosedLoopStatus => 10,
        }
    }
}

/// Encode a request frame.
pub fn encode(command: M3fsCommand, data: Option<&str>) -> StageResult<Vec<u8>> {
    let mut frame = format!("<{:02}", command.id());
    if let Some(data) = data {
        if data.contains(|c: char| matches!(c, '<' | '>' | '\r')) {
            return Err(StageError::InvalidArgument(format!(
                "M3-FS payload must not contain framing characters: {data:?}"
            )));
        }
        frame.push(' ');
        frame.push_str(data);
    }
    frame.push_str(">\r");
    Ok(frame.into_bytes())
}

/// Read one reply frame and return the content between `<` and `>`.
///
/// The frame is checked byte by byte: a leading `<`, no bare CR before `>`,
/// and a mandatory CR after it.
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    timeout: Duration,
    operation: &str,
) -> StageResult<String> {
    let first = read_byte(port, timeout, operation).await?;
    if first != b'<' {
        return Err(StageError::protocol(
            operation,
            String::from_utf8_lossy(&[first]).into_owned(),
        ));
    }

    let mut payload = Vec::new();
    let violation = |payload: &[u8], extra: &str| {
        StageError::protocol(
            operation,
            format!("<{}{}", String::from_utf8_lossy(payload), extra),
        )
    };
    loop {
        let b = match read_byte(port, timeout, operation).await {
            Ok(b) => b,
            Err(StageError::Timeout { .. }) => return Err(violation(&payload, "")),
            Err(e) => return Err(e),
        };
        match b {
            b'>' => break,
            b'\r' => return Err(violation(&payload, "\r")),
            _ => payload.push(b),
        }
    }

    match read_byte(port, timeout, operation).await {
        Ok(b'\r') => {}
        Ok(b) => {
            let extra = format!(">{}", char::from(b));
            return Err(violation(&payload, &extra));
        }
        Err(StageError::Timeout { .. }) => return Err(violation(&payload, ">")),
        Err(e) => return Err(e),
    }

    let payload = String::from_utf8_lossy(&payload).into_owned();
    tracing::trace!(%payload, "rx");
    Ok(payload)
}

/// Check the echoed command ID and return the data part, if any.
pub fn split_reply(command: M3fsCommand, payload: &str) -> StageResult<Option<&str>> {
    let mismatch = || {
        StageError::protocol(
            format!("<{:02}>", command.id()),
            format!("<{payload}>"),
        )
    };
    let id = payload
        .get(..2)
        .and_then(|id| id.parse::<u8>().ok())
        .ok_or_else(mismatch)?;
    if id != command.id() {
        return Err(mismatch());
    }
    match payload.get(2..) {
        None | Some("") => Ok(None),
        Some(rest) => rest.strip_prefix(' ').map(Some).ok_or_else(mismatch),
    }
}

/// Decode a big-endian hex field. `signed` sign-extends from the field width.
fn hex_field(field: &str, signed: bool) -> Option<i64> {
    if field.is_empty() || field.len() % 2 != 0 || field.len() > 16 {
        return None;
    }
    if !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let raw = u64::from_str_radix(field, 16).ok()?;
    let bits = field.len() * 4;
    if !signed || bits == 64 {
        return Some(raw as i64);
    }
    let shift = 64 - bits;
    Some(((raw << shift) as i64) >> shift)
}

/// Reply to [`M3fsCommand::ViewClosedLoopStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedLoopStatus {
    /// Motor status word.
    pub motor_status: u32,
    /// Position in encoder counts.
    pub position: i64,
    /// Position error in encoder counts.
    pub error: i64,
}

impl ClosedLoopStatus {
    /// Motor status bit set while the motor runs.
    pub const MOVING: u32 = 1 << 2;

    /// Parse the three hex fields of the reply data.
    pub fn parse(data: &str) -> StageResult<Self> {
        let bad = || StageError::protocol("<10>", format!("<10 {data}>"));
        let fields: Vec<&str> = data.split(' ').collect();
        let [status, position, error] = fields.as_slice() else {
            return Err(bad());
        };
        let motor_status = hex_field(status, false)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(bad)?;
        Ok(Self {
            motor_status,
            position: hex_field(position, true).ok_or_else(bad)?,
            error: hex_field(error, true).ok_or_else(bad)?,
        })
    }

    /// Whether the motor is running.
    pub fn is_moving(&self) -> bool {
        self.motor_status & Self::MOVING != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_encode() {
        assert_eq!(
            encode(M3fsCommand::ReadFirmwareVersion, None).unwrap(),
            b"<01>\r"
        );
        assert_eq!(
            encode(M3fsCommand::MoveToTarget, Some("000000c8")).unwrap(),
            b"<08 000000c8>\r"
        );
        assert!(encode(M3fsCommand::MoveToTarget, Some("1>2")).is_err());
    }

    #[test]
    fn test_split_reply() {
        assert_eq!(
            split_reply(M3fsCommand::MoveToTarget, "08").unwrap(),
            None
        );
        assert_eq!(
            split_reply(M3fsCommand::ReadFirmwareVersion, "01 1 VER 4.7.3 M3-FS").unwrap(),
            Some("1 VER 4.7.3 M3-FS")
        );
        let err = split_reply(M3fsCommand::ViewClosedLoopStatus, "08").unwrap_err();
        match err {
            StageError::Protocol { query, response } => {
                assert_eq!(query, "<10>");
                assert_eq!(response, "<08>");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(split_reply(M3fsCommand::MoveToTarget, "08x").is_err());
        assert!(split_reply(M3fsCommand::MoveToTarget, "8").is_err());
    }

    #[test]
    fn test_closed_loop_status() {
        let status = ClosedLoopStatus::parse("000004 ffffff9c 00000002").unwrap();
        assert!(status.is_moving());
        assert_eq!(status.position, -100);
        assert_eq!(status.error, 2);

        let idle = ClosedLoopStatus::parse("000000 00000064 ffff").unwrap();
        assert!(!idle.is_moving());
        assert_eq!(idle.position, 100);
        assert_eq!(idle.error, -1);

        assert!(ClosedLoopStatus::parse("000000 00000064").is_err());
        assert!(ClosedLoopStatus::parse("000000 0000064 0000").is_err());
        assert!(ClosedLoopStatus::parse("zz 00 00").is_err());
    }

    async fn read_from(bytes: &[u8]) -> StageResult<String> {
        let (mut device, mut host) = tokio::io::duplex(64);
        device.write_all(bytes).await.unwrap();
        read_frame(&mut host, Duration::from_millis(50), "test").await
    }

    #[tokio::test]
    async fn test_read_frame() {
        assert_eq!(read_from(b"<08>\r").await.unwrap(), "08");
        assert_eq!(
            read_from(b"<10 000000 00000000 00000000>\r").await.unwrap(),
            "10 000000 00000000 00000000"
        );
    }

    #[tokio::test]
    async fn test_read_frame_violations() {
        // Missing leading chevron.
        assert!(matches!(
            read_from(b"08>\r").await,
            Err(StageError::Protocol { .. })
        ));
        // Bare CR inside the payload.
        assert!(matches!(
            read_from(b"<08\r>\r").await,
            Err(StageError::Protocol { .. })
        ));
        // Wrong terminator.
        assert!(matches!(
            read_from(b"<08>\n").await,
            Err(StageError::Protocol { .. })
        ));
        // Terminator never arrives.
        assert!(matches!(
            read_from(b"<08>").await,
            Err(StageError::Protocol { .. })
        ));
        // Nothing at all.
        assert!(matches!(
            read_from(b"").await,
            Err(StageError::Timeout { .. })
        ));
    }
}
