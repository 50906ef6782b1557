// ADB service requests
//
// Smart-socket framing used between host tools and adb:
//   request:  4 ASCII hex digits (length) + service name
//   response: "OKAY", or "FAIL" + 4 hex digits (length) + message
//
// Only the services needed to reach a device's JDWP processes are known.

use crate::protocol::{JdwpError, JdwpResult};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const OKAY: &[u8] = b"OKAY";
pub const FAIL: &[u8] = b"FAIL";

/// Longest request adb accepts
const MAX_REQUEST_LEN: usize = 1024;

/// Longest message 4 hex digits can frame
pub const MAX_MESSAGE_LEN: usize = 0xffff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdbService {
    /// host:transport:<serial>
    Transport(String),
    /// host:transport-any
    TransportAny,
    /// jdwp:<pid>
    Jdwp(i32),
    /// track-jdwp
    TrackJdwp,
}

impl FromStr for AdbService {
    type Err = JdwpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "host:transport-any" {
            return Ok(AdbService::TransportAny);
        }
        if s == "track-jdwp" {
            return Ok(AdbService::TrackJdwp);
        }
        if let Some(serial) = s.strip_prefix("host:transport:") {
            return Ok(AdbService::Transport(serial.to_string()));
        }
        if let Some(pid) = s.strip_prefix("jdwp:") {
            return pid
                .parse()
                .map(AdbService::Jdwp)
                .map_err(|_| JdwpError::Protocol(format!("invalid pid in {:?}", s)));
        }
        Err(JdwpError::Protocol(format!("unknown service {:?}", s)))
    }
}

fn parse_hex_len(digits: &[u8]) -> JdwpResult<usize> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| JdwpError::Protocol(format!("invalid length prefix {:?}", digits)))
}

/// Read one length-prefixed request. `Ok(None)` when the peer closed first.
pub async fn read_request<R>(reader: &mut R) -> JdwpResult<Option<String>>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader, MAX_REQUEST_LEN).await
}

// Only a close before the first prefix byte is clean
async fn read_frame<R>(reader: &mut R, max_len: usize) -> JdwpResult<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    match reader.read_exact(&mut prefix[1..]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(JdwpError::Protocol(
                "stream closed in length prefix".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let len = parse_hex_len(&prefix)?;
    if len > max_len {
        return Err(JdwpError::Protocol(format!(
            "message too long: {} bytes (max: {})",
            len, max_len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in message: {}", e)))
}

/// Frame a message with its 4 hex digit length
pub fn length_prefixed(message: &str) -> JdwpResult<Vec<u8>> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(JdwpError::Protocol(format!(
            "message too long to frame: {} bytes",
            message.len()
        )));
    }

    let mut out = format!("{:04x}", message.len()).into_bytes();
    out.extend_from_slice(message.as_bytes());
    Ok(out)
}

pub async fn write_okay<W>(writer: &mut W) -> JdwpResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(OKAY).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_fail<W>(writer: &mut W, message: &str) -> JdwpResult<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = length_prefixed(message)?;
    writer.write_all(FAIL).await?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one message, prefixed with its length
pub async fn write_message<W>(writer: &mut W, message: &str) -> JdwpResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&length_prefixed(message)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Body of a track-jdwp update: one pid per line
pub fn format_pid_list(pids: &[i32]) -> String {
    pids.iter().map(|pid| format!("{}\n", pid)).collect()
}

/// Read the status of a request. `Err` carries the FAIL message.
pub async fn read_status<R>(reader: &mut R) -> JdwpResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut status = [0u8; 4];
    reader.read_exact(&mut status).await?;

    match &status[..] {
        s if s == OKAY => Ok(()),
        s if s == FAIL => {
            let message = read_message(reader).await?;
            Err(JdwpError::Protocol(message))
        }
        other => Err(JdwpError::Protocol(format!("unexpected status {:?}", other))),
    }
}

/// Read one length-prefixed message
pub async fn read_message<R>(reader: &mut R) -> JdwpResult<String>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader, MAX_MESSAGE_LEN)
        .await?
        .ok_or(JdwpError::ConnectionClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_services() {
        assert_eq!(
            "host:transport:emulator-5554".parse::<AdbService>().unwrap(),
            AdbService::Transport("emulator-5554".to_string())
        );
        assert_eq!(
            "host:transport-any".parse::<AdbService>().unwrap(),
            AdbService::TransportAny
        );
        assert_eq!("jdwp:1234".parse::<AdbService>().unwrap(), AdbService::Jdwp(1234));
        assert_eq!("track-jdwp".parse::<AdbService>().unwrap(), AdbService::TrackJdwp);
    }

    #[test]
    fn rejects_unknown_services() {
        assert!("shell:ls".parse::<AdbService>().is_err());
        assert!("jdwp:abc".parse::<AdbService>().is_err());
    }

    #[test]
    fn formats_pid_lists() {
        assert_eq!(format_pid_list(&[]), "");
        assert_eq!(format_pid_list(&[10, 42]), "10\n42\n");
        assert_eq!(length_prefixed("10\n").unwrap(), b"000310\n".to_vec());
    }

    #[test]
    fn oversized_messages_are_not_framed() {
        let longest = "x".repeat(MAX_MESSAGE_LEN);
        assert_eq!(length_prefixed(&longest).unwrap().len(), 4 + MAX_MESSAGE_LEN);
        assert!(length_prefixed(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn request_round_trip() {
        let wire = length_prefixed("jdwp:10").unwrap();
        let mut reader = wire.as_slice();
        assert_eq!(read_request(&mut reader).await.unwrap().as_deref(), Some("jdwp:10"));
        assert_eq!(read_request(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_status_carries_message() {
        let mut wire = Vec::new();
        write_fail(&mut wire, "no such pid").await.unwrap();

        match read_status(&mut wire.as_slice()).await {
            Err(JdwpError::Protocol(message)) => assert_eq!(message, "no such pid"),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_inside_length_prefix_is_an_error() {
        let mut reader: &[u8] = b"00";
        assert!(matches!(
            read_request(&mut reader).await,
            Err(JdwpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn long_pid_lists_fit_in_a_message() {
        let pids: Vec<i32> = (10_000..10_500).collect();
        let list = format_pid_list(&pids);
        assert!(list.len() > MAX_REQUEST_LEN);

        let mut wire = Vec::new();
        write_message(&mut wire, &list).await.unwrap();
        assert_eq!(read_message(&mut wire.as_slice()).await.unwrap(), list);

        // Requests keep the tighter limit
        assert!(read_request(&mut wire.as_slice()).await.is_err());
    }
}
