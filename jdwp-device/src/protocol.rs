// JDWP protocol definitions and packet framing
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html

use crate::commands::JdwpCommandId;
use crate::ddms::ChunkType;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// JDWP uses big-endian (network byte order) for all multi-byte values

pub type JdwpResult<T> = Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("Unsupported command {0}")]
    UnsupportedCommand(JdwpCommandId),

    #[error("Unsupported DDMS chunk {0}")]
    UnsupportedChunk(ChunkType),

    #[error("Failed to write response: {0}")]
    WriteFailure(#[source] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// Whether the connection must be dropped after this error.
    ///
    /// A byte stream cannot be resynchronised after a framing error, while
    /// unknown commands and failed responses leave the stream intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            JdwpError::UnsupportedCommand(_)
                | JdwpError::UnsupportedChunk(_)
                | JdwpError::WriteFailure(_)
        )
    }
}

// JDWP handshake string
pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet structure:
// length (4 bytes) - includes header
// id (4 bytes)
// flags (1 byte) - 0x00 = command, 0x80 = reply
// [Command packet: command set (1 byte) + command (1 byte)]
// [Reply packet: error code (2 bytes)]
// data (variable)

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

/// Maximum packet size in either direction (10MB), header included
pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Command(JdwpCommandId),
    Reply { error_code: i16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdwpPacket {
    pub id: i32,
    pub kind: PacketKind,
    pub payload: Vec<u8>,
}

impl JdwpPacket {
    pub fn command(id: i32, command_set: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            id,
            kind: PacketKind::Command(JdwpCommandId::new(command_set, command)),
            payload,
        }
    }

    pub fn reply(id: i32, payload: Vec<u8>) -> Self {
        Self::error_reply(id, 0, payload)
    }

    pub fn error_reply(id: i32, error_code: i16, payload: Vec<u8>) -> Self {
        Self {
            id,
            kind: PacketKind::Reply { error_code },
            payload,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, PacketKind::Reply { .. })
    }

    /// Command set and command, `None` on replies
    pub fn command_id(&self) -> Option<JdwpCommandId> {
        match self.kind {
            PacketKind::Command(id) => Some(id),
            PacketKind::Reply { .. } => None,
        }
    }

    /// Error code, always zero on command packets
    pub fn error_code(&self) -> i16 {
        match self.kind {
            PacketKind::Command(_) => 0,
            PacketKind::Reply { error_code } => error_code,
        }
    }

    /// Length on the wire, header included
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode header and payload. Fails when the packet exceeds `MAX_PACKET_SIZE`.
    pub fn encode(&self) -> JdwpResult<Vec<u8>> {
        let length = self.wire_len();
        check_size(length)?;

        let mut buf = BytesMut::with_capacity(length);

        buf.put_i32(length as i32);
        buf.put_i32(self.id);
        match self.kind {
            PacketKind::Command(id) => {
                buf.put_u8(0x00);
                buf.put_u8(id.command_set);
                buf.put_u8(id.command);
            }
            PacketKind::Reply { error_code } => {
                buf.put_u8(REPLY_FLAG);
                buf.put_i16(error_code);
            }
        }
        buf.put_slice(&self.payload);

        Ok(buf.to_vec())
    }

    /// Decode exactly one packet occupying the whole buffer
    pub fn decode(buf: &[u8]) -> JdwpResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(JdwpError::MalformedPacket(format!(
                "packet too short: {} bytes",
                buf.len()
            )));
        }

        let header: [u8; HEADER_SIZE] = buf[..HEADER_SIZE]
            .try_into()
            .map_err(|_| JdwpError::MalformedPacket("truncated header".to_string()))?;
        let length = declared_length(&header)?;

        if length != buf.len() {
            return Err(JdwpError::MalformedPacket(format!(
                "declared length {} does not match buffer length {}",
                length,
                buf.len()
            )));
        }

        Ok(from_parts(&header, buf[HEADER_SIZE..].to_vec()))
    }
}

fn declared_length(header: &[u8; HEADER_SIZE]) -> JdwpResult<usize> {
    let length = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);

    if length < HEADER_SIZE as i32 {
        return Err(JdwpError::MalformedPacket(format!(
            "invalid packet length: {}",
            length
        )));
    }

    let length = length as usize;
    check_size(length)?;
    Ok(length)
}

fn check_size(length: usize) -> JdwpResult<()> {
    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::MalformedPacket(format!(
            "packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }
    Ok(())
}

fn from_parts(header: &[u8; HEADER_SIZE], payload: Vec<u8>) -> JdwpPacket {
    let mut buf = &header[4..];
    let id = buf.get_i32();
    let flags = buf.get_u8();

    let kind = if flags & REPLY_FLAG != 0 {
        PacketKind::Reply {
            error_code: buf.get_i16(),
        }
    } else {
        let command_set = buf.get_u8();
        let command = buf.get_u8();
        PacketKind::Command(JdwpCommandId::new(command_set, command))
    };

    JdwpPacket { id, kind, payload }
}

/// Read one framed packet.
///
/// Returns `Ok(None)` when the stream ends cleanly on a packet boundary.
pub async fn read_packet<R>(reader: &mut R) -> JdwpResult<Option<JdwpPacket>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];

    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_SIZE {
        read_fully(reader, &mut header[first..], "header").await?;
    }

    let length = declared_length(&header)?;

    let mut payload = vec![0u8; length - HEADER_SIZE];
    if !payload.is_empty() {
        read_fully(reader, &mut payload, "payload").await?;
    }

    Ok(Some(from_parts(&header, payload)))
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8], what: &str) -> JdwpResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            JdwpError::MalformedPacket(format!("stream closed in packet {}", what)),
        ),
        Err(e) => Err(JdwpError::Io(e)),
    }
}

/// Write one packet and flush. I/O errors surface as `WriteFailure`,
/// oversized packets are refused before anything is written.
pub async fn write_packet<W>(writer: &mut W, packet: &JdwpPacket) -> JdwpResult<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = packet.encode()?;
    writer
        .write_all(&encoded)
        .await
        .map_err(JdwpError::WriteFailure)?;
    writer.flush().await.map_err(JdwpError::WriteFailure)
}
