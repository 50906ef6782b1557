// DDMS chunk sub-protocol
//
// DDMS traffic rides inside JDWP command set 0xc7, command 0x01. The payload
// of such a packet is one chunk:
//   chunk type (4 bytes, ASCII tag packed big-endian)
//   chunk length (4 bytes)
//   chunk data (chunk length bytes)

use crate::commands::JdwpCommandId;
use crate::protocol::{JdwpError, JdwpPacket, JdwpResult, PacketKind};
use crate::reader::read_i32;
use bytes::{Buf, BufMut};
use std::fmt;

/// Packet id used for packets the VM sends on its own (WAIT, ...)
pub const DDMS_EVENT_ID: i32 = 0x4000_0000;

const CHUNK_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub i32);

impl ChunkType {
    pub const FEAT: Self = Self::from_tag(b"FEAT");
    pub const WAIT: Self = Self::from_tag(b"WAIT");
    pub const HELO: Self = Self::from_tag(b"HELO");
    pub const EXIT: Self = Self::from_tag(b"EXIT");

    pub const fn from_tag(tag: &[u8; 4]) -> Self {
        Self(i32::from_be_bytes(*tag))
    }

    pub fn tag(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        if tag.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "{}", String::from_utf8_lossy(&tag))
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

/// Pack a four character tag such as `"FEAT"` into its chunk type
pub fn encode_chunk_type(tag: &str) -> JdwpResult<ChunkType> {
    let bytes: [u8; 4] = tag
        .as_bytes()
        .try_into()
        .ok()
        .filter(|b: &[u8; 4]| b.is_ascii())
        .ok_or_else(|| {
            JdwpError::Protocol(format!("chunk type must be 4 ASCII characters: {:?}", tag))
        })?;
    Ok(ChunkType::from_tag(&bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdmsChunk {
    pub chunk_type: ChunkType,
    pub data: Vec<u8>,
}

pub fn is_ddms_packet(packet: &JdwpPacket) -> bool {
    packet.command_id() == Some(JdwpCommandId::DDMS_CHUNK)
}

/// Decode the chunk carried by a DDMS command or by the reply to one
pub fn decode_chunk(packet: &JdwpPacket) -> JdwpResult<DdmsChunk> {
    let mut buf = packet.payload.as_slice();

    if buf.remaining() < CHUNK_HEADER_SIZE {
        return Err(JdwpError::MalformedPacket(format!(
            "DDMS payload too short: {} bytes",
            buf.remaining()
        )));
    }

    let chunk_type = ChunkType(read_i32(&mut buf)?);
    let length = read_i32(&mut buf)?;

    let length = usize::try_from(length).map_err(|_| {
        JdwpError::MalformedPacket(format!("negative DDMS chunk length: {}", length))
    })?;

    if buf.remaining() < length {
        return Err(JdwpError::MalformedPacket(format!(
            "DDMS chunk {} truncated: expected {} bytes, got {}",
            chunk_type,
            length,
            buf.remaining()
        )));
    }

    Ok(DdmsChunk {
        chunk_type,
        data: buf[..length].to_vec(),
    })
}

/// Wrap a chunk in a JDWP packet.
///
/// Responses reuse the request `id`; anything else is an unsolicited DDMS
/// command and always carries `DDMS_EVENT_ID`.
pub fn encode_chunk(id: i32, chunk_type: ChunkType, data: &[u8], is_response: bool) -> JdwpPacket {
    let mut payload = Vec::with_capacity(CHUNK_HEADER_SIZE + data.len());
    payload.put_i32(chunk_type.0);
    payload.put_i32(data.len() as i32);
    payload.put_slice(data);

    if is_response {
        JdwpPacket {
            id,
            kind: PacketKind::Reply { error_code: 0 },
            payload,
        }
    } else {
        JdwpPacket {
            id: DDMS_EVENT_ID,
            kind: PacketKind::Command(JdwpCommandId::DDMS_CHUNK),
            payload,
        }
    }
}

/// Build a DDMS reply to the request with the given id
pub fn chunk_reply(id: i32, chunk_type: ChunkType, data: &[u8]) -> JdwpPacket {
    encode_chunk(id, chunk_type, data, true)
}

/// Build a DDMS request as a tool sends it
pub fn chunk_command(id: i32, chunk_type: ChunkType, data: &[u8]) -> JdwpPacket {
    JdwpPacket {
        id,
        ..encode_chunk(id, chunk_type, data, false)
    }
}

/// Build an unsolicited DDMS packet
pub fn chunk_event(chunk_type: ChunkType, data: &[u8]) -> JdwpPacket {
    encode_chunk(DDMS_EVENT_ID, chunk_type, data, false)
}
