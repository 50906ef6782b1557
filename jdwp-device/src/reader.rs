// Helper functions for reading and writing JDWP/DDMS data types

use crate::protocol::{JdwpError, JdwpResult};
use bytes::{Buf, BufMut};

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    let len = read_len(buf)?;

    if buf.remaining() < len {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for string: expected {}, got {}",
            len,
            buf.remaining()
        )));
    }

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

/// Read `char_count` UTF-16BE code units (DDMS strings carry no prefix of their own)
pub fn read_utf16(buf: &mut &[u8], char_count: usize) -> JdwpResult<String> {
    let byte_len = char_count
        .checked_mul(2)
        .ok_or_else(|| JdwpError::Protocol("UTF-16 string too long".to_string()))?;

    if buf.remaining() < byte_len {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for UTF-16 string: expected {}, got {}",
            byte_len,
            buf.remaining()
        )));
    }

    let units: Vec<u16> = (0..char_count).map(|_| buf.get_u16()).collect();
    String::from_utf16(&units)
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-16 in string: {}", e)))
}

/// Read a DDMS string (4-byte char count + UTF-16BE code units)
pub fn read_utf16_string(buf: &mut &[u8]) -> JdwpResult<String> {
    let count = read_len(buf)?;
    read_utf16(buf, count)
}

/// Read a i32
pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    if buf.remaining() < 4 {
        return Err(JdwpError::Protocol("Not enough data for i32".to_string()));
    }
    Ok(buf.get_i32())
}

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    if buf.remaining() < 1 {
        return Err(JdwpError::Protocol("Not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

fn read_len(buf: &mut &[u8]) -> JdwpResult<usize> {
    let len = read_i32(buf)?;
    usize::try_from(len).map_err(|_| JdwpError::Protocol(format!("Negative length: {}", len)))
}

/// Write a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Write UTF-16BE code units without a prefix
pub fn put_utf16(buf: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        buf.put_u16(unit);
    }
}

/// Number of UTF-16 code units, the length DDMS puts in front of strings
pub fn utf16_len(s: &str) -> i32 {
    s.encode_utf16().count() as i32
}

/// Write a DDMS string (4-byte char count + UTF-16BE code units)
pub fn put_utf16_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_i32(utf16_len(s));
    put_utf16(buf, s);
}
