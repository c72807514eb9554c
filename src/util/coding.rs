//! Encoding utilities for variable-length integers and length-prefixed data.

use bytes::{Buf, BufMut, BytesMut};

/// Maximum bytes needed to encode a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Maximum bytes needed to encode a varint32.
pub const MAX_VARINT32_LEN: usize = 5;

/// Encode a 32-bit unsigned integer as a varint.
///
/// Returns the number of bytes written.
pub fn encode_varint32(buf: &mut BytesMut, value: u32) -> usize {
    encode_varint64(buf, value as u64)
}

/// Encode a 64-bit unsigned integer as a varint.
///
/// Returns the number of bytes written.
pub fn encode_varint64(buf: &mut BytesMut, mut value: u64) -> usize {
    let mut count = 0;
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
        count += 1;
    }
    buf.put_u8(value as u8);
    count + 1
}

/// Encode a signed integer with zig-zag so small negatives stay short.
pub fn encode_varint_signed(buf: &mut BytesMut, value: i64) -> usize {
    encode_varint64(buf, ((value << 1) ^ (value >> 63)) as u64)
}

/// Decode a 32-bit varint from a buffer.
///
/// Returns None if the buffer is too short or the value overflows 32 bits.
pub fn decode_varint32(buf: &mut &[u8]) -> Option<u32> {
    let mut result = 0u32;
    let mut shift = 0;

    for _ in 0..MAX_VARINT32_LEN {
        if buf.is_empty() {
            return None;
        }

        let byte = buf.get_u8();
        let bits = (byte & 0x7F) as u32;
        if shift == 28 && bits > 0x0F {
            return None;
        }
        result |= bits << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }

        shift += 7;
    }

    None
}

/// Decode a 64-bit varint from a buffer.
///
/// Returns None if the buffer is too short or the varint is malformed.
pub fn decode_varint64(buf: &mut &[u8]) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    for _ in 0..MAX_VARINT64_LEN {
        if buf.is_empty() {
            return None;
        }

        let byte = buf.get_u8();
        let bits = (byte & 0x7F) as u64;
        if shift == 63 && bits > 1 {
            return None;
        }
        result |= bits << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }

        shift += 7;
    }

    None
}

/// Decode a zig-zag encoded signed varint.
pub fn decode_varint_signed(buf: &mut &[u8]) -> Option<i64> {
    let raw = decode_varint64(buf)?;
    Some(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

/// Encode a length-prefixed byte slice.
pub fn encode_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    encode_varint64(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Decode a length-prefixed byte slice, borrowing from the input.
pub fn decode_length_prefixed<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = decode_varint64(buf)?;
    let len = usize::try_from(len).ok()?;
    if buf.len() < len {
        return None;
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Some(data)
}
