//! Low-level wire encoding primitives
//!
//! Implements the varint / tagged-field building blocks of the protocol:
//! each field is prefixed with a tag byte `(field_number << 3) | wire_type`,
//! scalar integers are varint encoded (7 data bits per byte, high bit is
//! the continuation bit), floats are 64-bit fixed little-endian, and
//! strings / sub-messages are length-delimited.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes};

/// Varint-encoded integer
pub const WIRE_VARINT: u8 = 0;
/// 64-bit fixed-width little-endian value
pub const WIRE_FIXED64: u8 = 1;
/// Length-delimited bytes (strings, sub-messages)
pub const WIRE_BYTES: u8 = 2;
/// 32-bit fixed-width little-endian value (skippable, never produced)
pub const WIRE_FIXED32: u8 = 5;

/// Longest possible u64 varint
const MAX_VARINT_LEN: usize = 10;

/// Encodes an unsigned integer as a varint.
pub fn write_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decodes an unsigned integer from a varint.
pub fn read_uvarint(buf: &mut impl Buf) -> Result<u64> {
    let mut result = 0u64;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(Error::MalformedFrame("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        // the tenth byte may only carry the final data bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(Error::MalformedFrame("varint overflows u64".to_string()));
        }
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(Error::MalformedFrame("varint too long".to_string()))
}

/// Number of bytes `value` occupies as a varint.
pub fn uvarint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    usize::max(1, bits.div_ceil(7))
}

/// Writes a field tag.
pub fn write_tag(buf: &mut impl BufMut, field: u32, wire_type: u8) {
    write_uvarint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Reads a field tag, returning `(field_number, wire_type)`.
pub fn read_tag(buf: &mut impl Buf) -> Result<(u32, u8)> {
    let tag = read_uvarint(buf)?;
    let field = (tag >> 3) as u32;
    if field == 0 {
        return Err(Error::MalformedFrame("zero field number".to_string()));
    }
    Ok((field, (tag & 0x07) as u8))
}

/// Number of bytes the tag for `field` occupies.
pub fn tag_len(field: u32) -> usize {
    uvarint_len(u64::from(field) << 3)
}

/// Fails unless the decoded wire type matches the expected one.
pub fn expect_wire(field: u32, got: u8, want: u8) -> Result<()> {
    if got != want {
        return Err(Error::MalformedFrame(format!(
            "wrong wire type {} for field {}",
            got, field
        )));
    }
    Ok(())
}

/// Reads a length-delimited payload, bounded by the remaining buffer.
pub fn read_delimited(buf: &mut impl Buf) -> Result<Bytes> {
    let len = read_uvarint(buf)? as usize;
    if len > buf.remaining() {
        return Err(Error::MalformedFrame(format!(
            "length {} exceeds remaining {} bytes",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Reads a length-delimited UTF-8 string.
pub fn read_string(buf: &mut impl Buf) -> Result<String> {
    let data = read_delimited(buf)?;
    String::from_utf8(data.to_vec())
        .map_err(|_| Error::MalformedFrame("invalid utf-8 in string field".to_string()))
}

/// Writes a length-delimited byte field, tag included.
pub fn write_bytes_field(buf: &mut impl BufMut, field: u32, data: &[u8]) {
    write_tag(buf, field, WIRE_BYTES);
    write_uvarint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Encoded size of a length-delimited field, tag included.
pub fn bytes_field_len(field: u32, len: usize) -> usize {
    tag_len(field) + uvarint_len(len as u64) + len
}

/// Encoded size of a varint field, tag included.
pub fn uvarint_field_len(field: u32, value: u64) -> usize {
    tag_len(field) + uvarint_len(value)
}

/// Skips over an unknown field so decoders stay forward compatible.
pub fn skip_field(buf: &mut impl Buf, wire_type: u8) -> Result<()> {
    match wire_type {
        WIRE_VARINT => {
            read_uvarint(buf)?;
        }
        WIRE_FIXED64 => {
            if buf.remaining() < 8 {
                return Err(Error::MalformedFrame("truncated fixed64".to_string()));
            }
            buf.advance(8);
        }
        WIRE_BYTES => {
            read_delimited(buf)?;
        }
        WIRE_FIXED32 => {
            if buf.remaining() < 4 {
                return Err(Error::MalformedFrame("truncated fixed32".to_string()));
            }
            buf.advance(4);
        }
        other => {
            return Err(Error::MalformedFrame(format!(
                "illegal wire type {}",
                other
            )));
        }
    }
    Ok(())
}
