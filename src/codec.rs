//! Big-endian primitives for the datafile format.
//!
//! Every multi-byte integer in a Lime datafile is big-endian. A string is a
//! `u8` length prefix followed by exactly that many bytes, no terminator.
//! The prefix is a byte count, not a character count, so names are capped at
//! 255 bytes and truncated before encoding.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

/// Longest encodable name or head string, in bytes.
pub const MAX_STR_LEN: usize = 255;

pub fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a length-prefixed string, truncating at [`MAX_STR_LEN`] bytes.
/// The cut backs off to the nearest UTF-8 character boundary so a truncated
/// name never carries a dangling partial sequence.
pub fn put_str(buf: &mut Vec<u8>, value: &str) {
    let mut len = value.len().min(MAX_STR_LEN);
    while !value.is_char_boundary(len) {
        len -= 1;
    }
    buf.push(len as u8);
    buf.extend_from_slice(&value.as_bytes()[..len]);
}

pub fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    reader.read_u8()
}

pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    reader.read_u32::<BigEndian>()
}

pub fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    reader.read_u64::<BigEndian>()
}

/// Read a length-prefixed string written by [`put_str`].
pub fn read_str<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u8()? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
