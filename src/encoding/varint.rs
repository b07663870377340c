//! # Variable-Length Integer Encoding
//!
//! Length fields inside cells (key length, payload length) use a 7-bit
//! continuation varint: each byte carries seven value bits, the high bit
//! marks that another byte follows. Values are emitted little-endian in
//! base 128, so single-byte lengths (0..=127) cover the common case and a
//! full u64 takes at most ten bytes.
//!
//! The encoding is self-delimiting, which matters for cell parsing: a cell
//! is decoded left to right without a length prefix of its own, and any
//! truncated varint is reported as corruption rather than read past the
//! cell boundary.

use eyre::Result;

use crate::error::{kind_err, ErrorKind};

pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `encode_varint` will produce for `value`.
pub fn varint_len(value: u64) -> usize {
    let mut v = value;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Appends the encoding of `value` to `buf`, returning the encoded length.
pub fn encode_varint(value: u64, buf: &mut [u8]) -> usize {
    let mut v = value;
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8 & 0x7f) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i + 1
}

/// Decodes a varint from the front of `data`, returning `(value, length)`.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(kind_err(ErrorKind::Corrupt, "truncated or overlong varint"))
}
