//! Purpose: Encode and decode record length prefixes as LEB128-style varints.
//! Exports: `MAX_LEN`, `encoded_len`, `encode`, `decode`, `VarintError`.
//! Role: Leaf codec used by the engine to size, write, and parse frame prefixes.
//! Invariants: `encoded_len(v)` equals the byte count `encode` writes for `v`.
//! Invariants: Decoding never reads past `MAX_LEN` bytes or accepts bits beyond 64.
use std::fmt;

pub const MAX_LEN: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VarintError {
    /// Input ended while the continuation bit was still set.
    Truncated,
    /// Continuation ran past `MAX_LEN` bytes or the value overflows u64.
    Overflow,
}

impl fmt::Display for VarintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarintError::Truncated => write!(f, "truncated varint"),
            VarintError::Overflow => write!(f, "varint exceeds 64 bits"),
        }
    }
}

impl std::error::Error for VarintError {}

pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Writes `value` into the front of `buf`, returning the number of bytes used.
/// `buf` must hold at least `encoded_len(value)` bytes.
pub fn encode(value: u64, buf: &mut [u8]) -> usize {
    let mut value = value;
    let mut idx = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[idx] = byte;
            return idx + 1;
        }
        buf[idx] = byte | 0x80;
        idx += 1;
    }
}

pub fn encode_to_array(value: u64) -> ([u8; MAX_LEN], usize) {
    let mut buf = [0u8; MAX_LEN];
    let len = encode(value, &mut buf);
    (buf, len)
}

/// Returns the decoded value and the number of prefix bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    for (idx, &byte) in buf.iter().take(MAX_LEN).enumerate() {
        let bits = u64::from(byte & 0x7f);
        let shift = idx * 7;
        if idx == MAX_LEN - 1 && bits > 1 {
            return Err(VarintError::Overflow);
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok((value, idx + 1));
        }
    }
    if buf.len() >= MAX_LEN {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::Truncated)
    }
}
