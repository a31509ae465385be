//! Leverage common functionality across shard consensus primitives.

use bytes::BufMut;
use shardline_codec::varint;

pub mod bitvec;
pub use bitvec::BitVec;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Converts a hexadecimal string to bytes.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Compute the minimum number of participants whose agreement is required
/// out of `n`: `floor(2n / 3) + 1`.
///
/// Any two sets of this size drawn from the same `n` overlap in at least
/// `quorum(n) - max_faults(n)` members.
pub fn quorum(n: u32) -> u32 {
    (2 * n as u64 / 3 + 1) as u32
}

/// Compute the number of participants that can be faulty (or silent) while a
/// quorum of `n` can still be formed.
pub fn max_faults(n: u32) -> u32 {
    n.saturating_sub(quorum(n))
}

/// Concatenate a namespace and a message, prepended by a varint encoding of the namespace length.
///
/// This produces a unique byte sequence (i.e. no collisions) for each `(namespace, msg)` pair.
pub fn union_unique(namespace: &[u8], msg: &[u8]) -> Vec<u8> {
    let ld_len = varint::size(namespace.len() as u32);
    let mut result = Vec::with_capacity(ld_len + namespace.len() + msg.len());
    varint::write(namespace.len() as u32, &mut result);
    result.put_slice(namespace);
    result.put_slice(msg);
    result
}

/// Append a suffix to a namespace (i.e. derive a per-message-type namespace).
pub fn union(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut union = Vec::with_capacity(a.len() + b.len());
    union.extend_from_slice(a);
    union.extend_from_slice(b);
    union
}

/// Compute the modulo of bytes interpreted as a big-endian integer.
///
/// This function is used to select a random entry from a weighted range
/// when the bytes are a random seed.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn modulo(bytes: &[u8], n: u64) -> u64 {
    assert!(n > 0, "modulus must be non-zero");
    let n = n as u128;
    let mut result: u128 = 0;
    for &byte in bytes {
        result = ((result << 8) | (byte as u128)) % n;
    }
    result as u64
}
