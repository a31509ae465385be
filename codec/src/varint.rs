//! Variable-length integer encoding for collection lengths.
//!
//! Values are written as little-endian base-128 groups of 7 bits, with the high bit of
//! each byte signalling that another byte follows. Only the minimal encoding of a value
//! is accepted when reading.

use crate::{codec::at_least, Error};
use bytes::{Buf, BufMut};

/// Continuation bit.
const CONTINUATION: u8 = 0x80;

/// Data bits per byte.
const DATA_BITS: u32 = 7;

/// Maximum number of bytes a `u32` may occupy.
const MAX_BYTES: usize = 5;

/// Writes `value` as a varint.
pub fn write(mut value: u32, buf: &mut impl BufMut) {
    while value >= CONTINUATION as u32 {
        buf.put_u8((value as u8) | CONTINUATION);
        value >>= DATA_BITS;
    }
    buf.put_u8(value as u8);
}

/// Reads a varint, rejecting overlong or overflowing encodings.
pub fn read(buf: &mut impl Buf) -> Result<u32, Error> {
    let mut result: u32 = 0;
    for i in 0..MAX_BYTES {
        at_least(buf, 1)?;
        let byte = buf.get_u8();
        let shift = i as u32 * DATA_BITS;

        // The fifth byte may only carry the top four bits of a u32
        if i == MAX_BYTES - 1 && byte > 0x0F {
            return Err(Error::InvalidVarint);
        }
        result |= ((byte & !CONTINUATION) as u32) << shift;

        if byte & CONTINUATION == 0 {
            // A trailing zero byte means the encoding was not minimal
            if i > 0 && byte == 0 {
                return Err(Error::InvalidVarint);
            }
            return Ok(result);
        }
    }
    Err(Error::InvalidVarint)
}

/// Returns the number of bytes `value` occupies when encoded.
pub fn size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Writes a collection length.
///
/// Panics if `len` does not fit in a `u32`.
pub(crate) fn write_len(len: usize, buf: &mut impl BufMut) {
    let len = u32::try_from(len).expect("length exceeds u32");
    write(len, buf);
}

/// Returns the encoded size of a collection length.
pub(crate) fn len_size(len: usize) -> usize {
    size(len as u32)
}

/// Reads a collection length and checks it against `range`.
pub(crate) fn read_len(buf: &mut impl Buf, range: &crate::RangeCfg) -> Result<usize, Error> {
    let len = read(buf)? as usize;
    if !range.contains(len) {
        return Err(Error::InvalidLength(len));
    }
    Ok(len)
}
