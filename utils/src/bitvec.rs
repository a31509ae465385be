//! Bit-vector implementation
//!
//! The bit-vector is a compact representation of a sequence of bits, using [u8] "blocks" for a
//! more-efficient memory layout than doing a [`Vec<bool>`]. It is used to record which members
//! of a committee contributed to an aggregate signature. If the length of the bit-vector is not a
//! multiple of 8, the last block contains padding bits. An invariant of the implementation is that
//! padding bits are set to 0 (decoding rejects encodings that violate it).

use bytes::{Buf, BufMut};
use shardline_codec::{varint, EncodeSize, Error as CodecError, Read, Write};
use core::fmt::{self, Formatter};

/// Type alias for the underlying block type.
type Block = u8;

/// Number of bits in a [Block].
const BITS_PER_BLOCK: usize = Block::BITS as usize;

/// Represents a vector of bits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitVec {
    /// The underlying storage for the bits.
    storage: Vec<Block>,
    /// The total number of bits
    num_bits: usize,
}

impl BitVec {
    /// Creates a new `BitVec` with `size` bits, all initialized to zero.
    #[inline]
    pub fn zeroes(size: usize) -> Self {
        BitVec {
            storage: vec![0; Self::num_blocks(size)],
            num_bits: size,
        }
    }

    /// Returns the number of bits in the vector.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_bits
    }

    /// Returns true if the vector holds no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Gets the value of the bit at `index`, or `None` if out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.num_bits {
            return None;
        }
        Some(self.storage[index / BITS_PER_BLOCK] & Self::mask(index) != 0)
    }

    /// Sets the bit at `index` to 1.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.num_bits, "index out of bounds");
        self.storage[index / BITS_PER_BLOCK] |= Self::mask(index);
    }

    /// Returns the number of bits set to 1.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.storage.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns an iterator over the indices of bits set to 1, in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_bits).filter(|&i| self.storage[i / BITS_PER_BLOCK] & Self::mask(i) != 0)
    }

    #[inline]
    fn mask(index: usize) -> Block {
        1 << (index % BITS_PER_BLOCK)
    }

    #[inline]
    fn num_blocks(num_bits: usize) -> usize {
        num_bits.div_ceil(BITS_PER_BLOCK)
    }
}

impl fmt::Debug for BitVec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BitVec(")?;
        for i in 0..self.num_bits {
            let bit = self.storage[i / BITS_PER_BLOCK] & Self::mask(i) != 0;
            write!(f, "{}", if bit { '1' } else { '0' })?;
        }
        write!(f, ")")
    }
}

impl Write for BitVec {
    fn write(&self, buf: &mut impl BufMut) {
        varint::write(self.num_bits as u32, buf);
        buf.put_slice(&self.storage);
    }
}

impl EncodeSize for BitVec {
    fn encode_size(&self) -> usize {
        varint::size(self.num_bits as u32) + self.storage.len()
    }
}

impl Read for BitVec {
    /// The maximum number of bits that may be decoded.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_bits: &usize) -> Result<Self, CodecError> {
        let num_bits = varint::read(buf)? as usize;
        if num_bits > *max_bits {
            return Err(CodecError::InvalidLength(num_bits));
        }
        let num_blocks = Self::num_blocks(num_bits);
        if buf.remaining() < num_blocks {
            return Err(CodecError::EndOfBuffer);
        }
        let mut storage = vec![0; num_blocks];
        buf.copy_to_slice(&mut storage);

        // Padding bits in the last block must be zero
        let used = num_bits % BITS_PER_BLOCK;
        if used != 0 {
            let padding: Block = !((1 << used) - 1);
            if storage[num_blocks - 1] & padding != 0 {
                return Err(CodecError::Invalid("BitVec", "non-zero padding"));
            }
        }
        Ok(Self { storage, num_bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shardline_codec::{Decode, Encode};

    #[test]
    fn test_set_and_count() {
        let mut bits = BitVec::zeroes(10);
        assert_eq!(bits.count_ones(), 0);
        bits.set(0);
        bits.set(9);
        bits.set(9);
        assert_eq!(bits.count_ones(), 2);
        assert_eq!(bits.get(9), Some(true));
        assert_eq!(bits.get(5), Some(false));
        assert_eq!(bits.get(10), None);
        assert_eq!(bits.ones().collect::<Vec<_>>(), vec![0, 9]);
        assert_eq!(format!("{bits:?}"), "BitVec(1000000001)");
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_set_out_of_bounds() {
        BitVec::zeroes(4).set(4);
    }

    #[test]
    fn test_codec() {
        let mut bits = BitVec::zeroes(12);
        bits.set(3);
        bits.set(11);
        let encoded = bits.encode();
        assert_eq!(&encoded[..], &[12, 0b0000_1000, 0b0000_1000]);
        assert_eq!(BitVec::decode_cfg(encoded.clone(), &12).unwrap(), bits);
        assert_eq!(
            BitVec::decode_cfg(encoded, &11),
            Err(CodecError::InvalidLength(12))
        );
    }

    #[test]
    fn test_rejects_padding() {
        let encoded = Bytes::from_static(&[4, 0b0001_0000]);
        assert!(matches!(
            BitVec::decode_cfg(encoded, &8),
            Err(CodecError::Invalid(_, _))
        ));
    }
}
