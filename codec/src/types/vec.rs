//! Codec implementation for [`Vec<T>`].
//!
//! Vectors are encoded as a varint item count followed by each item. The decoder rejects
//! counts outside of the configured [RangeCfg] before allocating.

use crate::{varint, EncodeSize, Error, RangeCfg, Read, Write};
use bytes::{Buf, BufMut};

impl<T: Write> Write for Vec<T> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        varint::write_len(self.len(), buf);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: EncodeSize> EncodeSize for Vec<T> {
    #[inline]
    fn encode_size(&self) -> usize {
        varint::len_size(self.len()) + self.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

impl<T: Read> Read for Vec<T> {
    type Cfg = (RangeCfg, T::Cfg);

    #[inline]
    fn read_cfg(buf: &mut impl Buf, (range, cfg): &Self::Cfg) -> Result<Self, Error> {
        let len = varint::read_len(buf, range)?;
        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::read_cfg(buf, cfg)?);
        }
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decode, Encode};

    #[test]
    fn test_vec_bounds() {
        let items = vec![1u16, 2, 3];
        let encoded = items.encode();
        assert_eq!(&encoded[..], &[3, 0, 1, 0, 2, 0, 3]);

        let cfg = (RangeCfg::from(..=3), ());
        assert_eq!(Vec::<u16>::decode_cfg(encoded.clone(), &cfg).unwrap(), items);

        let tight = (RangeCfg::from(..=2), ());
        assert_eq!(
            Vec::<u16>::decode_cfg(encoded, &tight),
            Err(Error::InvalidLength(3))
        );
    }

    #[test]
    fn test_nested_vec() {
        let nested = vec![vec![1u8], vec![], vec![2, 3]];
        let cfg = (RangeCfg::from(..=4), (RangeCfg::from(..=4), ()));
        let decoded = Vec::<Vec<u8>>::decode_cfg(nested.encode(), &cfg).unwrap();
        assert_eq!(decoded, nested);
    }
}
