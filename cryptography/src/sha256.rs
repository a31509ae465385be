//! SHA-256 implementation of the [Hasher] trait.
//!
//! This implementation uses the `sha2` crate to generate SHA-256 digests.
//!
//! # Example
//! ```rust
//! use shardline_cryptography::{Hasher, Sha256};
//!
//! // Create a new SHA-256 hasher
//! let mut hasher = Sha256::new();
//!
//! // Update the hasher with some messages
//! hasher.update(b"hello,");
//! hasher.update(b"world!");
//!
//! // Finalize the hasher to get the digest
//! let digest = hasher.finalize();
//! println!("digest: {digest}");
//! ```

use crate::{Error, Hasher};
use bytes::{Buf, BufMut};
use shardline_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use shardline_utils::hex;
use sha2::{Digest as _, Sha256 as ISha256};
use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

const DIGEST_LENGTH: usize = 32;

/// Domain prefix for merkle leaves.
const LEAF_PREFIX: u8 = 0x00;

/// Domain prefix for merkle interior nodes.
const NODE_PREFIX: u8 = 0x01;

/// Generate a SHA-256 digest from a message.
pub fn hash(message: &[u8]) -> Digest {
    let array: [u8; DIGEST_LENGTH] = ISha256::digest(message).into();
    Digest::from(array)
}

/// Compute the root of a binary merkle tree over `leaves`.
///
/// Leaves and interior nodes are hashed under distinct one-byte prefixes so that a leaf can
/// never be reinterpreted as a node. When a level has an odd number of entries, the last entry
/// is promoted to the next level unchanged (pairing it with itself would give `[a, b, c]` and
/// `[a, b, c, c]` the same root). The root of an empty tree is [Digest::ZERO].
pub fn merkle_root<L: AsRef<[u8]>>(leaves: &[L]) -> Digest {
    if leaves.is_empty() {
        return Digest::ZERO;
    }

    let mut hasher = Sha256::new();
    let mut level: Vec<Digest> = leaves
        .iter()
        .map(|leaf| {
            hasher.update(&[LEAF_PREFIX]);
            hasher.update(leaf.as_ref());
            hasher.finalize()
        })
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    hasher.update(&[NODE_PREFIX]);
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize()
                }
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

/// SHA-256 hasher.
#[derive(Debug)]
pub struct Sha256 {
    hasher: ISha256,
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Sha256 {
    fn clone(&self) -> Self {
        // We manually implement `Clone` to avoid cloning the hasher state.
        Self::default()
    }
}

impl Hasher for Sha256 {
    type Digest = Digest;

    fn new() -> Self {
        Self {
            hasher: ISha256::new(),
        }
    }

    fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    fn finalize(&mut self) -> Self::Digest {
        let finalized = self.hasher.finalize_reset();
        let array: [u8; DIGEST_LENGTH] = finalized.into();
        Self::Digest::from(array)
    }
}

/// Digest of a SHA-256 hashing operation.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// The all-zero digest (used as the root of nothing).
    pub const ZERO: Self = Self([0; DIGEST_LENGTH]);
}

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Digest {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; DIGEST_LENGTH]>::read(buf)?))
    }
}

impl FixedSize for Digest {
    const SIZE: usize = DIGEST_LENGTH;
}

impl EncodeSize for Digest {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = Error;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; DIGEST_LENGTH] =
            value.try_into().map_err(|_| Error::InvalidDigestLength)?;
        Ok(Self(array))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Digest {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_codec::{DecodeExt, Encode};

    const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256() {
        let msg = b"hello world";

        let mut hasher = Sha256::new();
        hasher.update(msg);
        let digest = hasher.finalize();
        assert_eq!(hex(digest.as_ref()), HELLO_DIGEST);
        assert_eq!(hash(msg), digest);

        // Finalize resets the hasher
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), digest);
    }

    #[test]
    fn test_codec() {
        let digest = hash(b"hello world");
        let encoded = digest.encode();
        assert_eq!(encoded.len(), DIGEST_LENGTH);
        assert_eq!(Digest::decode(encoded).unwrap(), digest);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(
            Digest::try_from(&[0u8; 31][..]),
            Err(Error::InvalidDigestLength)
        );
        assert_eq!(Digest::try_from(&[0u8; 32][..]).unwrap(), Digest::ZERO);
    }

    #[test]
    fn test_merkle_root() {
        // Empty
        assert_eq!(merkle_root::<&[u8]>(&[]), Digest::ZERO);

        // Single leaf is the prefixed leaf hash
        let single = merkle_root(&[b"a"]);
        assert_eq!(single, hash(&[&[LEAF_PREFIX][..], b"a"].concat()));

        // Order matters
        let ab = merkle_root(&[b"a", b"b"]);
        let ba = merkle_root(&[b"b", b"a"]);
        assert_ne!(ab, ba);

        // Odd levels promote the last entry
        let abc = merkle_root(&[b"a", b"b", b"c"]);
        let c = hash(&[&[LEAF_PREFIX][..], b"c"].concat());
        let expected = hash(&[&[NODE_PREFIX][..], &ab[..], &c[..]].concat());
        assert_eq!(abc, expected);

        // Repeating the last leaf changes the root
        let abcc = merkle_root(&[b"a", b"b", b"c", b"c"]);
        assert_ne!(abc, abcc);
        let abccc = merkle_root(&[b"a", b"b", b"c", b"c", b"c"]);
        assert_ne!(abcc, abccc);

        // A leaf cannot collide with an interior node
        let mut node = vec![];
        node.extend_from_slice(&hash(&[&[LEAF_PREFIX][..], b"a"].concat()));
        node.extend_from_slice(&hash(&[&[LEAF_PREFIX][..], b"b"].concat()));
        assert_ne!(merkle_root(&[node]), ab);
    }
}
