//! BLS12-381 signatures with same-message aggregation.
//!
//! Public keys live in G1 (48 bytes compressed) and signatures in G2 (96 bytes compressed),
//! matching the "minimal public key size" variant. Messages are hashed to the curve under the
//! proof-of-possession ciphersuite DST. Aggregation assumes every public key has been registered
//! with a proof of possession (see [PrivateKey::proof_of_possession]), which rules out rogue-key
//! attacks when verifying many signatures over one message.
//!
//! # Example
//! ```rust
//! use shardline_cryptography::bls12381::{aggregate_signatures, aggregate_verify, PrivateKey};
//!
//! let namespace = b"demo";
//! let msg = b"hello, world!";
//!
//! let signers: Vec<_> = (0..4).map(PrivateKey::from_seed).collect();
//! let signatures: Vec<_> = signers.iter().map(|s| s.sign(namespace, msg)).collect();
//! let aggregate = aggregate_signatures(&signatures).unwrap();
//!
//! let public_keys: Vec<_> = signers.iter().map(|s| s.public_key()).collect();
//! assert!(aggregate_verify(namespace, msg, &public_keys, &aggregate));
//! ```

use crate::Error;
use blst::{
    min_pk::{
        AggregateSignature, PublicKey as BlstPublicKey, SecretKey, Signature as BlstSignature,
    },
    BLST_ERROR,
};
use bytes::{Buf, BufMut};
use rand::{CryptoRng, Rng, SeedableRng};
use shardline_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use shardline_utils::{hex, union_unique};
use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
};
use zeroize::Zeroizing;

/// Domain separation tag for signatures over messages.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Domain separation tag for proofs of possession.
const POP_DST: &[u8] = b"BLS_POP_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Length of a serialized private key.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Length of a compressed public key.
pub const PUBLIC_KEY_LENGTH: usize = 48;

/// Length of a compressed signature.
pub const SIGNATURE_LENGTH: usize = 96;

/// A BLS12-381 private key.
#[derive(Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

impl PrivateKey {
    /// Create a fresh [PrivateKey] using the supplied RNG.
    pub fn from_rng<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut ikm = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
        rng.fill_bytes(&mut ikm[..]);
        let key = SecretKey::key_gen(&ikm[..], &[]).expect("ikm has sufficient length");
        Self { key }
    }

    /// Create a [PrivateKey] from a seed.
    ///
    /// # Warning
    ///
    /// This function is insecure and should only be used for examples
    /// and testing.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Restore a [PrivateKey] from its serialized scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let key = SecretKey::from_bytes(bytes).map_err(|_| Error::InvalidPrivateKey)?;
        Ok(Self { key })
    }

    /// Serialize the private key.
    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LENGTH]> {
        Zeroizing::new(self.key.to_bytes())
    }

    /// Returns the [PublicKey] corresponding to this key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.key.sk_to_pk())
    }

    /// Sign `msg` under `namespace`.
    ///
    /// The namespace is prepended (length-delimited) so that a signature produced for one
    /// message type can never be replayed as another.
    pub fn sign(&self, namespace: &[u8], msg: &[u8]) -> Signature {
        let payload = union_unique(namespace, msg);
        Signature::from(self.key.sign(&payload, DST, &[]))
    }

    /// Sign the public key under the proof-of-possession DST.
    pub fn proof_of_possession(&self) -> Signature {
        let public = self.key.sk_to_pk().to_bytes();
        Signature::from(self.key.sign(&public, POP_DST, &[]))
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// A BLS12-381 public key (G1).
#[derive(Clone)]
pub struct PublicKey {
    raw: [u8; PUBLIC_KEY_LENGTH],
    key: BlstPublicKey,
}

impl PublicKey {
    /// Verify a signature over `msg` produced under `namespace`.
    pub fn verify(&self, namespace: &[u8], msg: &[u8], signature: &Signature) -> bool {
        let payload = union_unique(namespace, msg);
        signature.key.verify(false, &payload, DST, &[], &self.key, false) == BLST_ERROR::BLST_SUCCESS
    }

    /// Verify a proof of possession for this key.
    pub fn verify_proof_of_possession(&self, proof: &Signature) -> bool {
        proof.key.verify(false, &self.raw, POP_DST, &[], &self.key, false)
            == BLST_ERROR::BLST_SUCCESS
    }
}

impl From<BlstPublicKey> for PublicKey {
    fn from(key: BlstPublicKey) -> Self {
        Self {
            raw: key.to_bytes(),
            key,
        }
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; PUBLIC_KEY_LENGTH] =
            value.try_into().map_err(|_| Error::InvalidPublicKey)?;

        // Rejects the identity and points outside of the prime-order subgroup
        let key = BlstPublicKey::key_validate(&raw).map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self { raw, key })
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for PublicKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; PUBLIC_KEY_LENGTH]>::read(buf)?;
        Self::try_from(&raw[..]).map_err(|_| CodecError::Invalid("PublicKey", "invalid point"))
    }
}

impl FixedSize for PublicKey {
    const SIZE: usize = PUBLIC_KEY_LENGTH;
}

impl EncodeSize for PublicKey {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A BLS12-381 signature (G2), either from a single signer or an aggregate.
#[derive(Clone)]
pub struct Signature {
    raw: [u8; SIGNATURE_LENGTH],
    key: BlstSignature,
}

impl From<BlstSignature> for Signature {
    fn from(key: BlstSignature) -> Self {
        Self {
            raw: key.to_bytes(),
            key,
        }
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; SIGNATURE_LENGTH] =
            value.try_into().map_err(|_| Error::InvalidSignature)?;
        let key = BlstSignature::sig_validate(&raw, true).map_err(|_| Error::InvalidSignature)?;
        Ok(Self { raw, key })
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; SIGNATURE_LENGTH]>::read(buf)?;
        Self::try_from(&raw[..]).map_err(|_| CodecError::Invalid("Signature", "invalid point"))
    }
}

impl FixedSize for Signature {
    const SIZE: usize = SIGNATURE_LENGTH;
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// Aggregate signatures over the same message into a single [Signature].
pub fn aggregate_signatures<'a, I>(signatures: I) -> Result<Signature, Error>
where
    I: IntoIterator<Item = &'a Signature>,
{
    let signatures: Vec<&BlstSignature> = signatures.into_iter().map(|s| &s.key).collect();
    if signatures.is_empty() {
        return Err(Error::EmptyAggregate);
    }
    let aggregate =
        AggregateSignature::aggregate(&signatures, false).map_err(|_| Error::InvalidSignature)?;
    Ok(Signature::from(aggregate.to_signature()))
}

/// Verify an aggregate signature over `msg` (under `namespace`) from all `public_keys`.
///
/// Returns `false` if `public_keys` is empty.
pub fn aggregate_verify<'a, I>(
    namespace: &[u8],
    msg: &[u8],
    public_keys: I,
    signature: &Signature,
) -> bool
where
    I: IntoIterator<Item = &'a PublicKey>,
{
    let public_keys: Vec<&BlstPublicKey> = public_keys.into_iter().map(|p| &p.key).collect();
    if public_keys.is_empty() {
        return false;
    }
    let payload = union_unique(namespace, msg);
    signature
        .key
        .fast_aggregate_verify(false, &payload, DST, &public_keys)
        == BLST_ERROR::BLST_SUCCESS
}
