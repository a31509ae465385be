//! Generate keys, sign and aggregate messages, and deterministically verify signatures.
//!
//! Committee members sign votes and crosslinks with [bls12381] keys so that a quorum of
//! signatures over the same message can be compressed into a single aggregate. Block and
//! payload identifiers are [sha256] digests.

use thiserror::Error;

pub mod bls12381;
pub mod sha256;
pub use sha256::{hash, merkle_root, Digest, Sha256};

/// Errors that can occur when interacting with cryptographic primitives.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid digest length")]
    InvalidDigestLength,
    #[error("no signatures to aggregate")]
    EmptyAggregate,
}

/// Interface that commonly used hashing functions expose.
pub trait Hasher: Default + Clone + Send + Sync + 'static {
    /// Digest produced by the hasher.
    type Digest;

    /// Create a new hasher.
    fn new() -> Self;

    /// Append message to previously recorded data.
    fn update(&mut self, message: &[u8]);

    /// Hash all recorded data and reset the hasher to the initial state.
    fn finalize(&mut self) -> Self::Digest;
}
