//! Serialize consensus messages into a bounded binary format.
//!
//! # Overview
//!
//! Every message exchanged by a shard committee (proposals, votes, certificates,
//! crosslinks) is encoded with this crate before it is signed, hashed, or gossiped.
//! Encoding must therefore be canonical: a value has exactly one encoding, and decoding
//! that encoding yields a bit-identical value.
//!
//! Decoding operates on untrusted input. Types that contain collections take a
//! configuration ([Read::Cfg]) that bounds the number of items that may be allocated.
//!
//! # Example
//!
//! ```
//! use bytes::{Buf, BufMut};
//! use shardline_codec::{DecodeExt, Encode, EncodeSize, Error, Read, ReadExt, Write};
//!
//! #[derive(Debug, PartialEq)]
//! struct Checkpoint {
//!     height: u64,
//!     root: [u8; 32],
//! }
//!
//! impl Write for Checkpoint {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.height.write(buf);
//!         self.root.write(buf);
//!     }
//! }
//!
//! impl EncodeSize for Checkpoint {
//!     fn encode_size(&self) -> usize {
//!         self.height.encode_size() + self.root.encode_size()
//!     }
//! }
//!
//! impl Read for Checkpoint {
//!     type Cfg = ();
//!
//!     fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
//!         let height = u64::read(buf)?;
//!         let root = <[u8; 32]>::read(buf)?;
//!         Ok(Self { height, root })
//!     }
//! }
//!
//! let checkpoint = Checkpoint { height: 7, root: [1; 32] };
//! let encoded = checkpoint.encode();
//! assert_eq!(encoded.len(), 40);
//! assert_eq!(Checkpoint::decode(encoded).unwrap(), checkpoint);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod varint;

pub use codec::{Codec, Decode, DecodeExt, Encode, EncodeSize, FixedSize, Read, ReadExt, Write};
pub use config::RangeCfg;
pub use error::Error;
