//! Consensus types shared across the crate.
//!
//! - [`Epoch`]: A span of heights during which committee membership is stable.
//! - [`Height`]: The position of a block in a shard's chain. Strictly increases on finalization.
//! - [`View`]: An attempt at finalizing a height. Increases on every view change at the same
//!   height and resets to zero when the height advances.
//! - [`Round`]: The pair `(height, view)`, ordered lexicographically.

use bytes::{Buf, BufMut};
use shardline_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use std::fmt::{self, Display, Formatter};

/// A span of heights during which committee membership is stable.
pub type Epoch = u64;

/// Position of a block in a shard's chain.
pub type Height = u64;

/// Attempt number at a given [Height].
pub type View = u64;

/// Identifier of a shard.
pub type ShardId = u16;

/// Identifier of a validator in the global registry.
pub type ValidatorId = u64;

/// Returns the epoch containing `height`.
///
/// # Panics
///
/// Panics if `epoch_length` is zero.
#[inline]
pub fn epoch(height: Height, epoch_length: u64) -> Epoch {
    height / epoch_length
}

/// Returns true if `height` is the first height of its epoch.
#[inline]
pub fn is_epoch_start(height: Height, epoch_length: u64) -> bool {
    height % epoch_length == 0
}

/// A consensus round: the view being attempted at some height.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Round {
    pub height: Height,
    pub view: View,
}

impl Round {
    pub const fn new(height: Height, view: View) -> Self {
        Self { height, view }
    }

    /// Returns the next view at the same height.
    pub const fn next_view(self) -> Self {
        Self {
            height: self.height,
            view: self.view + 1,
        }
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.view)
    }
}

impl Write for Round {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.view.write(buf);
    }
}

impl Read for Round {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let height = Height::read(buf)?;
        let view = View::read(buf)?;
        Ok(Self { height, view })
    }
}

impl FixedSize for Round {
    const SIZE: usize = Height::SIZE + View::SIZE;
}

impl EncodeSize for Round {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}
