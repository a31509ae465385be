//! Types for use as [crate::Read::Cfg].

use core::ops::{Range, RangeInclusive, RangeTo, RangeToInclusive};

/// Configuration for limiting the length of a collection.
///
/// Both bounds are inclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RangeCfg {
    min: usize,
    max: usize,
}

impl RangeCfg {
    /// Creates a new `RangeCfg` accepting lengths in `[min, max]`.
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Creates a `RangeCfg` accepting exactly `len` items.
    pub const fn exact(len: usize) -> Self {
        Self { min: len, max: len }
    }

    /// Returns `true` if `len` is within the configured bounds.
    pub const fn contains(&self, len: usize) -> bool {
        len >= self.min && len <= self.max
    }

    /// Returns the upper bound.
    pub const fn max(&self) -> usize {
        self.max
    }
}

impl From<RangeInclusive<usize>> for RangeCfg {
    fn from(r: RangeInclusive<usize>) -> Self {
        Self::new(*r.start(), *r.end())
    }
}

impl From<Range<usize>> for RangeCfg {
    fn from(r: Range<usize>) -> Self {
        Self::new(r.start, r.end.saturating_sub(1))
    }
}

impl From<RangeTo<usize>> for RangeCfg {
    fn from(r: RangeTo<usize>) -> Self {
        Self::new(0, r.end.saturating_sub(1))
    }
}

impl From<RangeToInclusive<usize>> for RangeCfg {
    fn from(r: RangeToInclusive<usize>) -> Self {
        Self::new(0, r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_conversions() {
        let cfg = RangeCfg::from(0..=1024);
        assert!(cfg.contains(1024));
        assert!(!cfg.contains(1025));

        let cfg = RangeCfg::from(1..4);
        assert!(!cfg.contains(0));
        assert!(cfg.contains(3));
        assert!(!cfg.contains(4));

        let cfg = RangeCfg::from(..=8);
        assert!(cfg.contains(0));
        assert!(cfg.contains(8));

        assert!(RangeCfg::exact(3).contains(3));
        assert!(!RangeCfg::exact(3).contains(2));
    }
}
