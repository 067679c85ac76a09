// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Return a mask with the low `width` bits set.
///
/// A `width` of 32 or more yields `u32::MAX`.
pub const fn low_bits(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

/// A `(value, mask)` pair over a 32-bit word.
///
/// The same pair is used to test a word (only the masked bits must
/// agree) and to write it (only the masked bits change).
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct Masked32 {
    pub value: u32,
    pub mask: u32,
}

impl Masked32 {
    /// Match or write every bit of the word.
    pub const fn exact(value: u32) -> Self {
        Self { value, mask: u32::MAX }
    }

    pub const fn new(value: u32, mask: u32) -> Self {
        Self { value, mask }
    }

    /// Merge this pair into `word`: the masked bits take their value
    /// from `self.value`, all other bits keep their current value.
    pub const fn apply(&self, word: u32) -> u32 {
        (word & !self.mask) | (self.value & self.mask)
    }

    /// Does `word` agree with `self.value` on every masked bit?
    pub const fn matches(&self, word: u32) -> bool {
        word & self.mask == self.value & self.mask
    }
}

impl From<(u32, u32)> for Masked32 {
    fn from((value, mask): (u32, u32)) -> Self {
        Self { value, mask }
    }
}

impl From<Masked32> for (u32, u32) {
    fn from(m: Masked32) -> Self {
        (m.value, m.mask)
    }
}

impl Display for Masked32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mask == u32::MAX {
            write!(f, "0x{:x}", self.value)
        } else {
            write!(f, "0x{:x}/0x{:x}", self.value, self.mask)
        }
    }
}

/// A `(value, mask)` pair over the 64-bit pipeline metadata.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct Masked64 {
    pub value: u64,
    pub mask: u64,
}

impl Masked64 {
    pub const fn exact(value: u64) -> Self {
        Self { value, mask: u64::MAX }
    }

    pub const fn new(value: u64, mask: u64) -> Self {
        Self { value, mask }
    }

    pub const fn apply(&self, word: u64) -> u64 {
        (word & !self.mask) | (self.value & self.mask)
    }

    pub const fn matches(&self, word: u64) -> bool {
        word & self.mask == self.value & self.mask
    }
}

impl Display for Masked64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mask == u64::MAX {
            write!(f, "0x{:x}", self.value)
        } else {
            write!(f, "0x{:x}/0x{:x}", self.value, self.mask)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn apply_touches_only_masked_bits() {
        let m = Masked32::new(0x0000_00A0, 0x0000_00F0);
        assert_eq!(m.apply(0xFFFF_FFFF), 0xFFFF_FFAF);
        assert_eq!(m.apply(0), 0xA0);
        assert!(m.matches(m.apply(0x1234_5678)));
        assert!(!m.matches(0x0000_00B0));
    }

    #[test]
    fn zero_mask_is_noop_and_wildcard() {
        let m = Masked32::new(0xDEAD_BEEF, 0);
        assert_eq!(m.apply(42), 42);
        assert!(m.matches(0));
        assert!(m.matches(u32::MAX));
    }

    #[test]
    fn low_bits_edges() {
        assert_eq!(low_bits(0), 0);
        assert_eq!(low_bits(1), 1);
        assert_eq!(low_bits(8), 0xFF);
        assert_eq!(low_bits(31), 0x7FFF_FFFF);
        assert_eq!(low_bits(32), u32::MAX);
    }

    #[test]
    fn metadata_masks() {
        let m = Masked64::exact(64954);
        assert!(m.matches(64954));
        assert!(!m.matches(64955));
        assert_eq!(Masked64::new(0xFF00, 0xFF00).apply(0x1234), 0xFF34);
    }
}
