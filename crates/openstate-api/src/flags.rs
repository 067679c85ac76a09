// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Wildcard flag patterns.
//!
//! A pattern is a string over `{'0', '1', '*'}` describing a field of
//! `width` bits that occupies the low `width` bits of the 32-bit flag
//! register. Patterns are read MSB-first: the first character
//! describes bit `width - 1`, the next bit `width - 2`, and so on. A
//! pattern shorter than the field describes its most significant bits
//! and leaves the remaining low bits as don't-care.
//!
//! The same `(value, mask)` pair is used to match the register and to
//! write it, so a pattern always means the same bits in both places.

use super::Masked32;
use super::OpenStateError;

/// Encode a wildcard pattern into a `(value, mask)` pair.
///
/// # Errors
///
/// * [`OpenStateError::BadFlagWidth`]: `width` is not in `1..=32`.
/// * [`OpenStateError::FlagPatternTooLong`]: the pattern has more
///   characters than `width`.
/// * [`OpenStateError::BadFlagChar`]: a character other than `0`,
///   `1`, or `*`.
pub fn masked_flags(
    pattern: &str,
    width: u32,
) -> Result<Masked32, OpenStateError> {
    if width == 0 || width > 32 {
        return Err(OpenStateError::BadFlagWidth(width));
    }

    let len = pattern.chars().count();
    if len > width as usize {
        return Err(OpenStateError::FlagPatternTooLong { len, width });
    }

    let mut flags = Masked32::default();
    for (i, c) in pattern.chars().enumerate() {
        let bit = 1u32 << (width - 1 - i as u32);
        match c {
            '0' => flags.mask |= bit,
            '1' => {
                flags.mask |= bit;
                flags.value |= bit;
            }
            '*' => {}
            _ => return Err(OpenStateError::BadFlagChar(c)),
        }
    }

    Ok(flags)
}

/// Render the low `width` bits of a `(value, mask)` pair back into a
/// wildcard pattern, MSB-first.
pub fn flags_pattern(flags: Masked32, width: u32) -> String {
    let width = width.clamp(1, 32);
    (0..width)
        .rev()
        .map(|b| {
            let bit = 1u32 << b;
            match (flags.mask & bit != 0, flags.value & bit != 0) {
                (false, _) => '*',
                (true, false) => '0',
                (true, true) => '1',
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_msb_first() {
        let f = masked_flags("1*01", 8).unwrap();
        assert_eq!(f, Masked32::new(0b1001_0000, 0b1011_0000));

        let f = masked_flags("1*01", 4).unwrap();
        assert_eq!(f, Masked32::new(0b1001, 0b1011));

        let f = masked_flags("1*01********", 12).unwrap();
        assert_eq!(f, Masked32::new(0x900, 0xB00));

        let f = masked_flags("", 32).unwrap();
        assert_eq!(f, Masked32::default());
    }

    #[test]
    fn literal_and_wildcard_positions() {
        let pat = "10*1**0*1";
        let width = 16;
        let f = masked_flags(pat, width).unwrap();

        for (i, c) in pat.chars().enumerate() {
            let bit = 1u32 << (width - 1 - i as u32);
            match c {
                '*' => assert_eq!(f.mask & bit, 0, "pos {i}"),
                '0' => {
                    assert_ne!(f.mask & bit, 0, "pos {i}");
                    assert_eq!(f.value & bit, 0, "pos {i}");
                }
                '1' => {
                    assert_ne!(f.mask & bit, 0, "pos {i}");
                    assert_ne!(f.value & bit, 0, "pos {i}");
                }
                _ => unreachable!(),
            }
        }

        // Bits past the pattern are don't-care.
        assert_eq!(f.mask & 0x7F, 0);
    }

    #[test]
    fn encode_errors() {
        assert_eq!(
            masked_flags("1*01", 3),
            Err(OpenStateError::FlagPatternTooLong { len: 4, width: 3 })
        );
        assert_eq!(
            masked_flags("10x", 8),
            Err(OpenStateError::BadFlagChar('x'))
        );
        assert_eq!(masked_flags("1", 0), Err(OpenStateError::BadFlagWidth(0)));
        assert_eq!(
            masked_flags("1", 33),
            Err(OpenStateError::BadFlagWidth(33))
        );
    }

    #[test]
    fn pattern_roundtrip() {
        let f = masked_flags("1*01", 8).unwrap();
        assert_eq!(flags_pattern(f, 8), "1*01****");
        assert_eq!(flags_pattern(Masked32::exact(5), 4), "0101");
    }
}
