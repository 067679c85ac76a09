// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Substates: independent bit-field sections of a 32-bit state word.
//!
//! The word is cut into `sec_count` equal sections of
//! `32 / sec_count` bits each. Sections are numbered from one,
//! starting at the least significant bits, so section `n` occupies
//! bits `[(n - 1) * width, n * width)`.
//!
//! The engine only ever stores the full word; writers and readers of
//! a table must agree on `(section, sec_count)` among themselves.

use super::Masked32;
use super::OpenStateError;
use super::low_bits;
use serde::Deserialize;
use serde::Serialize;

/// A validated `(section, sec_count)` pair.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Substate {
    section: u32,
    sec_count: u32,
}

impl Substate {
    /// The whole word as a single section.
    pub const WHOLE: Self = Self { section: 1, sec_count: 1 };

    /// Create a new substate descriptor.
    ///
    /// # Errors
    ///
    /// `sec_count` must be a power of two that divides 32, and
    /// `section` must be in `1..=sec_count`.
    pub fn new(section: u32, sec_count: u32) -> Result<Self, OpenStateError> {
        if !sec_count.is_power_of_two() || sec_count > 32 {
            return Err(OpenStateError::BadSectionCount(sec_count));
        }

        if section == 0 || section > sec_count {
            return Err(OpenStateError::BadSection { section, sec_count });
        }

        Ok(Self { section, sec_count })
    }

    pub fn section(&self) -> u32 {
        self.section
    }

    pub fn sec_count(&self) -> u32 {
        self.sec_count
    }

    /// The number of bits in each section.
    pub fn width(&self) -> u32 {
        32 / self.sec_count
    }

    fn shift(&self) -> u32 {
        (self.section - 1) * self.width()
    }

    /// The bits of the word this section covers.
    pub fn mask(&self) -> u32 {
        low_bits(self.width()) << self.shift()
    }

    /// Place `state` into this section.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStateError::SubstateRange`] if `state` does not
    /// fit in the section; truncating it would spill into the
    /// neighbouring sections.
    pub fn pack(&self, state: u32) -> Result<Masked32, OpenStateError> {
        let width = self.width();
        if state & !low_bits(width) != 0 {
            return Err(OpenStateError::SubstateRange { state, width });
        }

        Ok(Masked32 { value: state << self.shift(), mask: self.mask() })
    }

    /// Extract this section's value from a full state word.
    pub fn unpack(&self, word: u32) -> u32 {
        (word >> self.shift()) & low_bits(self.width())
    }
}

/// Pack `state` into section `section` of `sec_count`, returning the
/// `(value, mask)` pair to use in a masked write or match.
pub fn pack_substate(
    state: u32,
    section: u32,
    sec_count: u32,
) -> Result<Masked32, OpenStateError> {
    Substate::new(section, sec_count)?.pack(state)
}

/// Extract section `section` of `sec_count` from `word`.
pub fn unpack_substate(
    word: u32,
    section: u32,
    sec_count: u32,
) -> Result<u32, OpenStateError> {
    Ok(Substate::new(section, sec_count)?.unpack(word))
}
