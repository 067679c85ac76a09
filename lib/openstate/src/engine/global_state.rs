// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The global state register: one 32-bit flag word per datapath.

use crate::api::Masked32;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

/// A 32-bit flag register shared by every table of a datapath.
///
/// Writes are masked read-modify-write operations performed with a
/// compare-and-swap loop, so concurrent writers touching disjoint bits
/// never lose each other's updates.
#[derive(Debug, Default)]
pub struct GlobalStateRegister {
    flags: AtomicU32,
}

impl GlobalStateRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current flags.
    pub fn read(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    /// Replace the masked bits with those of `m.value`. Returns the
    /// new value of the register.
    pub fn write(&self, m: Masked32) -> u32 {
        masked_write(&self.flags, m)
    }

    /// Does the register agree with `m` on every masked bit?
    pub fn matches(&self, m: Masked32) -> bool {
        m.matches(self.read())
    }

    /// Clear every flag.
    pub fn reset(&self) {
        self.flags.store(0, Ordering::Release);
    }
}

/// Apply `m` to `word` with a compare-and-swap loop, returning the
/// value stored.
pub(crate) fn masked_write(word: &AtomicU32, m: Masked32) -> u32 {
    let mut cur = word.load(Ordering::Relaxed);
    loop {
        let new = m.apply(cur);
        if new == cur {
            return cur;
        }

        match word.compare_exchange_weak(
            cur,
            new,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return new,
            Err(actual) => cur = actual,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::masked_flags;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_clear() {
        let reg = GlobalStateRegister::new();
        assert_eq!(reg.read(), 0);
        assert!(reg.matches(Masked32::exact(0)));
    }

    #[test]
    fn pattern_write_only_touches_masked_bits() {
        let reg = GlobalStateRegister::new();
        reg.write(Masked32::exact(0x8000_0042));

        // "1*01" over 8 bits: bit 7 set, bit 6 don't-care, bit 5 clear,
        // bit 4 set.
        let m = masked_flags("1*01", 8).unwrap();
        let before = reg.read();
        let after = reg.write(m);
        assert_eq!(after, reg.read());

        assert_eq!(after & m.mask, m.value & m.mask);
        assert_eq!(after & !m.mask, before & !m.mask);
        assert_eq!(after, 0x8000_00D2);
        assert!(reg.matches(m));
    }

    #[test]
    fn reset_clears() {
        let reg = GlobalStateRegister::new();
        reg.write(Masked32::exact(u32::MAX));
        reg.reset();
        assert_eq!(reg.read(), 0);
    }

    #[test]
    fn concurrent_disjoint_writers() {
        let reg = Arc::new(GlobalStateRegister::new());
        let handles = (0..8u32)
            .map(|bit| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        let val = if i % 2 == 0 { 1 << bit } else { 0 };
                        reg.write(Masked32::new(val, 1 << bit));
                    }
                    reg.write(Masked32::new(1 << bit, 1 << bit));
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reg.read(), 0xFF);
    }
}
