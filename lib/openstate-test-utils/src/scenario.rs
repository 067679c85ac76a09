// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A manually driven clock and a scheduler of timed control steps.
//!
//! Scenarios describe what the controller does at which point in time
//! ("set the state of h3, five seconds later delete it"). Rather than
//! sleeping, a test advances the clock explicitly and checks the
//! datapath between steps.

use openstate::engine::Datapath;
use std::collections::BTreeMap;
use std::time::Duration;

/// A clock that only moves when told to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ManualClock {
    now: Duration,
}

impl ManualClock {
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock to `t`. Time never runs backwards.
    pub fn advance_to(&mut self, t: Duration) {
        self.now = self.now.max(t);
    }
}

type Step<'a> = Box<dyn FnOnce(&Datapath) + 'a>;

/// Control steps to run against a datapath at given times. Steps
/// scheduled for the same time run in the order they were added.
#[derive(Default)]
pub struct Scenario<'a> {
    clock: ManualClock,
    steps: BTreeMap<Duration, Vec<Step<'a>>>,
}

impl<'a> Scenario<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Schedule `step` to run at `secs` seconds.
    pub fn at(
        &mut self,
        secs: u64,
        step: impl FnOnce(&Datapath) + 'a,
    ) -> &mut Self {
        self.steps
            .entry(Duration::from_secs(secs))
            .or_default()
            .push(Box::new(step));
        self
    }

    /// Advance the clock to `secs` seconds, running every step due by
    /// then in time order. Returns the number of steps run.
    pub fn run_until(&mut self, dp: &Datapath, secs: u64) -> usize {
        let t = Duration::from_secs(secs);
        let later = self.steps.split_off(&(t + Duration::from_nanos(1)));
        let due = std::mem::replace(&mut self.steps, later);

        let mut n = 0;
        for (at, steps) in due {
            self.clock.advance_to(at);
            for step in steps {
                step(dp);
                n += 1;
            }
        }

        self.clock.advance_to(t);
        n
    }

    /// The number of steps not yet run.
    pub fn pending(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openstate::provider::PrintlnLog;
    use openstate::provider::Providers;
    use std::cell::RefCell;

    #[test]
    fn steps_run_in_time_order() {
        let dp = Datapath::new(1, 1, Providers::new(Box::new(PrintlnLog)));
        let log = RefCell::new(vec![]);
        let mut sc = Scenario::new();
        sc.at(5, |_| log.borrow_mut().push("b"))
            .at(0, |_| log.borrow_mut().push("a"))
            .at(5, |_| log.borrow_mut().push("c"))
            .at(10, |_| log.borrow_mut().push("d"));

        assert_eq!(sc.run_until(&dp, 0), 1);
        assert_eq!(sc.run_until(&dp, 7), 2);
        assert_eq!(sc.now(), Duration::from_secs(7));
        assert_eq!(sc.pending(), 1);
        assert_eq!(*log.borrow(), ["a", "b", "c"]);

        // The clock does not run backwards.
        assert_eq!(sc.run_until(&dp, 3), 0);
        assert_eq!(sc.now(), Duration::from_secs(7));

        assert_eq!(sc.run_until(&dp, 10), 1);
        assert_eq!(sc.pending(), 0);
        assert_eq!(*log.borrow(), ["a", "b", "c", "d"]);
    }
}
