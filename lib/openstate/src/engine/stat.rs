// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Datapath counters.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cumulative counters for a single [`Datapath`].
///
/// [`Datapath`]: super::datapath::Datapath
#[derive(Debug, Default)]
pub struct DatapathStats {
    /// The number of packets handed to the pipeline.
    pub pkt_in: Counter,

    /// The number of packets that left on at least one port.
    pub pkt_out: Counter,

    /// The number of packets dropped, for one reason or another.
    pub pkt_drop: Counter,

    /// The number of times a packet found no matching rule in a
    /// table.
    pub table_miss: Counter,

    /// The number of `SetState` actions that wrote a state entry.
    pub state_write: Counter,

    /// The number of `SetState` actions skipped because the packet
    /// lacked a field of the update extractor.
    pub state_write_no_key: Counter,

    /// The number of `SetState` actions skipped because the target
    /// table is not stateful.
    pub state_write_stateless: Counter,

    /// The number of `SetFlag` actions run.
    pub flag_write: Counter,

    /// The number of control messages received.
    pub ctl_msg: Counter,

    /// The number of control messages answered with an error.
    pub ctl_err: Counter,
}

/// A point-in-time copy of [`DatapathStats`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DatapathStatsSnap {
    pub pkt_in: u64,
    pub pkt_out: u64,
    pub pkt_drop: u64,
    pub table_miss: u64,
    pub state_write: u64,
    pub state_write_no_key: u64,
    pub state_write_stateless: u64,
    pub flag_write: u64,
    pub ctl_msg: u64,
    pub ctl_err: u64,
}

impl DatapathStats {
    pub fn snapshot(&self) -> DatapathStatsSnap {
        DatapathStatsSnap {
            pkt_in: self.pkt_in.get(),
            pkt_out: self.pkt_out.get(),
            pkt_drop: self.pkt_drop.get(),
            table_miss: self.table_miss.get(),
            state_write: self.state_write.get(),
            state_write_no_key: self.state_write_no_key.get(),
            state_write_stateless: self.state_write_stateless.get(),
            flag_write: self.flag_write.get(),
            ctl_msg: self.ctl_msg.get(),
            ctl_err: self.ctl_err.get(),
        }
    }
}
