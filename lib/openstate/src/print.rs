// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both ostadm and integration tests.

use crate::api::DumpGlobalStateResp;
use crate::api::DumpStateResp;
use crate::api::StateEntryDump;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpStateResp`].
pub fn print_state_stats(resp: &DumpStateResp) -> std::io::Result<()> {
    print_state_stats_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpStateResp`] into a given writer.
pub fn print_state_stats_into(
    writer: &mut impl Write,
    resp: &DumpStateResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "State Entries: {}", resp.entries.len())?;
    write_hr(&mut t)?;
    print_state_entry_header(&mut t)?;
    for e in &resp.entries {
        print_state_entry(&mut t, e)?;
    }
    t.flush()
}

/// Print the header for the [`print_state_entry()`] output.
pub fn print_state_entry_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "TABLE\tSTATE\tKEY")
}

/// Print a single [`StateEntryDump`].
pub fn print_state_entry(
    t: &mut impl Write,
    e: &StateEntryDump,
) -> std::io::Result<()> {
    writeln!(t, "{}\t{:#010x}\t{}", e.table_id, e.state, e.key_str())
}

/// Print a [`DumpGlobalStateResp`].
pub fn print_global_state(resp: &DumpGlobalStateResp) -> std::io::Result<()> {
    print_global_state_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpGlobalStateResp`] into a given writer, most
/// significant flag first.
pub fn print_global_state_into(
    writer: &mut impl Write,
    resp: &DumpGlobalStateResp,
) -> std::io::Result<()> {
    writeln!(writer, "Global state: {:032b}", resp.flags)
}

/// Write a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "")
}
