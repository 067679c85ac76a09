// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use clap::Parser;
use openstate::api::API_VERSION;
use openstate::api::Field;
use openstate::api::FieldMatch;
use openstate::api::KeyRole;
use openstate::api::Masked32;
use openstate::api::OFPTT_ALL;
use openstate::api::StateStatsFilter;
use openstate::api::TableSel;
use openstate::api::masked_flags;
use openstate::api::pack_substate;
use openstate::print::print_global_state;
use openstate::print::print_state_stats;
use ostadm::FlowKey;
use ostadm::OstAdm;
use serde::Serialize;

/// Administer an OpenState datapath.
#[derive(Debug, Parser)]
#[command(version = format!("0.1.0 (api {API_VERSION})"))]
struct Cli {
    /// The datapath control address.
    #[arg(long, default_value = "127.0.0.1:6653")]
    addr: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Make a table stateful, or stateless with --stateless.
    ConfigureTable {
        table_id: u8,

        /// Make the table stateless, discarding its state entries.
        #[arg(long)]
        stateless: bool,
    },

    /// Set the lookup or update key extractor of a stateful table.
    SetExtractor {
        table_id: u8,

        /// lookup or update
        #[arg(long)]
        role: KeyRole,

        /// The key fields, in order, e.g. ipv4_src,tcp_dst.
        #[arg(value_delimiter = ',', required = true)]
        fields: Vec<Field>,
    },

    /// Write the state of a flow.
    SetState {
        table_id: u8,

        /// The flow key, e.g. ipv4_src=10.0.0.3.
        key: FlowKey,

        /// The state value to write into the section.
        #[arg(long)]
        state: u32,

        /// The section of the state word to write, counted from 1 at
        /// the least significant bits.
        #[arg(long, default_value_t = 1)]
        section: u32,

        /// The number of equal sections the state word is cut into.
        #[arg(long, default_value_t = 1)]
        sec_count: u32,
    },

    /// Show the state entries whose key holds the given field values.
    GetState {
        table_id: u8,

        /// The flow key, e.g. ipv4_src=10.0.0.3.
        key: FlowKey,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Delete the state of a flow.
    DelState {
        table_id: u8,

        /// The flow key, e.g. ipv4_src=10.0.0.3.
        key: FlowKey,
    },

    /// Write the global flags from a pattern over 0, 1 and *.
    SetFlags {
        pattern: String,

        /// The width of the flag field the pattern describes.
        #[arg(long, default_value_t = 32)]
        width: u32,
    },

    /// Clear every global flag.
    ResetFlags,

    /// Dump state entries.
    DumpState {
        /// Only dump this table.
        #[arg(long)]
        table: Option<u8>,

        /// Only dump entries whose key has field=value; may be
        /// repeated.
        #[arg(long = "match", value_parser = FieldMatch::parse)]
        matches: Vec<FieldMatch>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Dump the global flags.
    DumpFlags {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn print_json(val: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut hdl = OstAdm::connect(&cli.addr)?;

    match cli.cmd {
        Command::ConfigureTable { table_id, stateless } => {
            hdl.configure_table(table_id, !stateless)?;
        }

        Command::SetExtractor { table_id, role, fields } => {
            hdl.set_extractor(table_id, role, fields)?;
        }

        Command::SetState { table_id, key, state, section, sec_count } => {
            let m = pack_substate(state, section, sec_count)?;
            hdl.set_state(table_id, key.key(), m)?;
        }

        Command::GetState { table_id, key, json } => {
            let resp = hdl.dump_state(key.filter(table_id))?;
            if json {
                print_json(&resp)?;
            } else {
                print_state_stats(&resp)?;
            }
        }

        Command::DelState { table_id, key } => {
            hdl.del_state(table_id, key.key())?;
        }

        Command::SetFlags { pattern, width } => {
            let m: Masked32 = masked_flags(&pattern, width)?;
            hdl.set_global_state(m)?;
        }

        Command::ResetFlags => {
            hdl.reset_global_state()?;
        }

        Command::DumpState { table, matches, json } => {
            let table = TableSel::from(table.unwrap_or(OFPTT_ALL));
            let resp = hdl.dump_state(StateStatsFilter { table, matches })?;
            if json {
                print_json(&resp)?;
            } else {
                print_state_stats(&resp)?;
            }
        }

        Command::DumpFlags { json } => {
            let resp = hdl.dump_global_state()?;
            if json {
                print_json(&resp)?;
            } else {
                print_global_state(&resp)?;
            }
        }
    }

    Ok(())
}
