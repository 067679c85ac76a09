// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod field;
pub mod flags;
pub mod masked;
pub mod substate;

pub use cmd::*;
pub use field::*;
pub use flags::*;
pub use masked::*;
pub use substate::*;

/// The overall version of the API. Anytime a control message or one
/// of the shared dump types is added, removed, or modified, this
/// number should increment.
pub const API_VERSION: u64 = 3;

/// The OpenFlow version carried in every message header (1.3).
pub const OFP_VERSION: u8 = 0x04;

/// The experimenter ID claimed by the OpenState extension.
pub const OPENSTATE_EXPERIMENTER_ID: u32 = 0xBEBA_BEBA;

/// Wildcard table id; in a stats request it selects every table.
pub const OFPTT_ALL: u8 = 0xFF;

/// The highest table id a flow table may carry.
pub const OFPTT_MAX: u8 = 0xFE;

/// The maximum number of fields a key extractor may hold.
pub const MAX_EXTRACTOR_FIELDS: usize = 6;

/// The maximum number of bytes in a flow key.
pub const MAX_KEY_LEN: usize = 48;

/// Which of the two per-table key extractors is being configured.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyRole {
    /// The extractor used to build the key when reading state.
    Lookup,
    /// The extractor used to build the key when writing state.
    Update,
}

impl core::str::FromStr for KeyRole {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lookup" | "l" => Ok(KeyRole::Lookup),
            "update" | "u" => Ok(KeyRole::Update),
            _ => Err(format!("invalid key role: {}", s)),
        }
    }
}

impl Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            KeyRole::Lookup => "LOOKUP",
            KeyRole::Update => "UPDATE",
        };

        write!(f, "{}", s)
    }
}

/// Selects the tables a stats request applies to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TableSel {
    All,
    One(u8),
}

impl TableSel {
    pub fn contains(&self, table_id: u8) -> bool {
        match self {
            Self::All => true,
            Self::One(id) => *id == table_id,
        }
    }
}

impl From<u8> for TableSel {
    fn from(id: u8) -> Self {
        if id == OFPTT_ALL { Self::All } else { Self::One(id) }
    }
}

impl From<TableSel> for u8 {
    fn from(sel: TableSel) -> Self {
        match sel {
            TableSel::All => OFPTT_ALL,
            TableSel::One(id) => id,
        }
    }
}

impl Display for TableSel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::One(id) => write!(f, "{}", id),
        }
    }
}
