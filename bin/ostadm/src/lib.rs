// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! OpenState datapath administration library

use openstate::api::FieldMatch;
use openstate::api::OpenStateError;
use openstate::api::StateStatsFilter;
use openstate::api::TableSel;
use openstate_ctl::Error;
use openstate_ctl::OpenStateHdl;
use std::net::ToSocketAddrs;
use std::ops::Deref;
use std::ops::DerefMut;

/// The handle used to send administration commands to a datapath.
#[derive(Debug)]
pub struct OstAdm(OpenStateHdl);

impl Deref for OstAdm {
    type Target = OpenStateHdl;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for OstAdm {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl OstAdm {
    /// Connect to the datapath control channel at `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        OpenStateHdl::connect(addr).map(Self)
    }
}

/// A flow key given as comma-separated `field=value` pairs, e.g.
/// `ipv4_src=10.0.0.3,tcp_dst=80`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowKey(Vec<FieldMatch>);

impl FlowKey {
    /// The key as sent in a state mod: each value in field order.
    pub fn key(&self) -> Vec<u8> {
        self.0.iter().flat_map(|m| m.value.iter().copied()).collect()
    }

    /// A stats filter selecting the entries of `table_id` whose key
    /// holds every one of these field values.
    pub fn filter(&self, table_id: u8) -> StateStatsFilter {
        StateStatsFilter {
            table: TableSel::from(table_id),
            matches: self.0.clone(),
        }
    }
}

impl core::str::FromStr for FlowKey {
    type Err = OpenStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|p| !p.trim().is_empty())
            .map(FieldMatch::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
