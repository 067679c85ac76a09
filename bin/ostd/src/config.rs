// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The daemon configuration file.

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use openstate::api::OFPTT_MAX;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The address controllers connect to.
    pub listen: SocketAddr,

    /// The datapath id reported in log messages.
    pub dpid: u64,

    /// The number of flow tables.
    pub n_tables: u8,

    /// One of critical, error, warn, info, debug, trace.
    pub log_level: String,

    /// Tables made stateful at boot.
    pub stateful_tables: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 6653)),
            dpid: 1,
            n_tables: 2,
            log_level: "info".to_string(),
            stateful_tables: vec![],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self = toml::from_str(&s)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_tables == 0 || self.n_tables > OFPTT_MAX {
            bail!("n_tables must be in 1..={OFPTT_MAX}, not {}", self.n_tables);
        }

        if let Some(id) =
            self.stateful_tables.iter().find(|id| **id >= self.n_tables)
        {
            bail!("stateful table {id} out of range");
        }

        self.level().map(|_| ())
    }

    pub fn level(&self) -> anyhow::Result<slog::Level> {
        slog::Level::from_str(&self.log_level)
            .map_err(|_| anyhow!("invalid log level: {}", self.log_level))
    }
}
