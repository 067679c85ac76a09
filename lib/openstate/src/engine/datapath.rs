// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The per-switch state container.

use super::global_state::GlobalStateRegister;
use super::packet::PacketMeta;
use super::pipeline::Pipeline;
use super::pipeline::PipelineBuilder;
use super::pipeline::PipelineCtx;
use super::pipeline::ProcessResult;
use super::stat::DatapathStats;
use super::state_table::StateTables;
use crate::api::OpenStateError;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KRwLock;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use core::fmt;
use std::sync::Arc;

/// Everything a single datapath owns: its state tables, its global
/// flags, the installed pipeline, and its counters.
///
/// A `Datapath` is shared between any number of packet-processing
/// threads and one control channel. Packets go through
/// [`Datapath::process`]; control messages go through
/// [`Datapath::handle_ctl`], which serializes them.
pub struct Datapath {
    dpid: u64,
    n_tables: u8,
    states: StateTables,
    global: GlobalStateRegister,
    pipeline: KRwLock<Arc<Pipeline>>,
    stats: DatapathStats,
    pub(crate) ctl_lock: KMutex<()>,
    log: Box<dyn LogProvider>,
}

impl fmt::Debug for Datapath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Datapath")
            .field("dpid", &self.dpid)
            .field("n_tables", &self.n_tables)
            .field("global", &self.global)
            .finish_non_exhaustive()
    }
}

impl Datapath {
    /// Create a datapath with `n_tables` flow tables, all stateless
    /// and without rules.
    pub fn new(dpid: u64, n_tables: u8, providers: Providers) -> Self {
        let Providers { log, observer } = providers;
        Self {
            dpid,
            n_tables,
            states: StateTables::new(n_tables, observer),
            global: GlobalStateRegister::new(),
            pipeline: KRwLock::new(Arc::new(Pipeline::default())),
            stats: DatapathStats::default(),
            ctl_lock: KMutex::new(()),
            log,
        }
    }

    pub fn dpid(&self) -> u64 {
        self.dpid
    }

    pub fn n_tables(&self) -> u8 {
        self.n_tables
    }

    pub fn states(&self) -> &StateTables {
        &self.states
    }

    pub fn global(&self) -> &GlobalStateRegister {
        &self.global
    }

    pub fn stats(&self) -> &DatapathStats {
        &self.stats
    }

    pub(crate) fn log(&self, level: LogLevel, msg: &str) {
        self.log.log(level, msg);
    }

    /// Validate and install a new pipeline, replacing the current one.
    ///
    /// Packets already in flight finish on the pipeline they started
    /// with. State entries and flags are untouched.
    pub fn install_pipeline(
        &self,
        pb: PipelineBuilder,
    ) -> Result<(), OpenStateError> {
        let pipeline = pb.build(self.n_tables).inspect_err(|e| {
            self.log(LogLevel::Error, &format!("pipeline rejected: {e}"));
        })?;

        let n_rules: usize = pipeline.tables().map(|t| t.rules().len()).sum();
        *self.pipeline.write() = Arc::new(pipeline);
        let msg = format!(
            "dp {:#x}: installed pipeline of {n_rules} rules",
            self.dpid
        );
        self.log(LogLevel::Note, &msg);
        Ok(())
    }

    /// The currently installed pipeline.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline.read())
    }

    /// Run a packet through the installed pipeline.
    pub fn process(&self, pkt: &mut PacketMeta) -> ProcessResult {
        self.stats.pkt_in.incr();
        let pipeline = self.pipeline();
        let ctx = PipelineCtx {
            states: &self.states,
            global: &self.global,
            stats: &self.stats,
        };

        let res = pipeline.process(ctx, pkt);
        match &res {
            ProcessResult::Output(_) => self.stats.pkt_out.incr(),
            ProcessResult::Drop { .. } => self.stats.pkt_drop.incr(),
        }
        res
    }
}
