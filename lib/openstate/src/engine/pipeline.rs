// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The match-action pipeline.
//!
//! A pipeline is a set of flow tables, each an ordered list of
//! [`Rule`]s. A packet enters at table 0. In each table the state
//! table is consulted first, then the highest priority matching rule
//! runs its instructions: the apply-actions list in order, then the
//! metadata write, then the goto. A packet that reaches a table
//! without a matching rule is dropped.
//!
//! Every check that could fail is done when the pipeline is built,
//! so [`Pipeline::process`] has no error path. In particular a goto
//! must always move to a higher table id, which also guarantees that
//! every traversal terminates.

use super::global_state::GlobalStateRegister;
use super::packet::PacketMeta;
use super::predicate::MatchCtx;
use super::rule::Action;
use super::rule::Finalized;
use super::rule::Rule;
use super::stat::DatapathStats;
use super::state_table::StateTables;
use crate::api::OFPTT_MAX;
use crate::api::OpenStateError;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;
use std::collections::BTreeMap;

/// The rules of a single flow table, highest priority first. Rules of
/// equal priority keep the order they were added in.
#[derive(Clone, Debug, Default)]
pub struct FlowTable {
    id: u8,
    rules: Vec<Rule<Finalized>>,
}

impl FlowTable {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn rules(&self) -> &[Rule<Finalized>] {
        &self.rules
    }

    pub fn find_match(
        &self,
        pkt: &PacketMeta,
        ctx: &MatchCtx,
    ) -> Option<&Rule<Finalized>> {
        self.rules.iter().find(|r| r.is_match(pkt, ctx))
    }
}

impl Display for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "table {}:", self.id)?;
        for r in &self.rules {
            writeln!(f, "  {r}")?;
        }
        Ok(())
    }
}

/// Collects rules for a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    tables: BTreeMap<u8, Vec<Rule<Finalized>>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, table_id: u8, rule: Rule<Finalized>) {
        self.tables.entry(table_id).or_default().push(rule);
    }

    /// Validate the rules against a datapath with `n_tables` tables
    /// and build the pipeline.
    ///
    /// # Errors
    ///
    /// * [`OpenStateError::InvalidTableId`]: a rule lives in, jumps
    ///   to, or writes state in a table that does not exist.
    /// * [`OpenStateError::BackwardGoto`]: a goto does not move to a
    ///   strictly higher table id.
    pub fn build(self, n_tables: u8) -> Result<Pipeline, OpenStateError> {
        let check_id = |id: u8| {
            if id > OFPTT_MAX || id >= n_tables {
                Err(OpenStateError::InvalidTableId(id))
            } else {
                Ok(())
            }
        };

        let mut tables = BTreeMap::new();
        for (id, rules) in self.tables {
            check_id(id)?;

            for r in &rules {
                let ins = r.instructions();
                if let Some(to) = ins.goto_table {
                    if to <= id {
                        return Err(OpenStateError::BackwardGoto {
                            from: id,
                            to,
                        });
                    }
                    check_id(to)?;
                }

                for act in &ins.apply_actions {
                    if let Action::SetState { table_id: Some(t), .. } = act {
                        check_id(*t)?;
                    }
                }
            }

            let rules = rules
                .into_iter()
                .sorted_by(|a, b| b.priority().cmp(&a.priority()))
                .collect();
            tables.insert(id, FlowTable { id, rules });
        }

        Ok(Pipeline { tables })
    }
}

/// What became of a packet after its trip through the pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessResult {
    /// At least one output action ran; the packet leaves on these
    /// ports in action order.
    Output(Vec<u32>),

    /// The packet was dropped.
    Drop { reason: DropReason },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// No rule of this table matched.
    TableMiss(u8),

    /// Rules matched, but none of them had an output action.
    NoOutput,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TableMiss(id) => write!(f, "table miss in table {id}"),
            Self::NoOutput => write!(f, "no output action"),
        }
    }
}

/// The per-datapath state a packet traversal reads and writes.
#[derive(Clone, Copy)]
pub struct PipelineCtx<'a> {
    pub states: &'a StateTables,
    pub global: &'a GlobalStateRegister,
    pub stats: &'a DatapathStats,
}

/// An installed, validated set of flow tables.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    tables: BTreeMap<u8, FlowTable>,
}

impl Pipeline {
    pub fn table(&self, id: u8) -> Option<&FlowTable> {
        self.tables.get(&id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &FlowTable> {
        self.tables.values()
    }

    /// Run `pkt` through the pipeline starting at table 0.
    pub fn process(
        &self,
        ctx: PipelineCtx<'_>,
        pkt: &mut PacketMeta,
    ) -> ProcessResult {
        let mut outputs = vec![];
        let mut table_id = 0;

        loop {
            let mctx = MatchCtx {
                state: ctx.states.lookup(table_id, pkt),
                flags: ctx.global.read(),
            };

            let Some(rule) =
                self.table(table_id).and_then(|t| t.find_match(pkt, &mctx))
            else {
                ctx.stats.table_miss.incr();
                return ProcessResult::Drop {
                    reason: DropReason::TableMiss(table_id),
                };
            };

            let ins = rule.instructions();
            for act in &ins.apply_actions {
                match *act {
                    Action::Output(port) => outputs.push(port),

                    Action::SetState { state, table_id: target } => {
                        let target = target.unwrap_or(table_id);
                        match ctx.states.apply_state(target, pkt, state) {
                            Ok(Some(_)) => ctx.stats.state_write.incr(),
                            Ok(None) => ctx.stats.state_write_no_key.incr(),
                            Err(_) => ctx.stats.state_write_stateless.incr(),
                        }
                    }

                    Action::SetFlag(flags) => {
                        ctx.global.write(flags);
                        ctx.stats.flag_write.incr();
                    }
                }
            }

            if let Some(md) = ins.write_metadata {
                pkt.metadata = md.apply(pkt.metadata);
            }

            match ins.goto_table {
                Some(next) => table_id = next,
                None => break,
            }
        }

        if outputs.is_empty() {
            ProcessResult::Drop { reason: DropReason::NoOutput }
        } else {
            ProcessResult::Output(outputs)
        }
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for t in self.tables.values() {
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Field;
    use crate::api::KeyRole;
    use crate::api::Masked32;
    use crate::api::Masked64;
    use crate::engine::packet::Ipv4Meta;
    use crate::engine::predicate::Predicate;
    use crate::engine::rule::Instructions;
    use core::net::Ipv4Addr;

    fn pkt(src: u8, dst: u8) -> PacketMeta {
        PacketMeta {
            ip: Some(Ipv4Meta {
                src: Ipv4Addr::new(10, 0, 0, src),
                dst: Ipv4Addr::new(10, 0, 0, dst),
                proto: 6,
            }),
            ..Default::default()
        }
    }

    fn output(port: u32) -> Instructions {
        Instructions::apply(vec![Action::Output(port)])
    }

    struct Env {
        states: StateTables,
        global: GlobalStateRegister,
        stats: DatapathStats,
    }

    impl Env {
        fn new(n_tables: u8) -> Self {
            Self {
                states: StateTables::new(n_tables, None),
                global: GlobalStateRegister::new(),
                stats: DatapathStats::default(),
            }
        }

        fn ctx(&self) -> PipelineCtx<'_> {
            PipelineCtx {
                states: &self.states,
                global: &self.global,
                stats: &self.stats,
            }
        }
    }

    #[test]
    fn backward_goto_rejected_at_build() {
        let mut pb = PipelineBuilder::new();
        pb.add_rule(1, Rule::match_any(0, output(1).goto(1)));
        assert_eq!(
            pb.build(4).unwrap_err(),
            OpenStateError::BackwardGoto { from: 1, to: 1 }
        );

        let mut pb = PipelineBuilder::new();
        pb.add_rule(2, Rule::match_any(0, output(1).goto(0)));
        assert_eq!(
            pb.build(4).unwrap_err(),
            OpenStateError::BackwardGoto { from: 2, to: 0 }
        );
    }

    #[test]
    fn table_ids_checked_at_build() {
        let mut pb = PipelineBuilder::new();
        pb.add_rule(4, Rule::match_any(0, output(1)));
        assert_eq!(pb.build(4).unwrap_err(), OpenStateError::InvalidTableId(4));

        let mut pb = PipelineBuilder::new();
        pb.add_rule(0, Rule::match_any(0, output(1).goto(9)));
        assert_eq!(pb.build(4).unwrap_err(), OpenStateError::InvalidTableId(9));

        let mut pb = PipelineBuilder::new();
        let set = Action::SetState {
            state: Masked32::exact(1),
            table_id: Some(7),
        };
        pb.add_rule(0, Rule::match_any(0, Instructions::apply(vec![set])));
        assert_eq!(pb.build(4).unwrap_err(), OpenStateError::InvalidTableId(7));
    }

    #[test]
    fn priority_order_and_miss() {
        let mut pb = PipelineBuilder::new();
        let mut r = Rule::new(5, output(5));
        r.add_predicate(Predicate::field(Field::Ipv4Dst, "10.0.0.2").unwrap());
        pb.add_rule(0, r.finalize());
        pb.add_rule(0, Rule::match_any(1, output(1)));
        let mut r = Rule::new(9, output(9));
        r.add_predicate(Predicate::field(Field::Ipv4Dst, "10.0.0.9").unwrap());
        pb.add_rule(0, r.finalize());
        let p = pb.build(1).unwrap();

        let env = Env::new(1);
        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 2)),
            ProcessResult::Output(vec![5])
        );
        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 9)),
            ProcessResult::Output(vec![9])
        );
        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 3)),
            ProcessResult::Output(vec![1])
        );

        let empty = Pipeline::default();
        assert_eq!(
            empty.process(env.ctx(), &mut pkt(1, 2)),
            ProcessResult::Drop { reason: DropReason::TableMiss(0) }
        );
        assert_eq!(env.stats.table_miss.get(), 1);
    }

    #[test]
    fn state_drives_forwarding() {
        let env = Env::new(2);
        env.states.configure(0, true).unwrap();
        for role in [KeyRole::Lookup, KeyRole::Update] {
            env.states.set_extractor(0, role, vec![Field::Ipv4Src]).unwrap();
        }

        // State 0: remember the source and send to the controller
        // port. State 1: forward on port 2.
        let mut pb = PipelineBuilder::new();
        let mut r = Rule::new(10, output(2));
        r.add_predicate(Predicate::State(Masked32::exact(1)));
        pb.add_rule(0, r.finalize());
        pb.add_rule(
            0,
            Rule::match_any(
                0,
                Instructions::apply(vec![
                    Action::set_state(Masked32::exact(1)),
                    Action::Output(0xFFFF_FFFD),
                ]),
            ),
        );
        let p = pb.build(2).unwrap();

        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 2)),
            ProcessResult::Output(vec![0xFFFF_FFFD])
        );
        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 2)),
            ProcessResult::Output(vec![2])
        );
        assert_eq!(
            p.process(env.ctx(), &mut pkt(3, 2)),
            ProcessResult::Output(vec![0xFFFF_FFFD])
        );
        assert_eq!(env.stats.state_write.get(), 2);
    }

    #[test]
    fn flags_metadata_and_goto() {
        let env = Env::new(3);
        let mut pb = PipelineBuilder::new();

        // Table 0 raises flag bit 0 and tags the packet.
        pb.add_rule(
            0,
            Rule::match_any(
                0,
                Instructions::apply(vec![Action::SetFlag(Masked32::new(1, 1))])
                    .write_metadata(Masked64::exact(64954))
                    .goto(2),
            ),
        );

        // Table 2 only forwards tagged packets while the flag is up.
        let mut r = Rule::new(1, output(4));
        r.add_predicate(Predicate::Flags(Masked32::new(1, 1)));
        r.add_predicate(Predicate::Metadata(Masked64::exact(64954)));
        pb.add_rule(2, r.finalize());
        let p = pb.build(3).unwrap();

        let mut pkt = pkt(1, 2);
        assert_eq!(
            p.process(env.ctx(), &mut pkt),
            ProcessResult::Output(vec![4])
        );
        assert_eq!(pkt.metadata, 64954);
        assert_eq!(env.global.read(), 1);
        assert_eq!(env.stats.flag_write.get(), 1);
    }

    #[test]
    fn set_state_on_stateless_table_is_counted() {
        let env = Env::new(1);
        let mut pb = PipelineBuilder::new();
        let set = Action::set_state(Masked32::exact(1));
        pb.add_rule(0, Rule::match_any(0, Instructions::apply(vec![set])));
        let p = pb.build(1).unwrap();

        assert_eq!(
            p.process(env.ctx(), &mut pkt(1, 2)),
            ProcessResult::Drop { reason: DropReason::NoOutput }
        );
        assert_eq!(env.stats.state_write_stateless.get(), 1);
        assert_eq!(env.stats.state_write.get(), 0);
    }
}
