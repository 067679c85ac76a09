// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Rules, actions, and instructions.

use super::packet::PacketMeta;
use super::predicate::MatchCtx;
use super::predicate::Predicate;
use crate::api::Masked32;
use crate::api::Masked64;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;

/// An action of an `APPLY_ACTIONS` instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Send the packet out of this port. The pipeline only records
    /// the port; delivery is up to the caller.
    Output(u32),

    /// Masked write to the state of the packet's update key in
    /// `table_id`, or in the current table when it is `None`.
    SetState { state: Masked32, table_id: Option<u8> },

    /// Masked write to the global flags.
    SetFlag(Masked32),
}

impl Action {
    pub fn set_state(state: Masked32) -> Self {
        Self::SetState { state, table_id: None }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Output(port) => write!(f, "output:{port}"),
            Self::SetState { state, table_id: None } => {
                write!(f, "set_state:{state}")
            }
            Self::SetState { state, table_id: Some(id) } => {
                write!(f, "set_state:{state},table={id}")
            }
            Self::SetFlag(flags) => write!(f, "set_flag:{flags}"),
        }
    }
}

/// The instructions executed when a rule matches: first the actions
/// in list order, then the metadata write, then the goto.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Instructions {
    pub apply_actions: Vec<Action>,
    pub write_metadata: Option<Masked64>,
    pub goto_table: Option<u8>,
}

impl Instructions {
    pub fn apply(actions: Vec<Action>) -> Self {
        Self { apply_actions: actions, ..Default::default() }
    }

    pub fn goto(mut self, table_id: u8) -> Self {
        self.goto_table = Some(table_id);
        self
    }

    pub fn write_metadata(mut self, md: Masked64) -> Self {
        self.write_metadata = Some(md);
        self
    }
}

impl Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = vec![];
        if !self.apply_actions.is_empty() {
            parts.push(format!(
                "apply({})",
                self.apply_actions.iter().join(",")
            ));
        }
        if let Some(md) = self.write_metadata {
            parts.push(format!("write_metadata({md})"));
        }
        if let Some(id) = self.goto_table {
            parts.push(format!("goto({id})"));
        }

        if parts.is_empty() {
            write!(f, "drop")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

pub trait RuleState {}

#[derive(Clone, Debug)]
pub struct Ready {
    preds: Vec<Predicate>,
}
impl RuleState for Ready {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Finalized {
    preds: Option<Vec<Predicate>>,
}
impl RuleState for Finalized {}

#[derive(Clone, Debug)]
pub struct Rule<S: RuleState> {
    state: S,
    instructions: Instructions,
    priority: u16,
}

impl PartialEq for Rule<Finalized> {
    fn eq(&self, other: &Self) -> bool {
        self.state.preds == other.state.preds
            && self.priority == other.priority
            && self.instructions == other.instructions
    }
}

impl Eq for Rule<Finalized> {}

impl<S: RuleState> Rule<S> {
    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }
}

impl Rule<Ready> {
    /// Create a new rule with the given priority and instructions.
    /// Higher priorities are matched first.
    pub fn new(priority: u16, instructions: Instructions) -> Self {
        Rule { state: Ready { preds: vec![] }, instructions, priority }
    }

    /// Create a new rule that matches anything, e.g. a table-miss
    /// rule at priority 0.
    pub fn match_any(
        priority: u16,
        instructions: Instructions,
    ) -> Rule<Finalized> {
        Rule { state: Finalized { preds: None }, instructions, priority }
    }

    /// Add a single [`Predicate`] to the end of the list.
    pub fn add_predicate(&mut self, pred: Predicate) {
        self.state.preds.push(pred);
    }

    /// Append a list of [`Predicate`]s to the existing list.
    pub fn add_predicates(&mut self, preds: Vec<Predicate>) {
        self.state.preds.extend(preds);
    }

    /// Finalize the rule; locking all predicates in stone.
    pub fn finalize(self) -> Rule<Finalized> {
        let preds = if self.state.preds.is_empty() {
            None
        } else {
            Some(self.state.preds)
        };

        Rule {
            state: Finalized { preds },
            priority: self.priority,
            instructions: self.instructions,
        }
    }
}

impl Rule<Finalized> {
    pub fn is_match(&self, pkt: &PacketMeta, ctx: &MatchCtx) -> bool {
        match &self.state.preds {
            // A rule with no predicates always matches.
            None => true,
            Some(preds) => preds.iter().all(|p| p.is_match(pkt, ctx)),
        }
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn predicates(&self) -> &[Predicate] {
        self.state.preds.as_deref().unwrap_or(&[])
    }
}

impl Display for Rule<Finalized> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preds = match &self.state.preds {
            None => "*".to_string(),
            Some(preds) => preds.iter().join(","),
        };
        write!(
            f,
            "prio={} match={} {}",
            self.priority, preds, self.instructions
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Field;
    use crate::engine::packet::Ipv4Meta;
    use core::net::Ipv4Addr;

    #[test]
    fn rule_matching() {
        let pkt = PacketMeta {
            ip: Some(Ipv4Meta {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
                proto: 6,
            }),
            ..Default::default()
        };

        let mut r = Rule::new(10, Instructions::apply(vec![Action::Output(2)]));
        r.add_predicate(Predicate::field(Field::Ipv4Src, "10.0.0.1").unwrap());
        r.add_predicate(Predicate::State(Masked32::exact(1)));
        let r = r.finalize();

        assert!(r.is_match(&pkt, &MatchCtx { state: 1, flags: 0 }));
        assert!(!r.is_match(&pkt, &MatchCtx { state: 0, flags: 0 }));
        assert_eq!(r.predicates().len(), 2);
        assert_eq!(
            r.to_string(),
            "prio=10 match=ipv4_src=10.0.0.1,state=0x1 apply(output:2)"
        );

        let any = Rule::match_any(0, Instructions::default());
        assert!(any.is_match(&pkt, &MatchCtx::default()));
        assert_eq!(any.to_string(), "prio=0 match=* drop");

        let empty = Rule::new(0, Instructions::default()).finalize();
        assert_eq!(empty, any);
    }

    #[test]
    fn rules_differing_in_instructions_are_unequal() {
        let fwd = |port| {
            let mut r =
                Rule::new(5, Instructions::apply(vec![Action::Output(port)]));
            r.add_predicate(Predicate::State(Masked32::exact(1)));
            r.finalize()
        };

        assert_eq!(fwd(2), fwd(2));
        assert_ne!(fwd(2), fwd(3));

        let to_2 = Rule::match_any(0, Instructions::default().goto(2));
        let to_3 = Rule::match_any(0, Instructions::default().goto(3));
        assert_ne!(to_2, to_3);
        assert_ne!(Rule::match_any(0, Instructions::default()), to_2);
    }

    #[test]
    fn instruction_display() {
        let ins = Instructions::apply(vec![
            Action::set_state(Masked32::new(0x2, 0xFF)),
            Action::SetState { state: Masked32::exact(0), table_id: Some(3) },
            Action::SetFlag(Masked32::new(0x1, 0x1)),
        ])
        .write_metadata(Masked64::exact(7))
        .goto(2);

        assert_eq!(
            ins.to_string(),
            "apply(set_state:0x2/0xff,set_state:0x0,table=3,\
             set_flag:0x1/0x1) write_metadata(0x7) goto(2)"
        );
    }
}
