// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The six-host reference pipeline combining flow state, global flags,
//! and metadata.
//!
//! Host `n` has address `10.0.0.n` and hangs off port `n`. Table 0 is
//! stateless; table 1 is stateful with `ipv4_src` as both its lookup
//! and update key.
//!
//! ```text
//! TABLE 0
//! eth_type=arp                        -> output(flood)
//! ipv4_src=10.0.0.1, in_port=1        -> set_state(0xfffffffa, table 1),
//!                                        set_flag("1*01"),
//!                                        write_metadata(64954), goto(1)
//! ipv4_src=10.0.0.2, in_port=2        -> output(1)
//! ipv4_src=10.0.0.3, in_port=3        -> goto(1)
//! ipv4_src=10.0.0.4, in_port=4        -> output(3)
//! ipv4_src=10.0.0.5, in_port=5        -> set_state(3 in section 1 of 4,
//!                                        table 1), goto(1)
//! ipv4_src=10.0.0.6, in_port=6        -> output(5)
//!
//! TABLE 1
//! ipv4_src=10.0.0.1, metadata=64954,
//!   flags="1*01", state=0xfffffffa    -> output(2)
//! ipv4_src=10.0.0.3, state=2          -> output(4)
//! ipv4_src=10.0.0.5,
//!   state=3 in section 1 of 4         -> output(6)
//! ```
//!
//! The controller timeline: h5's entry gets section 4 set at 0s and
//! section 3 at 5s; h3's entry is set to 2 at 5s, deleted at 10s and
//! set again at 15s. So h1/h2 and h5/h6 always reach each other, while
//! h3 reaches h4 only in `[5, 10)` and from 15s on.

use super::*;
use crate::scenario::Scenario;

/// The stateful table.
pub const STATE_TABLE: u8 = 1;

/// `OFPP_FLOOD`.
pub const OFPP_FLOOD: u32 = 0xFFFF_FFFB;

/// The metadata h1's packets carry into the stateful table.
pub const H1_METADATA: u64 = 64954;

/// The state h1's packets write.
pub const H1_STATE: u32 = 0xFFFF_FFFA;

/// The flag pattern h1's packets set and match.
pub fn h1_flags() -> Masked32 {
    masked_flags("1*01", 8).unwrap()
}

fn from_host(n: u8) -> Vec<Predicate> {
    let ip = host_ip(n).to_string();
    vec![
        Predicate::field(Field::EthType, "0x0800").unwrap(),
        Predicate::field(Field::Ipv4Src, &ip).unwrap(),
        Predicate::field(Field::InPort, &n.to_string()).unwrap(),
    ]
}

fn rule(preds: Vec<Predicate>, ins: Instructions) -> Rule<Finalized> {
    let mut r = Rule::new(32768, ins);
    r.add_predicates(preds);
    r.finalize()
}

/// Build the reference pipeline.
pub fn pipeline() -> PipelineBuilder {
    let whole = |state| pack_substate(state, 1, 1).unwrap();
    let h5_state = pack_substate(3, 1, 4).unwrap();
    let mut pb = PipelineBuilder::new();

    let mut arp = Rule::new(
        32760,
        Instructions::apply(vec![Action::Output(OFPP_FLOOD)]),
    );
    arp.add_predicate(Predicate::field(Field::EthType, "0x0806").unwrap());
    pb.add_rule(0, arp.finalize());

    let h1 = Instructions::apply(vec![
        Action::SetState {
            state: whole(H1_STATE),
            table_id: Some(STATE_TABLE),
        },
        Action::SetFlag(h1_flags()),
    ])
    .write_metadata(Masked64::exact(H1_METADATA))
    .goto(STATE_TABLE);
    pb.add_rule(0, rule(from_host(1), h1));

    let fwd = |port| Instructions::apply(vec![Action::Output(port)]);
    pb.add_rule(0, rule(from_host(2), fwd(1)));
    let h3 = Instructions::default().goto(STATE_TABLE);
    pb.add_rule(0, rule(from_host(3), h3));
    pb.add_rule(0, rule(from_host(4), fwd(3)));
    pb.add_rule(0, rule(from_host(6), fwd(5)));

    let h5 = Instructions::apply(vec![Action::SetState {
        state: h5_state,
        table_id: Some(STATE_TABLE),
    }])
    .goto(STATE_TABLE);
    pb.add_rule(0, rule(from_host(5), h5));

    let mut preds = from_host(1);
    preds.push(Predicate::Metadata(Masked64::exact(H1_METADATA)));
    preds.push(Predicate::State(whole(H1_STATE)));
    preds.push(Predicate::Flags(h1_flags()));
    pb.add_rule(STATE_TABLE, rule(preds, fwd(2)));

    let mut preds = from_host(3);
    preds.push(Predicate::State(whole(2)));
    pb.add_rule(STATE_TABLE, rule(preds, fwd(4)));

    let mut preds = from_host(5);
    preds.push(Predicate::State(h5_state));
    pb.add_rule(STATE_TABLE, rule(preds, fwd(6)));

    pb
}

/// Configure the stateful table and install the pipeline.
pub fn setup(dp: &Datapath) {
    ctl_ok(dp, MsgBody::ConfigureStatefulTable {
        table_id: STATE_TABLE,
        stateful: true,
    });
    for role in [KeyRole::Lookup, KeyRole::Update] {
        ctl_ok(dp, MsgBody::SetKeyExtractor {
            role,
            table_id: STATE_TABLE,
            fields: vec![Field::Ipv4Src],
        });
    }
    dp.install_pipeline(pipeline()).unwrap();
}

/// The controller's timed state modifications.
pub fn scenario<'a>() -> Scenario<'a> {
    let h3 = host_ip(3).octets();
    let h5 = host_ip(5).octets();
    let mut sc = Scenario::new();

    sc.at(0, move |dp| {
        let st = pack_substate(2, 4, 4).unwrap();
        ctl_ok(dp, set_flow_state(STATE_TABLE, &h5, st));
    })
    .at(5, move |dp| {
        let st = pack_substate(6, 3, 4).unwrap();
        ctl_ok(dp, set_flow_state(STATE_TABLE, &h5, st));
    })
    .at(5, move |dp| {
        let st = pack_substate(2, 1, 1).unwrap();
        ctl_ok(dp, set_flow_state(STATE_TABLE, &h3, st));
    })
    .at(10, move |dp| ctl_ok(dp, del_flow_state(STATE_TABLE, &h3)))
    .at(15, move |dp| {
        let st = pack_substate(2, 1, 1).unwrap();
        ctl_ok(dp, set_flow_state(STATE_TABLE, &h3, st));
    });

    sc
}
