// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod ffsm;
pub mod scenario;

// Let's make our lives easier and pub use a bunch of stuff.
pub use openstate::api::Field;
pub use openstate::api::KeyRole;
pub use openstate::api::Masked32;
pub use openstate::api::Masked64;
pub use openstate::api::StateStatsFilter;
pub use openstate::api::TableSel;
pub use openstate::api::masked_flags;
pub use openstate::api::pack_substate;
pub use openstate::engine::Datapath;
pub use openstate::engine::PacketMeta;
pub use openstate::engine::PipelineBuilder;
pub use openstate::engine::ProcessResult;
pub use openstate::engine::ProcessResult::*;
pub use openstate::engine::packet::ETHER_TYPE_ARP;
pub use openstate::engine::packet::ETHER_TYPE_IPV4;
pub use openstate::engine::packet::EtherMeta;
pub use openstate::engine::packet::Ipv4Meta;
pub use openstate::engine::pipeline::DropReason;
pub use openstate::engine::predicate::Predicate;
pub use openstate::engine::rule::Action;
pub use openstate::engine::rule::Finalized;
pub use openstate::engine::rule::Instructions;
pub use openstate::engine::rule::Rule;
pub use openstate::provider::PrintlnLog;
pub use openstate::provider::Providers;
pub use openstate::wire::Message;
pub use openstate::wire::MsgBody;
pub use openstate::wire::StateMod;
pub use openstate::wire::StateModCmd;
pub use std::net::Ipv4Addr;

/// ICMP, the protocol of every ping in the test scenarios.
pub const IP_PROTO_ICMP: u8 = 1;

/// The MAC address given to host `n`.
pub fn host_mac(n: u8) -> [u8; 6] {
    [0x00, 0x00, 0x00, 0x00, 0x00, n]
}

/// The IPv4 address given to host `n`.
pub fn host_ip(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, n)
}

/// An ICMP packet from host `src` to host `dst`, arriving on the
/// port host `src` hangs off.
pub fn ping(src: u8, dst: u8) -> PacketMeta {
    PacketMeta {
        in_port: u32::from(src),
        ether: EtherMeta {
            dst: host_mac(dst),
            src: host_mac(src),
            ether_type: ETHER_TYPE_IPV4,
        },
        ip: Some(Ipv4Meta {
            src: host_ip(src),
            dst: host_ip(dst),
            proto: IP_PROTO_ICMP,
        }),
        ..Default::default()
    }
}

/// A broadcast ARP request from host `src`.
pub fn arp_request(src: u8) -> PacketMeta {
    PacketMeta {
        in_port: u32::from(src),
        ether: EtherMeta {
            dst: [0xFF; 6],
            src: host_mac(src),
            ether_type: ETHER_TYPE_ARP,
        },
        ..Default::default()
    }
}

/// A datapath with `n_tables` tables that logs to stdout.
pub fn datapath(n_tables: u8) -> Datapath {
    Datapath::new(1, n_tables, Providers::new(Box::new(PrintlnLog)))
}

/// Send one control message to `dp` and decode its replies.
pub fn ctl(dp: &Datapath, xid: u32, body: MsgBody) -> Vec<Message> {
    let req = Message::new(xid, body).encode().unwrap();
    dp.handle_ctl(&req)
        .iter()
        .map(|buf| Message::decode(buf).unwrap())
        .collect()
}

/// Send a control command that must succeed without a reply.
#[track_caller]
pub fn ctl_ok(dp: &Datapath, body: MsgBody) {
    let replies = ctl(dp, 0, body);
    assert!(replies.is_empty(), "command failed: {replies:?}");
}

/// Build the `SET_FLOW_STATE` command writing `state` to `key`.
pub fn set_flow_state(table_id: u8, key: &[u8], state: Masked32) -> MsgBody {
    MsgBody::StateMod(StateMod {
        cmd: StateModCmd::SetFlowState,
        table_id,
        key: key.to_vec(),
        state,
    })
}

/// Build the `DEL_FLOW_STATE` command for `key`.
pub fn del_flow_state(table_id: u8, key: &[u8]) -> MsgBody {
    MsgBody::StateMod(StateMod {
        cmd: StateModCmd::DelFlowState,
        table_id,
        key: key.to_vec(),
        state: Masked32::default(),
    })
}

/// Assert that `pkt` is forwarded out of exactly `port`.
#[track_caller]
pub fn expect_output(dp: &Datapath, mut pkt: PacketMeta, port: u32) {
    let res = dp.process(&mut pkt);
    assert_eq!(res, Output(vec![port]), "packet {pkt}");
}

/// Assert that `pkt` is dropped.
#[track_caller]
pub fn expect_drop(dp: &Datapath, mut pkt: PacketMeta) {
    let res = dp.process(&mut pkt);
    assert!(matches!(res, Drop { .. }), "packet {pkt}: {res:?}");
}
