// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Workloads shared by the engine benchmarks.

use openstate_test_utils::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// The seed every workload is generated from, so runs compare.
pub const SEED: u64 = 0x0BE5_7A7E;

/// `n` random source hosts in 10.0.0.0/8, as packets towards h1.
pub fn random_pings(n: usize) -> Vec<PacketMeta> {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..n)
        .map(|_| {
            let mut pkt = ping(2, 1);
            let [_, b, c, d] = rng.random::<[u8; 4]>();
            if let Some(ip) = pkt.ip.as_mut() {
                ip.src = Ipv4Addr::new(10, b, c, d);
            }
            pkt
        })
        .collect()
}

/// A datapath whose table 1 is stateful on `ipv4_src`, holding state
/// for every packet in `pkts`, behind a table 0 that counts each
/// packet in section 1 and forwards on state.
pub fn counting_datapath(pkts: &[PacketMeta]) -> Datapath {
    let dp = datapath(2);
    ctl_ok(&dp, MsgBody::ConfigureStatefulTable {
        table_id: 1,
        stateful: true,
    });
    for role in [KeyRole::Lookup, KeyRole::Update] {
        ctl_ok(&dp, MsgBody::SetKeyExtractor {
            role,
            table_id: 1,
            fields: vec![Field::Ipv4Src],
        });
    }

    let mut pb = PipelineBuilder::new();
    let t0 = Instructions::apply(vec![Action::SetState {
        state: pack_substate(1, 1, 4).unwrap_or_default(),
        table_id: Some(1),
    }])
    .goto(1);
    pb.add_rule(0, Rule::match_any(0, t0));

    let mut hit = Rule::new(1, Instructions::apply(vec![Action::Output(1)]));
    hit.add_predicate(Predicate::State(Masked32::new(1, 0xFF)));
    pb.add_rule(1, hit.finalize());
    pb.add_rule(1, Rule::match_any(0, Instructions::default()));
    let _ = dp.install_pipeline(pb);

    let mut rng = StdRng::seed_from_u64(SEED + 1);
    for pkt in pkts {
        let _ = dp.states().apply_state(
            1,
            pkt,
            Masked32::exact(rng.random_range(0..16)),
        );
    }

    dp
}
