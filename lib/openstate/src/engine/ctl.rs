// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The control message dispatcher.
//!
//! Control messages are handled one at a time per datapath. A request
//! either succeeds as a whole or is answered with a single `Error`
//! reply and changes nothing. Requests that succeed without data to
//! return produce no reply at all.

use super::datapath::Datapath;
use crate::api::OpenStateError;
use crate::api::StateEntryDump;
use crate::api::TableSel;
use crate::provider::LogLevel;
use crate::wire::MAX_MSG_LEN;
use crate::wire::Message;
use crate::wire::MsgBody;
use crate::wire::MultipartFlags;
use crate::wire::STATE_STATS_REPLY_OVERHEAD;
use crate::wire::StateModCmd;
use crate::wire::error_reply;
use crate::wire::state_entry_len;

/// Dispatch a decoded request, returning the replies in the order
/// they must be sent.
pub fn dispatch(
    dp: &Datapath,
    msg: Message,
) -> Result<Vec<Message>, OpenStateError> {
    let xid = msg.xid;
    let msg_type = msg.msg_type();
    let states = dp.states();

    let replies = match msg.body {
        MsgBody::ConfigureStatefulTable { table_id, stateful } => {
            states.configure(table_id, stateful)?;
            vec![]
        }

        MsgBody::SetKeyExtractor { role, table_id, fields } => {
            states.set_extractor(table_id, role, fields)?;
            vec![]
        }

        MsgBody::StateMod(sm) => {
            match sm.cmd {
                StateModCmd::SetFlowState => {
                    states.apply_state_key(sm.table_id, &sm.key, sm.state)?;
                }

                StateModCmd::DelFlowState => {
                    states.delete(sm.table_id, &sm.key)?;
                }
            }
            vec![]
        }

        MsgBody::SetGlobalState(flags) => {
            dp.global().write(flags);
            vec![]
        }

        MsgBody::ResetGlobalState => {
            dp.global().reset();
            vec![]
        }

        MsgBody::StateStatsRequest(filter) => {
            if let TableSel::One(id) = filter.table {
                if states.get(id).is_none() {
                    return Err(OpenStateError::InvalidTableId(id));
                }
            }

            let entries = states.export(&filter);
            state_stats_replies(xid, entries, MAX_MSG_LEN)
        }

        MsgBody::GlobalStateStatsRequest => {
            let flags = dp.global().read();
            vec![Message::new(xid, MsgBody::GlobalStateStatsReply { flags })]
        }

        MsgBody::StateStatsReply { .. }
        | MsgBody::GlobalStateStatsReply { .. }
        | MsgBody::Error { .. } => {
            return Err(OpenStateError::UnexpectedMsgType(msg_type));
        }
    };

    Ok(replies)
}

/// Split a state stats export over as many replies as it takes to
/// keep each under `max_len` bytes. Every reply but the last is
/// flagged `REPLY_MORE`; an empty export is a single empty reply.
pub fn state_stats_replies(
    xid: u32,
    entries: Vec<StateEntryDump>,
    max_len: usize,
) -> Vec<Message> {
    let budget = max_len.saturating_sub(STATE_STATS_REPLY_OVERHEAD);
    let mut bodies: Vec<Vec<StateEntryDump>> = vec![vec![]];
    let mut used = 0;

    for e in entries {
        let len = state_entry_len(&e);
        let cur_empty = bodies.last().is_none_or(Vec::is_empty);
        if used + len > budget && !cur_empty {
            bodies.push(vec![]);
            used = 0;
        }

        used += len;
        if let Some(cur) = bodies.last_mut() {
            cur.push(e);
        }
    }

    let last = bodies.len() - 1;
    bodies
        .into_iter()
        .enumerate()
        .map(|(i, entries)| {
            let flags = if i < last {
                MultipartFlags::REPLY_MORE
            } else {
                MultipartFlags::empty()
            };
            Message::new(xid, MsgBody::StateStatsReply { flags, entries })
        })
        .collect()
}

impl Datapath {
    /// Handle one encoded control message, returning the encoded
    /// replies.
    pub fn handle_ctl(&self, buf: &[u8]) -> Vec<Vec<u8>> {
        let _guard = self.ctl_lock.lock();
        self.stats().ctl_msg.incr();

        let res = Message::decode(buf).and_then(|msg| {
            self.log(LogLevel::Debug, &format!("ctl: {:?}", msg.body));
            dispatch(self, msg)?
                .iter()
                .map(Message::encode)
                .collect::<Result<Vec<_>, _>>()
        });

        match res {
            Ok(replies) => replies,
            Err(e) => {
                self.stats().ctl_err.incr();
                self.log(LogLevel::Warn, &format!("ctl request failed: {e}"));
                // An error reply is at most the header plus 64 bytes
                // of request, so it always encodes.
                error_reply(buf, &e).encode().into_iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ExpErrCode;
    use crate::api::Field;
    use crate::api::KeyRole;
    use crate::api::Masked32;
    use crate::api::StateStatsFilter;
    use crate::provider::PrintlnLog;
    use crate::provider::Providers;
    use crate::wire::StateMod;

    fn dp() -> Datapath {
        Datapath::new(1, 4, Providers::new(Box::new(PrintlnLog)))
    }

    fn send(dp: &Datapath, xid: u32, body: MsgBody) -> Vec<Message> {
        let req = Message::new(xid, body).encode().unwrap();
        dp.handle_ctl(&req)
            .iter()
            .map(|b| Message::decode(b).unwrap())
            .collect()
    }

    fn set_state(table_id: u8, key: &[u8], state: u32) -> MsgBody {
        MsgBody::StateMod(StateMod {
            cmd: StateModCmd::SetFlowState,
            table_id,
            key: key.to_vec(),
            state: Masked32::exact(state),
        })
    }

    fn configure_src_table(dp: &Datapath, table_id: u8) {
        let cfg = MsgBody::ConfigureStatefulTable { table_id, stateful: true };
        assert!(send(dp, 1, cfg).is_empty());
        for role in [KeyRole::Lookup, KeyRole::Update] {
            let body = MsgBody::SetKeyExtractor {
                role,
                table_id,
                fields: vec![Field::Ipv4Src],
            };
            assert!(send(dp, 2, body).is_empty());
        }
    }

    #[test]
    fn config_errors_are_reported() {
        let dp = dp();
        let body = MsgBody::SetKeyExtractor {
            role: KeyRole::Lookup,
            table_id: 1,
            fields: vec![Field::Ipv4Src],
        };
        let replies = send(&dp, 77, body);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].xid, 77);
        assert!(matches!(
            replies[0].body,
            MsgBody::Error { code: ExpErrCode::NotStateful, .. }
        ));

        let replies = send(&dp, 78, set_state(9, &[10, 0, 0, 1], 1));
        assert!(matches!(
            replies[0].body,
            MsgBody::Error { code: ExpErrCode::BadTableId, .. }
        ));

        let snap = dp.stats().snapshot();
        assert_eq!((snap.ctl_msg, snap.ctl_err), (2, 2));
    }

    #[test]
    fn key_arity_mismatch_rejected() {
        let dp = dp();
        configure_src_table(&dp, 1);
        let replies = send(&dp, 5, set_state(1, &[10, 0, 0, 1, 0, 80], 1));
        assert!(matches!(
            replies[0].body,
            MsgBody::Error { code: ExpErrCode::BadKeyLen, .. }
        ));
        assert_eq!(dp.states().get(1).unwrap().len(), 0);
    }

    #[test]
    fn malformed_request_gets_error() {
        let dp = dp();
        let mut req = Message::new(3, MsgBody::ResetGlobalState)
            .encode()
            .unwrap();
        req[16] = 99;

        let replies: Vec<Message> = dp
            .handle_ctl(&req)
            .iter()
            .map(|b| Message::decode(b).unwrap())
            .collect();
        assert_eq!(
            replies,
            vec![Message::new(
                3,
                MsgBody::Error { code: ExpErrCode::BadCommand, data: req }
            )]
        );
    }

    #[test]
    fn replies_are_rejected_as_requests() {
        let dp = dp();
        let replies =
            send(&dp, 4, MsgBody::GlobalStateStatsReply { flags: 1 });
        assert!(matches!(
            replies[0].body,
            MsgBody::Error { code: ExpErrCode::BadExpType, .. }
        ));
    }

    #[test]
    fn state_mod_and_stats() {
        let dp = dp();
        configure_src_table(&dp, 1);
        assert!(send(&dp, 3, set_state(1, &[10, 0, 0, 2], 2)).is_empty());
        assert!(send(&dp, 4, set_state(1, &[10, 0, 0, 1], 1)).is_empty());

        let req = MsgBody::StateStatsRequest(StateStatsFilter::default());
        let replies = send(&dp, 9, req);
        assert_eq!(replies.len(), 1);
        let MsgBody::StateStatsReply { flags, entries } = &replies[0].body
        else {
            panic!("unexpected reply: {:?}", replies[0]);
        };
        assert!(flags.is_empty());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, vec![10, 0, 0, 1]);
        assert_eq!(entries[1].state, 2);

        let del = MsgBody::StateMod(StateMod {
            cmd: StateModCmd::DelFlowState,
            table_id: 1,
            key: vec![10, 0, 0, 1],
            state: Masked32::default(),
        });
        assert!(send(&dp, 10, del.clone()).is_empty());
        assert!(send(&dp, 11, del).is_empty());
        assert_eq!(dp.states().get(1).unwrap().len(), 1);

        let req = MsgBody::StateStatsRequest(StateStatsFilter::table(
            TableSel::One(9),
        ));
        assert!(matches!(
            send(&dp, 12, req)[0].body,
            MsgBody::Error { code: ExpErrCode::BadTableId, .. }
        ));
    }

    #[test]
    fn global_state_commands() {
        let dp = dp();
        let set = MsgBody::SetGlobalState(Masked32::new(0x90, 0xB0));
        assert!(send(&dp, 1, set).is_empty());
        assert_eq!(
            send(&dp, 2, MsgBody::GlobalStateStatsRequest),
            vec![Message::new(
                2,
                MsgBody::GlobalStateStatsReply { flags: 0x90 }
            )]
        );

        assert!(send(&dp, 3, MsgBody::ResetGlobalState).is_empty());
        assert_eq!(dp.global().read(), 0);
    }

    #[test]
    fn large_exports_are_split() {
        let entries: Vec<StateEntryDump> = (0..100u32)
            .map(|i| StateEntryDump {
                table_id: 1,
                fields: vec![Field::Ipv4Src],
                key: i.to_be_bytes().to_vec(),
                state: i,
            })
            .collect();

        // Each entry takes 24 bytes; allow 10 per reply.
        let max = STATE_STATS_REPLY_OVERHEAD + 240;
        let replies = state_stats_replies(7, entries.clone(), max);
        assert_eq!(replies.len(), 10);

        let mut got = vec![];
        for (i, r) in replies.iter().enumerate() {
            assert_eq!(r.xid, 7);
            assert!(r.encode().unwrap().len() <= max);
            let MsgBody::StateStatsReply { flags, entries } = &r.body else {
                panic!("unexpected reply: {r:?}");
            };
            assert_eq!(flags.contains(MultipartFlags::REPLY_MORE), i < 9);
            got.extend(entries.iter().cloned());
        }
        assert_eq!(got, entries);

        let empty = state_stats_replies(8, vec![], max);
        assert_eq!(
            empty,
            vec![Message::new(
                8,
                MsgBody::StateStatsReply {
                    flags: MultipartFlags::empty(),
                    entries: vec![],
                }
            )]
        );
    }
}
