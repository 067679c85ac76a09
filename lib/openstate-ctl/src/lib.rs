// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A controller-side handle to an OpenState datapath.
//!
//! Messages are framed by the OpenFlow header's length field over any
//! reliable, ordered byte stream. Several requests may be outstanding
//! at once: [`OpenStateHdl::send`] returns the xid of each, and
//! [`OpenStateHdl::wait`] collects the replies of one xid, parking
//! replies for other xids until they are asked for.
//!
//! The datapath answers requests in the order it receives them and
//! sends nothing for a control command that succeeds. A command is
//! therefore known to have succeeded once a reply to anything sent
//! after it arrives. When nothing later is in flight, waiting on a
//! command sends a global state stats request as a barrier.

use openstate::api::DumpGlobalStateResp;
use openstate::api::DumpStateResp;
use openstate::api::ExpErrCode;
use openstate::api::Field;
use openstate::api::KeyRole;
use openstate::api::Masked32;
pub use openstate::api::OpenStateError;
use openstate::api::StateStatsFilter;
use openstate::wire::Message;
use openstate::wire::MsgBody;
use openstate::wire::MultipartFlags;
use openstate::wire::OFP_HEADER_LEN;
use openstate::wire::StateMod;
use openstate::wire::StateModCmd;
use openstate::wire::peek_len;
use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use thiserror::Error;

/// The default OpenFlow controller port.
pub const DEFAULT_PORT: u16 = 6653;

/// Errors related to talking to an OpenState datapath.
#[derive(Debug, Error)]
pub enum Error {
    #[error("error on control channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] OpenStateError),

    #[error("the datapath closed the control channel")]
    Closed,

    #[error("xid {0} is not outstanding")]
    UnknownXid(u32),

    /// The datapath rejected the request.
    #[error("request {xid} failed: {code:?}")]
    Remote { xid: u32, code: ExpErrCode },

    #[error("unexpected reply to xid {xid}: {body}")]
    UnexpectedReply { xid: u32, body: String },
}

/// Read one OpenFlow message from `r`.
///
/// Returns `Ok(None)` when the stream ends cleanly on a message
/// boundary.
pub fn read_frame(r: &mut impl Read) -> Result<Option<Vec<u8>>, Error> {
    let mut buf = vec![0u8; OFP_HEADER_LEN];
    let mut got = 0;
    while got < OFP_HEADER_LEN {
        match r.read(&mut buf[got..])? {
            0 if got == 0 => return Ok(None),
            0 => return Err(Error::Closed),
            n => got += n,
        }
    }

    // peek_len() only returns None for a short header.
    let len = peek_len(&buf)?.unwrap_or(OFP_HEADER_LEN);
    buf.resize(len, 0);
    r.read_exact(&mut buf[OFP_HEADER_LEN..])?;
    Ok(Some(buf))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReqKind {
    /// Answered only on failure.
    Command,
    /// Always answered.
    Request,
}

/// An outstanding transaction.
#[derive(Debug)]
struct Pending {
    kind: ReqKind,
    /// Position in send order.
    seq: u64,
    replies: Vec<MsgBody>,
    done: bool,
}

/// The handle used to send control messages to a datapath.
#[derive(Debug)]
pub struct OpenStateHdl<S = TcpStream> {
    stream: S,
    next_xid: u32,
    next_seq: u64,
    pending: BTreeMap<u32, Pending>,
}

impl OpenStateHdl<TcpStream> {
    /// Connect to the datapath listening on `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> OpenStateHdl<S> {
    /// Create a handle over an already established stream.
    pub fn new(stream: S) -> Self {
        Self { stream, next_xid: 1, next_seq: 0, pending: BTreeMap::new() }
    }

    fn alloc_xid(&mut self) -> u32 {
        loop {
            let xid = self.next_xid;
            self.next_xid = self.next_xid.wrapping_add(1).max(1);
            if !self.pending.contains_key(&xid) {
                return xid;
            }
        }
    }

    /// The number of transactions sent but not yet waited on.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Send `body` without waiting for its outcome and return its
    /// xid. Every xid returned must eventually be passed to
    /// [`Self::wait`].
    pub fn send(&mut self, body: MsgBody) -> Result<u32, Error> {
        let kind = match body {
            MsgBody::StateStatsRequest(_)
            | MsgBody::GlobalStateStatsRequest => ReqKind::Request,
            _ => ReqKind::Command,
        };

        let xid = self.alloc_xid();
        let buf = Message::new(xid, body).encode()?;
        self.stream.write_all(&buf)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(xid, Pending {
            kind,
            seq,
            replies: vec![],
            done: false,
        });
        Ok(xid)
    }

    /// Read one reply and file it under its xid.
    fn recv(&mut self) -> Result<(), Error> {
        let buf = read_frame(&mut self.stream)?.ok_or(Error::Closed)?;
        let msg = Message::decode(&buf)?;

        let done = match &msg.body {
            MsgBody::StateStatsReply { flags, .. } => {
                !flags.contains(MultipartFlags::REPLY_MORE)
            }
            MsgBody::GlobalStateStatsReply { .. } | MsgBody::Error { .. } => {
                true
            }
            body => {
                return Err(Error::UnexpectedReply {
                    xid: msg.xid,
                    body: format!("{body:?}"),
                });
            }
        };

        let Some(p) = self.pending.get_mut(&msg.xid) else {
            return Err(Error::UnexpectedReply {
                xid: msg.xid,
                body: format!("{:?}", msg.body),
            });
        };
        p.replies.push(msg.body);
        p.done |= done;

        // Everything sent before this request has been processed.
        let seq = p.seq;
        for p in self.pending.values_mut() {
            if p.kind == ReqKind::Command && p.seq < seq {
                p.done = true;
            }
        }

        Ok(())
    }

    fn recv_until_done(&mut self, xid: u32) -> Result<(), Error> {
        loop {
            match self.pending.get(&xid) {
                None => return Err(Error::UnknownXid(xid)),
                Some(p) if p.done => return Ok(()),
                Some(_) => self.recv()?,
            }
        }
    }

    /// Wait until the datapath has processed everything sent so far.
    pub fn barrier(&mut self) -> Result<(), Error> {
        let xid = self.send(MsgBody::GlobalStateStatsRequest)?;
        self.wait(xid).map(|_| ())
    }

    /// Wait for the outcome of `xid` and return its replies, which are
    /// empty for a successful command.
    pub fn wait(&mut self, xid: u32) -> Result<Vec<MsgBody>, Error> {
        let p = self.pending.get(&xid).ok_or(Error::UnknownXid(xid))?;
        let needs_barrier = p.kind == ReqKind::Command
            && !p.done
            && !self
                .pending
                .values()
                .any(|q| q.kind == ReqKind::Request && q.seq > p.seq);
        if needs_barrier {
            self.barrier()?;
        }

        self.recv_until_done(xid)?;
        let p = self.pending.remove(&xid).ok_or(Error::UnknownXid(xid))?;
        let failed = p.replies.iter().find_map(|body| match body {
            MsgBody::Error { code, .. } => Some(*code),
            _ => None,
        });
        match failed {
            Some(code) => Err(Error::Remote { xid, code }),
            None => Ok(p.replies),
        }
    }

    fn run_cmd(&mut self, body: MsgBody) -> Result<(), Error> {
        let xid = self.send(body)?;
        self.wait(xid).map(|_| ())
    }

    /// Mark a table stateful or stateless. Making a table stateless
    /// discards its state entries.
    pub fn configure_table(
        &mut self,
        table_id: u8,
        stateful: bool,
    ) -> Result<(), Error> {
        self.run_cmd(MsgBody::ConfigureStatefulTable { table_id, stateful })
    }

    /// Set the lookup or update extractor of a stateful table.
    pub fn set_extractor(
        &mut self,
        table_id: u8,
        role: KeyRole,
        fields: Vec<Field>,
    ) -> Result<(), Error> {
        self.run_cmd(MsgBody::SetKeyExtractor { role, table_id, fields })
    }

    /// Send a masked write to the state of `key`.
    pub fn send_set_state(
        &mut self,
        table_id: u8,
        key: Vec<u8>,
        state: Masked32,
    ) -> Result<u32, Error> {
        self.send(MsgBody::StateMod(StateMod {
            cmd: StateModCmd::SetFlowState,
            table_id,
            key,
            state,
        }))
    }

    /// Apply a masked write to the state of `key`.
    pub fn set_state(
        &mut self,
        table_id: u8,
        key: Vec<u8>,
        state: Masked32,
    ) -> Result<(), Error> {
        let xid = self.send_set_state(table_id, key, state)?;
        self.wait(xid).map(|_| ())
    }

    /// Delete the state entry of `key`, if there is one.
    pub fn del_state(
        &mut self,
        table_id: u8,
        key: Vec<u8>,
    ) -> Result<(), Error> {
        self.run_cmd(MsgBody::StateMod(StateMod {
            cmd: StateModCmd::DelFlowState,
            table_id,
            key,
            state: Masked32::default(),
        }))
    }

    /// Apply a masked write to the global flags.
    pub fn set_global_state(&mut self, flags: Masked32) -> Result<(), Error> {
        self.run_cmd(MsgBody::SetGlobalState(flags))
    }

    /// Clear every global flag.
    pub fn reset_global_state(&mut self) -> Result<(), Error> {
        self.run_cmd(MsgBody::ResetGlobalState)
    }

    /// Send a state stats request; collect it with
    /// [`Self::wait_dump_state`].
    pub fn send_dump_state(
        &mut self,
        filter: StateStatsFilter,
    ) -> Result<u32, Error> {
        self.send(MsgBody::StateStatsRequest(filter))
    }

    /// Wait for the state stats request `xid`, reassembling a reply
    /// that spans several messages.
    pub fn wait_dump_state(
        &mut self,
        xid: u32,
    ) -> Result<DumpStateResp, Error> {
        let mut resp = DumpStateResp::default();
        for body in self.wait(xid)? {
            match body {
                MsgBody::StateStatsReply { entries, .. } => {
                    resp.entries.extend(entries);
                }

                body => {
                    return Err(Error::UnexpectedReply {
                        xid,
                        body: format!("{body:?}"),
                    });
                }
            }
        }
        Ok(resp)
    }

    /// Dump the state entries selected by `filter`.
    pub fn dump_state(
        &mut self,
        filter: StateStatsFilter,
    ) -> Result<DumpStateResp, Error> {
        let xid = self.send_dump_state(filter)?;
        self.wait_dump_state(xid)
    }

    /// Read the global flags.
    pub fn dump_global_state(&mut self) -> Result<DumpGlobalStateResp, Error> {
        let xid = self.send(MsgBody::GlobalStateStatsRequest)?;
        match self.wait(xid)?.pop() {
            Some(MsgBody::GlobalStateStatsReply { flags }) => {
                Ok(DumpGlobalStateResp { flags })
            }

            body => {
                Err(Error::UnexpectedReply { xid, body: format!("{body:?}") })
            }
        }
    }
}
