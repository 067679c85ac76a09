// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The OpenState experimenter messages.
//!
//! Every control message exchanged between a controller and a
//! datapath is a [`Message`]: a transaction id plus one [`MsgBody`]
//! variant. [`Message::encode`] produces exactly one OpenFlow message
//! and [`Message::decode`] accepts exactly one; anything truncated,
//! unknown, or with length fields that do not add up is rejected as a
//! whole. A message that `encode` accepts always decodes back to
//! itself; anything the wire cannot carry faithfully is refused at
//! encode time instead of being altered.

pub mod hdr;

use crate::api::ExpErrCode;
use crate::api::Field;
use crate::api::FieldMatch;
use crate::api::KeyRole;
use crate::api::MAX_EXTRACTOR_FIELDS;
use crate::api::MAX_KEY_LEN;
use crate::api::Masked32;
use crate::api::OFPTT_ALL;
use crate::api::OFP_VERSION;
use crate::api::OPENSTATE_EXPERIMENTER_ID;
use crate::api::OpenStateError;
use crate::api::StateEntryDump;
use crate::api::StateStatsFilter;
use crate::api::TableSel;
use bitflags::bitflags;
use hdr::*;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

/// The size of the common OpenFlow header.
pub const OFP_HEADER_LEN: usize = size_of::<OfpHeader>();

/// The largest message the 16-bit length field can describe.
pub const MAX_MSG_LEN: usize = u16::MAX as usize;

/// The bytes a state stats reply spends before its first entry.
pub const STATE_STATS_REPLY_OVERHEAD: usize =
    OFP_HEADER_LEN + size_of::<MultipartHdr>();

bitflags! {
    /// Flags of a multipart message.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct MultipartFlags: u16 {
        /// More replies follow for the same request.
        const REPLY_MORE = 1 << 0;
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StateModCmd {
    SetFlowState,
    DelFlowState,
}

/// Write or delete the state of a single flow.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateMod {
    pub cmd: StateModCmd,
    pub table_id: u8,
    /// The flow key: the update extractor's field values in network
    /// byte order.
    pub key: Vec<u8>,
    /// The masked write to apply. Ignored for deletions.
    pub state: Masked32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MsgBody {
    ConfigureStatefulTable { table_id: u8, stateful: bool },
    SetKeyExtractor { role: KeyRole, table_id: u8, fields: Vec<Field> },
    StateMod(StateMod),
    SetGlobalState(Masked32),
    ResetGlobalState,
    StateStatsRequest(StateStatsFilter),
    StateStatsReply { flags: MultipartFlags, entries: Vec<StateEntryDump> },
    GlobalStateStatsRequest,
    GlobalStateStatsReply { flags: u32 },
    Error { code: ExpErrCode, data: Vec<u8> },
}

impl MsgBody {
    /// Is this a message a controller sends to a datapath?
    pub fn is_request(&self) -> bool {
        !matches!(
            self,
            Self::StateStatsReply { .. }
                | Self::GlobalStateStatsReply { .. }
                | Self::Error { .. }
        )
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Message {
    pub xid: u32,
    pub body: MsgBody,
}

/// The encoded length of a state stats reply entry, padding included.
pub fn state_entry_len(e: &StateEntryDump) -> usize {
    let raw = size_of::<StateEntryHdr>() + e.fields.len() * 4 + e.key.len();
    raw.next_multiple_of(8)
}

/// Read the total length of the message starting at `buf`, if enough
/// of the header has arrived to tell.
pub fn peek_len(buf: &[u8]) -> Result<Option<usize>, OpenStateError> {
    let Ok((hdr, _)) = OfpHeader::read_from_prefix(buf) else {
        return Ok(None);
    };

    if hdr.version != OFP_VERSION {
        return Err(OpenStateError::BadVersion(hdr.version));
    }

    let len = usize::from(hdr.length.get());
    if len < OFP_HEADER_LEN {
        return Err(OpenStateError::BadLength(format!(
            "message length {len} shorter than its header"
        )));
    }

    Ok(Some(len))
}

/// Read the transaction id of a message, without validating anything
/// past the header.
pub fn peek_xid(buf: &[u8]) -> Option<u32> {
    OfpHeader::read_from_prefix(buf).ok().map(|(hdr, _)| hdr.xid.get())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn read<T: FromBytes + KnownLayout + Immutable>(
        &mut self,
    ) -> Result<T, OpenStateError> {
        let (val, rest) = T::read_from_prefix(self.buf).map_err(|_| {
            OpenStateError::Truncated {
                needed: size_of::<T>(),
                have: self.buf.len(),
            }
        })?;
        self.buf = rest;
        Ok(val)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], OpenStateError> {
        if n > self.buf.len() {
            return Err(OpenStateError::Truncated {
                needed: n,
                have: self.buf.len(),
            });
        }

        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, OpenStateError> {
        Ok(self.read::<U32>()?.get())
    }

    fn fields(&mut self, count: usize) -> Result<Vec<Field>, OpenStateError> {
        (0..count).map(|_| Field::from_oxm_header(self.u32()?)).collect()
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Every body ends exactly at the end of the message.
    fn finish(self) -> Result<(), OpenStateError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(OpenStateError::BadLength(format!(
                "{} trailing bytes",
                self.buf.len()
            )))
        }
    }
}

fn push<T: IntoBytes + Immutable>(buf: &mut Vec<u8>, val: &T) {
    buf.extend_from_slice(val.as_bytes());
}

fn len_u32(len: usize) -> Result<U32, OpenStateError> {
    u32::try_from(len).map(U32::new).map_err(|_| OpenStateError::TooLarge(len))
}

fn len_u16(len: usize) -> Result<U16, OpenStateError> {
    u16::try_from(len).map(U16::new).map_err(|_| OpenStateError::TooLarge(len))
}

impl Message {
    pub fn new(xid: u32, body: MsgBody) -> Self {
        Self { xid, body }
    }

    /// Encode the message.
    ///
    /// # Errors
    ///
    /// * [`OpenStateError::TooLarge`] if the message would not fit the
    ///   16-bit length field, for a key longer than [`MAX_KEY_LEN`],
    ///   or for error data longer than [`ERROR_DATA_MAX`].
    ///
    /// * [`OpenStateError::ExtractorTooLong`] for an extractor of more
    ///   than [`MAX_EXTRACTOR_FIELDS`] fields.
    ///
    /// * [`OpenStateError::InvalidTableId`] for a stats request naming
    ///   table `OFPTT_ALL` as a single table.
    ///
    /// * [`OpenStateError::BadFieldValue`] for a stats filter value
    ///   whose length differs from its field's width.
    pub fn encode(&self) -> Result<Vec<u8>, OpenStateError> {
        let mut buf = Vec::with_capacity(64);
        push(&mut buf, &OfpHeader {
            version: OFP_VERSION,
            msg_type: self.msg_type(),
            length: U16::new(0),
            xid: U32::new(self.xid),
        });

        match &self.body {
            MsgBody::ConfigureStatefulTable { table_id, stateful } => {
                push_state_mod_hdr(&mut buf, OFPSC_STATEFUL_TABLE_CONFIG);
                push(&mut buf, &TableConfigBody {
                    table_id: *table_id,
                    stateful: u8::from(*stateful),
                    pad: [0; 6],
                });
            }

            MsgBody::SetKeyExtractor { role, table_id, fields } => {
                if fields.len() > MAX_EXTRACTOR_FIELDS {
                    return Err(OpenStateError::ExtractorTooLong(fields.len()));
                }

                let cmd = match role {
                    KeyRole::Lookup => OFPSC_EXP_SET_L_EXTRACTOR,
                    KeyRole::Update => OFPSC_EXP_SET_U_EXTRACTOR,
                };
                push_state_mod_hdr(&mut buf, cmd);
                push(&mut buf, &ExtractorBody {
                    table_id: *table_id,
                    pad: [0; 3],
                    field_count: len_u32(fields.len())?,
                });
                for f in fields {
                    push(&mut buf, &U32::new(f.oxm_header()));
                }
            }

            MsgBody::StateMod(sm) => {
                if sm.key.len() > MAX_KEY_LEN {
                    return Err(OpenStateError::TooLarge(sm.key.len()));
                }

                let cmd = match sm.cmd {
                    StateModCmd::SetFlowState => OFPSC_EXP_SET_FLOW_STATE,
                    StateModCmd::DelFlowState => OFPSC_EXP_DEL_FLOW_STATE,
                };
                push_state_mod_hdr(&mut buf, cmd);
                push(&mut buf, &FlowStateBody {
                    table_id: sm.table_id,
                    pad: [0; 3],
                    key_len: len_u32(sm.key.len())?,
                    state: U32::new(sm.state.value),
                    state_mask: U32::new(sm.state.mask),
                });
                buf.extend_from_slice(&sm.key);
            }

            MsgBody::SetGlobalState(flags) => {
                push_state_mod_hdr(&mut buf, OFPSC_EXP_SET_GLOBAL_STATE);
                push(&mut buf, &GlobalStateBody {
                    flags: U32::new(flags.value),
                    flags_mask: U32::new(flags.mask),
                });
            }

            MsgBody::ResetGlobalState => {
                push_state_mod_hdr(&mut buf, OFPSC_EXP_RESET_GLOBAL_STATE);
            }

            MsgBody::StateStatsRequest(filter) => {
                if filter.table == TableSel::One(OFPTT_ALL) {
                    return Err(OpenStateError::InvalidTableId(OFPTT_ALL));
                }

                if let Some(m) = filter
                    .matches
                    .iter()
                    .find(|m| m.value.len() != m.field.width())
                {
                    return Err(OpenStateError::BadFieldValue {
                        field: m.field,
                        value: format!("{:02x?}", m.value),
                    });
                }

                push_mp_hdr(
                    &mut buf,
                    MultipartFlags::empty(),
                    OFPMP_EXP_STATE_STATS,
                );
                let match_len: usize =
                    filter.matches.iter().map(|m| 4 + m.value.len()).sum();
                push(&mut buf, &StateStatsReqBody {
                    table_id: u8::from(filter.table),
                    pad: [0; 3],
                    match_len: len_u32(match_len)?,
                });
                for m in &filter.matches {
                    push(&mut buf, &U32::new(m.field.oxm_header()));
                    buf.extend_from_slice(&m.value);
                }
            }

            MsgBody::StateStatsReply { flags, entries } => {
                push_mp_hdr(&mut buf, *flags, OFPMP_EXP_STATE_STATS);
                for e in entries {
                    let start = buf.len();
                    let len = state_entry_len(e);
                    push(&mut buf, &StateEntryHdr {
                        length: len_u16(len)?,
                        table_id: e.table_id,
                        pad: 0,
                        field_count: len_u16(e.fields.len())?,
                        key_len: len_u16(e.key.len())?,
                        state: U32::new(e.state),
                    });
                    for f in &e.fields {
                        push(&mut buf, &U32::new(f.oxm_header()));
                    }
                    buf.extend_from_slice(&e.key);
                    buf.resize(start + len, 0);
                }
            }

            MsgBody::GlobalStateStatsRequest => {
                push_mp_hdr(
                    &mut buf,
                    MultipartFlags::empty(),
                    OFPMP_EXP_GLOBAL_STATE_STATS,
                );
            }

            MsgBody::GlobalStateStatsReply { flags } => {
                push_mp_hdr(
                    &mut buf,
                    MultipartFlags::empty(),
                    OFPMP_EXP_GLOBAL_STATE_STATS,
                );
                push(&mut buf, &GlobalStatsBody {
                    flags: U32::new(*flags),
                    pad: [0; 4],
                });
            }

            MsgBody::Error { code, data } => {
                push(&mut buf, &ErrorHdr {
                    err_type: U16::new(OFPET_EXPERIMENTER),
                    exp_code: U16::new(*code as u16),
                    experimenter: U32::new(OPENSTATE_EXPERIMENTER_ID),
                });
                if data.len() > ERROR_DATA_MAX {
                    return Err(OpenStateError::TooLarge(data.len()));
                }
                buf.extend_from_slice(data);
            }
        }

        let len = len_u16(buf.len())?;
        buf[2..4].copy_from_slice(len.as_bytes());
        Ok(buf)
    }

    /// The OpenFlow message type this message is carried in.
    pub fn msg_type(&self) -> u8 {
        match self.body {
            MsgBody::ConfigureStatefulTable { .. }
            | MsgBody::SetKeyExtractor { .. }
            | MsgBody::StateMod(_)
            | MsgBody::SetGlobalState(_)
            | MsgBody::ResetGlobalState => OFPT_EXPERIMENTER,

            MsgBody::StateStatsRequest(_)
            | MsgBody::GlobalStateStatsRequest => OFPT_MULTIPART_REQUEST,

            MsgBody::StateStatsReply { .. }
            | MsgBody::GlobalStateStatsReply { .. } => OFPT_MULTIPART_REPLY,

            MsgBody::Error { .. } => OFPT_ERROR,
        }
    }

    /// Decode exactly one message occupying all of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, OpenStateError> {
        let mut rdr = Reader { buf };
        let hdr = rdr.read::<OfpHeader>()?;
        if hdr.version != OFP_VERSION {
            return Err(OpenStateError::BadVersion(hdr.version));
        }

        let len = usize::from(hdr.length.get());
        if len != buf.len() {
            return Err(OpenStateError::BadLength(format!(
                "header says {len} bytes, buffer holds {}",
                buf.len()
            )));
        }

        let body = match hdr.msg_type {
            OFPT_EXPERIMENTER => decode_experimenter(&mut rdr)?,
            OFPT_MULTIPART_REQUEST => decode_mp_request(&mut rdr)?,
            OFPT_MULTIPART_REPLY => decode_mp_reply(&mut rdr)?,
            OFPT_ERROR => decode_error(&mut rdr)?,
            t => return Err(OpenStateError::UnexpectedMsgType(t)),
        };

        rdr.finish()?;
        Ok(Self { xid: hdr.xid.get(), body })
    }
}

fn push_state_mod_hdr(buf: &mut Vec<u8>, command: u8) {
    push(buf, &ExperimenterHdr {
        experimenter: U32::new(OPENSTATE_EXPERIMENTER_ID),
        exp_type: U32::new(OFPT_EXP_STATE_MOD),
    });
    push(buf, &StateModHdr { command, pad: [0; 7] });
}

fn push_mp_hdr(buf: &mut Vec<u8>, flags: MultipartFlags, exp_type: u32) {
    push(buf, &MultipartHdr {
        mp_type: U16::new(OFPMP_EXPERIMENTER),
        flags: U16::new(flags.bits()),
        pad: [0; 4],
        experimenter: U32::new(OPENSTATE_EXPERIMENTER_ID),
        exp_type: U32::new(exp_type),
    });
}

fn check_experimenter(id: u32) -> Result<(), OpenStateError> {
    if id != OPENSTATE_EXPERIMENTER_ID {
        return Err(OpenStateError::UnknownExperimenter(id));
    }
    Ok(())
}

fn decode_experimenter(rdr: &mut Reader) -> Result<MsgBody, OpenStateError> {
    let exp = rdr.read::<ExperimenterHdr>()?;
    check_experimenter(exp.experimenter.get())?;
    if exp.exp_type.get() != OFPT_EXP_STATE_MOD {
        return Err(OpenStateError::UnknownExpType(exp.exp_type.get()));
    }

    let sm = rdr.read::<StateModHdr>()?;
    let body = match sm.command {
        OFPSC_STATEFUL_TABLE_CONFIG => {
            let body = rdr.read::<TableConfigBody>()?;
            MsgBody::ConfigureStatefulTable {
                table_id: body.table_id,
                stateful: body.stateful != 0,
            }
        }

        cmd @ (OFPSC_EXP_SET_L_EXTRACTOR | OFPSC_EXP_SET_U_EXTRACTOR) => {
            let body = rdr.read::<ExtractorBody>()?;
            let count = body.field_count.get() as usize;
            if count > MAX_EXTRACTOR_FIELDS {
                return Err(OpenStateError::ExtractorTooLong(count));
            }

            let role = if cmd == OFPSC_EXP_SET_L_EXTRACTOR {
                KeyRole::Lookup
            } else {
                KeyRole::Update
            };
            MsgBody::SetKeyExtractor {
                role,
                table_id: body.table_id,
                fields: rdr.fields(count)?,
            }
        }

        cmd @ (OFPSC_EXP_SET_FLOW_STATE | OFPSC_EXP_DEL_FLOW_STATE) => {
            let body = rdr.read::<FlowStateBody>()?;
            let key_len = body.key_len.get() as usize;
            if key_len > MAX_KEY_LEN {
                return Err(OpenStateError::BadLength(format!(
                    "key of {key_len} bytes exceeds {MAX_KEY_LEN}"
                )));
            }

            let cmd = if cmd == OFPSC_EXP_SET_FLOW_STATE {
                StateModCmd::SetFlowState
            } else {
                StateModCmd::DelFlowState
            };
            MsgBody::StateMod(StateMod {
                cmd,
                table_id: body.table_id,
                key: rdr.bytes(key_len)?.to_vec(),
                state: Masked32::new(body.state.get(), body.state_mask.get()),
            })
        }

        OFPSC_EXP_SET_GLOBAL_STATE => {
            let body = rdr.read::<GlobalStateBody>()?;
            MsgBody::SetGlobalState(Masked32::new(
                body.flags.get(),
                body.flags_mask.get(),
            ))
        }

        OFPSC_EXP_RESET_GLOBAL_STATE => MsgBody::ResetGlobalState,

        cmd => return Err(OpenStateError::UnknownCommand(cmd)),
    };

    Ok(body)
}

fn read_mp_hdr(
    rdr: &mut Reader,
) -> Result<(MultipartFlags, u32), OpenStateError> {
    let mp = rdr.read::<MultipartHdr>()?;
    if mp.mp_type.get() != OFPMP_EXPERIMENTER {
        return Err(OpenStateError::UnknownExpType(u32::from(mp.mp_type.get())));
    }
    check_experimenter(mp.experimenter.get())?;
    let flags = MultipartFlags::from_bits_retain(mp.flags.get());
    Ok((flags, mp.exp_type.get()))
}

fn decode_mp_request(rdr: &mut Reader) -> Result<MsgBody, OpenStateError> {
    let (_, exp_type) = read_mp_hdr(rdr)?;
    match exp_type {
        OFPMP_EXP_STATE_STATS => {
            let body = rdr.read::<StateStatsReqBody>()?;
            let match_len = body.match_len.get() as usize;
            let mut oxm = Reader { buf: rdr.bytes(match_len)? };

            let mut matches = vec![];
            while !oxm.is_empty() {
                let field = Field::from_oxm_header(oxm.u32()?)?;
                let value = oxm.bytes(field.width())?.to_vec();
                matches.push(FieldMatch { field, value });
            }

            Ok(MsgBody::StateStatsRequest(StateStatsFilter {
                table: TableSel::from(body.table_id),
                matches,
            }))
        }

        OFPMP_EXP_GLOBAL_STATE_STATS => Ok(MsgBody::GlobalStateStatsRequest),
        t => Err(OpenStateError::UnknownExpType(t)),
    }
}

fn decode_mp_reply(rdr: &mut Reader) -> Result<MsgBody, OpenStateError> {
    let (flags, exp_type) = read_mp_hdr(rdr)?;
    match exp_type {
        OFPMP_EXP_STATE_STATS => {
            let mut entries = vec![];
            while !rdr.is_empty() {
                entries.push(decode_state_entry(rdr)?);
            }
            Ok(MsgBody::StateStatsReply { flags, entries })
        }

        OFPMP_EXP_GLOBAL_STATE_STATS => {
            let body = rdr.read::<GlobalStatsBody>()?;
            Ok(MsgBody::GlobalStateStatsReply { flags: body.flags.get() })
        }

        t => Err(OpenStateError::UnknownExpType(t)),
    }
}

/// Each entry says how long it is; the reader advances by exactly
/// that many bytes whatever the entry contains.
fn decode_state_entry(
    rdr: &mut Reader,
) -> Result<StateEntryDump, OpenStateError> {
    let have = rdr.buf.len();
    let (hdr, _) = StateEntryHdr::read_from_prefix(rdr.buf).map_err(|_| {
        OpenStateError::Truncated { needed: size_of::<StateEntryHdr>(), have }
    })?;

    let len = usize::from(hdr.length.get());
    let field_count = usize::from(hdr.field_count.get());
    let key_len = usize::from(hdr.key_len.get());
    let needed = size_of::<StateEntryHdr>() + field_count * 4 + key_len;
    if len < needed {
        return Err(OpenStateError::BadLength(format!(
            "state entry of {len} bytes cannot hold {field_count} fields \
             and a {key_len} byte key"
        )));
    }

    let mut entry = Reader { buf: rdr.bytes(len)? };
    entry.read::<StateEntryHdr>()?;
    let fields = entry.fields(field_count)?;
    let key = entry.bytes(key_len)?.to_vec();

    Ok(StateEntryDump {
        table_id: hdr.table_id,
        fields,
        key,
        state: hdr.state.get(),
    })
}

fn decode_error(rdr: &mut Reader) -> Result<MsgBody, OpenStateError> {
    let hdr = rdr.read::<ErrorHdr>()?;
    if hdr.err_type.get() != OFPET_EXPERIMENTER {
        return Err(OpenStateError::UnknownExpType(u32::from(
            hdr.err_type.get(),
        )));
    }
    check_experimenter(hdr.experimenter.get())?;
    let code = ExpErrCode::try_from(hdr.exp_code.get())?;
    let data = rdr.bytes(rdr.buf.len())?.to_vec();
    Ok(MsgBody::Error { code, data })
}

/// Build the error reply for a request that failed with `err`. The
/// reply echoes the request's xid, when it has one, and its first
/// bytes.
pub fn error_reply(request: &[u8], err: &OpenStateError) -> Message {
    let n = request.len().min(ERROR_DATA_MAX);
    Message {
        xid: peek_xid(request).unwrap_or(0),
        body: MsgBody::Error {
            code: err.exp_code(),
            data: request[..n].to_vec(),
        },
    }
}
