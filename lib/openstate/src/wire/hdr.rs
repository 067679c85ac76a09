// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw on-the-wire layouts. All multi-byte fields are in network byte
//! order; every struct is unaligned so it can be read straight out of
//! a receive buffer.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

pub const OFPT_ERROR: u8 = 1;
pub const OFPT_EXPERIMENTER: u8 = 4;
pub const OFPT_MULTIPART_REQUEST: u8 = 18;
pub const OFPT_MULTIPART_REPLY: u8 = 19;

pub const OFPET_EXPERIMENTER: u16 = 0xFFFF;
pub const OFPMP_EXPERIMENTER: u16 = 0xFFFF;

/// `exp_type` of an experimenter message carrying a state mod.
pub const OFPT_EXP_STATE_MOD: u32 = 0;

/// `exp_type` values of experimenter multipart messages.
pub const OFPMP_EXP_STATE_STATS: u32 = 0;
pub const OFPMP_EXP_GLOBAL_STATE_STATS: u32 = 1;

/// State mod commands.
pub const OFPSC_STATEFUL_TABLE_CONFIG: u8 = 0;
pub const OFPSC_EXP_SET_L_EXTRACTOR: u8 = 1;
pub const OFPSC_EXP_SET_U_EXTRACTOR: u8 = 2;
pub const OFPSC_EXP_SET_FLOW_STATE: u8 = 3;
pub const OFPSC_EXP_DEL_FLOW_STATE: u8 = 4;
pub const OFPSC_EXP_SET_GLOBAL_STATE: u8 = 5;
pub const OFPSC_EXP_RESET_GLOBAL_STATE: u8 = 6;

/// The common OpenFlow message header.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct OfpHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: U16,
    pub xid: U32,
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct ExperimenterHdr {
    pub experimenter: U32,
    pub exp_type: U32,
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct StateModHdr {
    pub command: u8,
    pub pad: [u8; 7],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TableConfigBody {
    pub table_id: u8,
    pub stateful: u8,
    pub pad: [u8; 6],
}

/// Followed by `field_count` OXM headers.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct ExtractorBody {
    pub table_id: u8,
    pub pad: [u8; 3],
    pub field_count: U32,
}

/// Followed by `key_len` bytes of key.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct FlowStateBody {
    pub table_id: u8,
    pub pad: [u8; 3],
    pub key_len: U32,
    pub state: U32,
    pub state_mask: U32,
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct GlobalStateBody {
    pub flags: U32,
    pub flags_mask: U32,
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct MultipartHdr {
    pub mp_type: U16,
    pub flags: U16,
    pub pad: [u8; 4],
    pub experimenter: U32,
    pub exp_type: U32,
}

/// Followed by `match_len` bytes of OXM TLVs.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct StateStatsReqBody {
    pub table_id: u8,
    pub pad: [u8; 3],
    pub match_len: U32,
}

/// Followed by `field_count` OXM headers, `key_len` bytes of key, and
/// zero padding up to `length`.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct StateEntryHdr {
    pub length: U16,
    pub table_id: u8,
    pub pad: u8,
    pub field_count: U16,
    pub key_len: U16,
    pub state: U32,
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct GlobalStatsBody {
    pub flags: U32,
    pub pad: [u8; 4],
}

/// Followed by up to [`ERROR_DATA_MAX`] bytes of the failed request.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct ErrorHdr {
    pub err_type: U16,
    pub exp_code: U16,
    pub experimenter: U32,
}

pub const ERROR_DATA_MAX: usize = 64;
