// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::TableSel;
use super::field::Field;
use super::field::fmt_key;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The broad class an [`OpenStateError`] belongs to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// A malformed, truncated, or unknown wire message.
    Protocol,
    /// An operation that conflicts with the table configuration.
    Config,
    /// A value that does not fit the bit field it targets.
    Range,
    /// An argument that could not be parsed at all.
    InvalidArgument,
}

#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum OpenStateError {
    #[error("message truncated: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("inconsistent length: {0}")]
    BadLength(String),

    #[error("unsupported OpenFlow version: 0x{0:02x}")]
    BadVersion(u8),

    #[error("unknown experimenter: 0x{0:08x}")]
    UnknownExperimenter(u32),

    #[error("unknown exp_type: {0}")]
    UnknownExpType(u32),

    #[error("unknown state mod command: {0}")]
    UnknownCommand(u8),

    #[error("unknown OXM field: 0x{0:08x}")]
    UnknownField(u32),

    #[error("unexpected message type: {0}")]
    UnexpectedMsgType(u8),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("table {0} is not stateful")]
    NotStateful(u8),

    #[error("invalid table id: {0}")]
    InvalidTableId(u8),

    #[error(
        "key length {actual} does not match the update extractor of \
         table {table_id} ({expected} bytes)"
    )]
    KeyArity { table_id: u8, expected: usize, actual: usize },

    #[error("goto table {to} from table {from} is not forward")]
    BackwardGoto { from: u8, to: u8 },

    #[error("extractor of {0} fields exceeds the maximum")]
    ExtractorTooLong(usize),

    #[error("state {state} does not fit in a {width}-bit section")]
    SubstateRange { state: u32, width: u32 },

    #[error("section count {0} is not a power of two dividing 32")]
    BadSectionCount(u32),

    #[error("section {section} out of range for {sec_count} sections")]
    BadSection { section: u32, sec_count: u32 },

    #[error("flag pattern of {len} characters exceeds {width} bits")]
    FlagPatternTooLong { len: usize, width: u32 },

    #[error("flag field width {0} outside 1..=32")]
    BadFlagWidth(u32),

    #[error("invalid flag pattern character: {0:?}")]
    BadFlagChar(char),

    #[error("invalid value {value:?} for field {field}")]
    BadFieldValue { field: Field, value: String },
}

impl OpenStateError {
    pub fn kind(&self) -> ErrorKind {
        use OpenStateError::*;

        match self {
            Truncated { .. }
            | BadLength(_)
            | BadVersion(_)
            | UnknownExperimenter(_)
            | UnknownExpType(_)
            | UnknownCommand(_)
            | UnknownField(_)
            | UnexpectedMsgType(_)
            | TooLarge(_) => ErrorKind::Protocol,

            NotStateful(_)
            | InvalidTableId(_)
            | KeyArity { .. }
            | BackwardGoto { .. }
            | ExtractorTooLong(_) => ErrorKind::Config,

            SubstateRange { .. }
            | BadSectionCount(_)
            | BadSection { .. }
            | FlagPatternTooLong { .. }
            | BadFlagWidth(_) => ErrorKind::Range,

            BadFlagChar(_) | BadFieldValue { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// The experimenter error code reported to the controller when a
    /// control request fails with this error.
    pub fn exp_code(&self) -> ExpErrCode {
        use OpenStateError::*;

        match self {
            Truncated { .. } | BadLength(_) | TooLarge(_) => ExpErrCode::BadLen,
            BadVersion(_) => ExpErrCode::BadVersion,
            UnknownExperimenter(_) => ExpErrCode::BadExperimenter,
            UnknownExpType(_) | UnexpectedMsgType(_) => ExpErrCode::BadExpType,
            UnknownCommand(_) => ExpErrCode::BadCommand,
            UnknownField(_) => ExpErrCode::BadField,
            NotStateful(_) => ExpErrCode::NotStateful,
            InvalidTableId(_) => ExpErrCode::BadTableId,
            KeyArity { .. } => ExpErrCode::BadKeyLen,
            ExtractorTooLong(_) => ExpErrCode::BadExtractor,
            BackwardGoto { .. } => ExpErrCode::BadGoto,
            SubstateRange { .. }
            | BadSectionCount(_)
            | BadSection { .. }
            | FlagPatternTooLong { .. }
            | BadFlagWidth(_) => ExpErrCode::BadRange,
            BadFlagChar(_) | BadFieldValue { .. } => ExpErrCode::BadArgument,
        }
    }
}

/// Experimenter error codes carried in an `OFPET_EXPERIMENTER` error.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u16)]
pub enum ExpErrCode {
    BadLen = 0,
    BadVersion = 1,
    BadExperimenter = 2,
    BadExpType = 3,
    BadCommand = 4,
    BadField = 5,
    NotStateful = 6,
    BadTableId = 7,
    BadKeyLen = 8,
    BadExtractor = 9,
    BadGoto = 10,
    BadRange = 11,
    BadArgument = 12,
}

impl ExpErrCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadLen
            | Self::BadVersion
            | Self::BadExperimenter
            | Self::BadExpType
            | Self::BadCommand
            | Self::BadField => ErrorKind::Protocol,

            Self::NotStateful
            | Self::BadTableId
            | Self::BadKeyLen
            | Self::BadExtractor
            | Self::BadGoto => ErrorKind::Config,

            Self::BadRange => ErrorKind::Range,
            Self::BadArgument => ErrorKind::InvalidArgument,
        }
    }
}

impl TryFrom<u16> for ExpErrCode {
    type Error = OpenStateError;

    fn try_from(num: u16) -> Result<Self, Self::Error> {
        match num {
            0 => Ok(Self::BadLen),
            1 => Ok(Self::BadVersion),
            2 => Ok(Self::BadExperimenter),
            3 => Ok(Self::BadExpType),
            4 => Ok(Self::BadCommand),
            5 => Ok(Self::BadField),
            6 => Ok(Self::NotStateful),
            7 => Ok(Self::BadTableId),
            8 => Ok(Self::BadKeyLen),
            9 => Ok(Self::BadExtractor),
            10 => Ok(Self::BadGoto),
            11 => Ok(Self::BadRange),
            12 => Ok(Self::BadArgument),
            _ => Err(OpenStateError::BadLength(format!(
                "unknown experimenter error code {}",
                num
            ))),
        }
    }
}

/// A snapshot of a single state entry, as exported by a state stats
/// reply.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateEntryDump {
    /// The table the entry lives in.
    pub table_id: u8,
    /// The update extractor in force when the entry was created; it
    /// describes how `key` splits into field values.
    pub fields: Vec<Field>,
    /// The concrete key, in network byte order.
    pub key: Vec<u8>,
    /// The full 32-bit state word.
    pub state: u32,
}

impl StateEntryDump {
    /// Return the value of `field` within the key, if the entry's
    /// extractor contains it.
    pub fn field_value(&self, field: Field) -> Option<&[u8]> {
        field_value(&self.fields, &self.key, field)
    }

    /// The key rendered as `field=value` pairs.
    pub fn key_str(&self) -> String {
        fmt_key(&self.fields, &self.key)
    }
}

/// A single `field == value` condition of a state stats filter.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldMatch {
    pub field: Field,
    pub value: Vec<u8>,
}

impl FieldMatch {
    /// Parse `field=value`, e.g. `ipv4_src=10.0.0.1`.
    pub fn parse(s: &str) -> Result<Self, OpenStateError> {
        let bad = || OpenStateError::BadFieldValue {
            field: Field::InPort,
            value: s.to_string(),
        };

        let (name, val) = s.split_once('=').ok_or_else(bad)?;
        let field: Field = name.trim().parse().map_err(|_| bad())?;
        let value = field.parse_value(val.trim())?;
        Ok(Self { field, value })
    }
}

/// Selects the entries a state stats request exports.
///
/// An entry is selected when its table is in `table` and, for every
/// [`FieldMatch`], the entry's key contains that field with an equal
/// value. An entry whose key lacks a filtered field is not selected.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateStatsFilter {
    pub table: TableSel,
    pub matches: Vec<FieldMatch>,
}

impl Default for StateStatsFilter {
    fn default() -> Self {
        Self { table: TableSel::All, matches: vec![] }
    }
}

impl StateStatsFilter {
    pub fn table(table: TableSel) -> Self {
        Self { table, matches: vec![] }
    }

    pub fn is_match(&self, table_id: u8, fields: &[Field], key: &[u8]) -> bool {
        if !self.table.contains(table_id) {
            return false;
        }

        self.matches.iter().all(|m| {
            field_value(fields, key, m.field) == Some(m.value.as_slice())
        })
    }
}

fn field_value<'a>(
    fields: &[Field],
    key: &'a [u8],
    field: Field,
) -> Option<&'a [u8]> {
    let mut off = 0;
    for f in fields {
        let end = off + f.width();
        if *f == field {
            return key.get(off..end);
        }
        off = end;
    }
    None
}

/// The response to a state stats request, reassembled from one or
/// more multipart replies.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpStateResp {
    pub entries: Vec<StateEntryDump>,
}

/// The response to a global state stats request.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpGlobalStateResp {
    pub flags: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(OpenStateError::NotStateful(1).kind(), ErrorKind::Config);
        assert_eq!(
            OpenStateError::SubstateRange { state: 300, width: 8 }.kind(),
            ErrorKind::Range
        );
        assert_eq!(
            OpenStateError::UnknownExpType(9).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            OpenStateError::BadFlagChar('x').kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn exp_codes_agree_with_kinds() {
        let errs = [
            OpenStateError::Truncated { needed: 8, have: 2 },
            OpenStateError::UnknownCommand(9),
            OpenStateError::NotStateful(3),
            OpenStateError::KeyArity { table_id: 1, expected: 4, actual: 2 },
            OpenStateError::BadSection { section: 4, sec_count: 4 },
            OpenStateError::BadFlagChar('?'),
        ];

        for e in errs {
            let code = e.exp_code();
            assert_eq!(code.kind(), e.kind(), "{e}");
            assert_eq!(ExpErrCode::try_from(code as u16).unwrap(), code);
        }

        assert!(ExpErrCode::try_from(99).is_err());
    }

    #[test]
    fn entry_field_value() {
        let e = StateEntryDump {
            table_id: 1,
            fields: vec![Field::Ipv4Src, Field::TcpDst],
            key: vec![10, 0, 0, 1, 0, 22],
            state: 7,
        };

        assert_eq!(e.field_value(Field::TcpDst), Some(&[0u8, 22][..]));
        assert_eq!(e.field_value(Field::Ipv4Src), Some(&[10u8, 0, 0, 1][..]));
        assert_eq!(e.field_value(Field::Ipv4Dst), None);
        assert_eq!(e.key_str(), "ipv4_src=10.0.0.1,tcp_dst=22");
    }

    #[test]
    fn stats_filter() {
        let fields = [Field::Ipv4Src, Field::TcpDst];
        let key = [10, 0, 0, 1, 0, 22];

        let all = StateStatsFilter::default();
        assert!(all.is_match(0, &fields, &key));
        assert!(all.is_match(7, &[], &[]));

        let mut f = StateStatsFilter::table(TableSel::One(1));
        assert!(f.is_match(1, &fields, &key));
        assert!(!f.is_match(2, &fields, &key));

        f.matches.push(FieldMatch::parse("ipv4_src=10.0.0.1").unwrap());
        assert!(f.is_match(1, &fields, &key));

        f.matches.push(FieldMatch::parse("tcp_dst = 23").unwrap());
        assert!(!f.is_match(1, &fields, &key));

        // A field the key does not carry never matches.
        let f = StateStatsFilter {
            table: TableSel::All,
            matches: vec![FieldMatch::parse("ipv4_dst=10.0.0.1").unwrap()],
        };
        assert!(!f.is_match(1, &fields, &key));
        assert!(FieldMatch::parse("ipv4_dst").is_err());
    }
}
