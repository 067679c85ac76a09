// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Predicates used for `Rule` matching.

use super::packet::PacketMeta;
use crate::api::Field;
use crate::api::FieldMatch;
use crate::api::Masked32;
use crate::api::Masked64;
use crate::api::OpenStateError;
use core::fmt;
use core::fmt::Display;

/// The per-table values a packet is matched against besides its own
/// header fields.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MatchCtx {
    /// The state the table's lookup extractor found for the packet,
    /// or 0 when the table is stateless.
    pub state: u32,

    /// The global flags at the time the packet entered the table.
    pub flags: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    /// The packet carries the field with exactly this value.
    Field(FieldMatch),

    /// Match the masked bits of the looked-up state.
    State(Masked32),

    /// Match the masked bits of the global flags.
    Flags(Masked32),

    /// Match the masked bits of the pipeline metadata.
    Metadata(Masked64),
}

impl Predicate {
    /// Build a header field predicate from its human-readable value.
    pub fn field(field: Field, value: &str) -> Result<Self, OpenStateError> {
        Ok(Self::Field(FieldMatch { field, value: field.parse_value(value)? }))
    }

    pub fn is_match(&self, pkt: &PacketMeta, ctx: &MatchCtx) -> bool {
        match self {
            Self::Field(fm) => {
                let mut buf = Vec::with_capacity(fm.field.width());
                pkt.push_field(fm.field, &mut buf) && buf == fm.value
            }

            Self::State(m) => m.matches(ctx.state),
            Self::Flags(m) => m.matches(ctx.flags),
            Self::Metadata(m) => m.matches(pkt.metadata),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Field(fm) => {
                write!(f, "{}={}", fm.field, fm.field.fmt_value(&fm.value))
            }

            Self::State(m) => write!(f, "state={m}"),
            Self::Flags(m) => write!(f, "flags={m}"),
            Self::Metadata(m) => write!(f, "metadata={m}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::masked_flags;
    use crate::api::pack_substate;
    use crate::engine::packet::Ipv4Meta;
    use core::net::Ipv4Addr;

    fn pkt() -> PacketMeta {
        PacketMeta {
            in_port: 2,
            ip: Some(Ipv4Meta {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 6),
                proto: 6,
            }),
            metadata: 64954,
            ..Default::default()
        }
    }

    #[test]
    fn field_match() {
        let ctx = MatchCtx::default();
        let p = Predicate::field(Field::Ipv4Dst, "10.0.0.6").unwrap();
        assert!(p.is_match(&pkt(), &ctx));
        assert_eq!(p.to_string(), "ipv4_dst=10.0.0.6");

        let p = Predicate::field(Field::Ipv4Dst, "10.0.0.5").unwrap();
        assert!(!p.is_match(&pkt(), &ctx));

        // An absent field never matches.
        let p = Predicate::field(Field::UdpDst, "53").unwrap();
        assert!(!p.is_match(&pkt(), &ctx));
    }

    #[test]
    fn state_matches_one_section() {
        let m = pack_substate(2, 2, 2).unwrap();
        let p = Predicate::State(m);

        let ctx = MatchCtx { state: 0x0002_FFFF, flags: 0 };
        assert!(p.is_match(&pkt(), &ctx));

        let ctx = MatchCtx { state: 0x0003_0000, flags: 0 };
        assert!(!p.is_match(&pkt(), &ctx));
    }

    #[test]
    fn flags_and_metadata() {
        let p = Predicate::Flags(masked_flags("1*01", 8).unwrap());
        assert!(p.is_match(&pkt(), &MatchCtx { state: 0, flags: 0xD0 }));
        assert!(p.is_match(&pkt(), &MatchCtx { state: 0, flags: 0x90 }));
        assert!(!p.is_match(&pkt(), &MatchCtx { state: 0, flags: 0xB0 }));
        assert_eq!(p.to_string(), "flags=0x90/0xb0");

        let p = Predicate::Metadata(Masked64::exact(64954));
        assert!(p.is_match(&pkt(), &MatchCtx::default()));
        assert_eq!(p.to_string(), "metadata=0xfdba");
    }
}
