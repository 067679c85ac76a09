// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Key extractors.

use super::packet::PacketMeta;
use crate::api::Field;
use crate::api::MAX_EXTRACTOR_FIELDS;
use crate::api::OpenStateError;
use crate::api::key_width;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;

/// An ordered list of fields whose values, concatenated in network
/// byte order, form the flow key of a packet.
///
/// An empty extractor is valid and produces the empty key, so every
/// packet shares a single state entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyExtractor {
    fields: Vec<Field>,
    width: usize,
}

impl KeyExtractor {
    pub fn new(fields: Vec<Field>) -> Result<Self, OpenStateError> {
        if fields.len() > MAX_EXTRACTOR_FIELDS {
            return Err(OpenStateError::ExtractorTooLong(fields.len()));
        }

        let width = key_width(&fields);
        Ok(Self { fields, width })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The length in bytes of every key this extractor produces.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Build the key for `pkt`.
    ///
    /// Returns `None` if the packet is missing any of the fields.
    pub fn extract(&self, pkt: &PacketMeta) -> Option<Vec<u8>> {
        let mut key = Vec::with_capacity(self.width);
        for f in &self.fields {
            if !pkt.push_field(*f, &mut key) {
                return None;
            }
        }

        Some(key)
    }
}

impl Display for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.fields.iter().join(","))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::packet::Ipv4Meta;
    use crate::engine::packet::UlpMeta;
    use core::net::Ipv4Addr;

    fn pkt() -> PacketMeta {
        PacketMeta {
            in_port: 1,
            ip: Some(Ipv4Meta {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
                proto: 17,
            }),
            ulp: Some(UlpMeta::Udp { src: 5000, dst: 53 }),
            ..Default::default()
        }
    }

    #[test]
    fn keys_follow_extractor_order() {
        let fwd =
            KeyExtractor::new(vec![Field::Ipv4Src, Field::Ipv4Dst]).unwrap();
        let rev =
            KeyExtractor::new(vec![Field::Ipv4Dst, Field::Ipv4Src]).unwrap();
        assert_eq!(fwd.width(), 8);
        assert_eq!(fwd.extract(&pkt()).unwrap(), [10, 0, 0, 1, 10, 0, 0, 2]);
        assert_eq!(rev.extract(&pkt()).unwrap(), [10, 0, 0, 2, 10, 0, 0, 1]);
        assert_eq!(fwd.to_string(), "[ipv4_src,ipv4_dst]");
    }

    #[test]
    fn missing_field_yields_no_key() {
        let ext = KeyExtractor::new(vec![Field::Ipv4Src, Field::TcpDst])
            .unwrap();
        assert_eq!(ext.extract(&pkt()), None);
    }

    #[test]
    fn empty_and_oversized() {
        let ext = KeyExtractor::default();
        assert_eq!(ext.extract(&pkt()), Some(vec![]));

        let too_many = vec![Field::InPort; MAX_EXTRACTOR_FIELDS + 1];
        assert_eq!(
            KeyExtractor::new(too_many),
            Err(OpenStateError::ExtractorTooLong(MAX_EXTRACTOR_FIELDS + 1))
        );
    }
}
