// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match fields usable in key extractors and stats filters.
//!
//! Fields are identified on the wire by their OpenFlow Extensible
//! Match (OXM) header in the `OFPXMC_OPENFLOW_BASIC` class. The value
//! of a field is always carried in network byte order, and a flow key
//! is the concatenation of those values in extractor order.

use super::OpenStateError;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use serde::Deserialize;
use serde::Serialize;

/// The `OFPXMC_OPENFLOW_BASIC` OXM class.
pub const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

/// Build an OXM header for a field in the basic class.
pub const fn oxm_header(field: u8, len: u8) -> u32 {
    ((OFPXMC_OPENFLOW_BASIC as u32) << 16) | ((field as u32) << 9) | len as u32
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum Field {
    InPort,
    Metadata,
    EthDst,
    EthSrc,
    EthType,
    IpProto,
    Ipv4Src,
    Ipv4Dst,
    TcpSrc,
    TcpDst,
    UdpSrc,
    UdpDst,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::InPort,
        Field::Metadata,
        Field::EthDst,
        Field::EthSrc,
        Field::EthType,
        Field::IpProto,
        Field::Ipv4Src,
        Field::Ipv4Dst,
        Field::TcpSrc,
        Field::TcpDst,
        Field::UdpSrc,
        Field::UdpDst,
    ];

    /// The OXM field number.
    pub const fn oxm_field(&self) -> u8 {
        match self {
            Self::InPort => 0,
            Self::Metadata => 2,
            Self::EthDst => 3,
            Self::EthSrc => 4,
            Self::EthType => 5,
            Self::IpProto => 10,
            Self::Ipv4Src => 11,
            Self::Ipv4Dst => 12,
            Self::TcpSrc => 13,
            Self::TcpDst => 14,
            Self::UdpSrc => 15,
            Self::UdpDst => 16,
        }
    }

    /// The number of bytes the field's value occupies in a key.
    pub const fn width(&self) -> usize {
        match self {
            Self::InPort => 4,
            Self::Metadata => 8,
            Self::EthDst | Self::EthSrc => 6,
            Self::EthType => 2,
            Self::IpProto => 1,
            Self::Ipv4Src | Self::Ipv4Dst => 4,
            Self::TcpSrc | Self::TcpDst | Self::UdpSrc | Self::UdpDst => 2,
        }
    }

    /// The OXM header identifying this field (never masked).
    pub const fn oxm_header(&self) -> u32 {
        oxm_header(self.oxm_field(), self.width() as u8)
    }

    /// Parse a field from its OXM header. The has-mask bit must be
    /// clear and the length must agree with the field width.
    pub fn from_oxm_header(hdr: u32) -> Result<Self, OpenStateError> {
        Self::ALL
            .iter()
            .find(|f| f.oxm_header() == hdr)
            .copied()
            .ok_or(OpenStateError::UnknownField(hdr))
    }

    /// Parse a human-readable value for this field into its network
    /// byte order representation.
    pub fn parse_value(&self, s: &str) -> Result<Vec<u8>, OpenStateError> {
        let bad = || OpenStateError::BadFieldValue {
            field: *self,
            value: s.to_string(),
        };

        let bytes = match self {
            Self::Ipv4Src | Self::Ipv4Dst => {
                let ip: Ipv4Addr = s.parse().map_err(|_| bad())?;
                ip.octets().to_vec()
            }

            Self::EthDst | Self::EthSrc => {
                let octets = s
                    .split(':')
                    .map(|o| u8::from_str_radix(o, 16))
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|_| bad())?;
                if octets.len() != 6 {
                    return Err(bad());
                }
                octets
            }

            Self::IpProto => parse_uint(s)
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(bad)?
                .to_be_bytes()
                .to_vec(),

            Self::EthType
            | Self::TcpSrc
            | Self::TcpDst
            | Self::UdpSrc
            | Self::UdpDst => parse_uint(s)
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(bad)?
                .to_be_bytes()
                .to_vec(),

            Self::InPort => parse_uint(s)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(bad)?
                .to_be_bytes()
                .to_vec(),

            Self::Metadata => {
                parse_uint(s).ok_or_else(bad)?.to_be_bytes().to_vec()
            }
        };

        Ok(bytes)
    }

    /// Render a network byte order value of this field. Values of the
    /// wrong width are rendered as raw hex.
    pub fn fmt_value(&self, val: &[u8]) -> String {
        if val.len() != self.width() {
            return fmt_hex(val);
        }

        match self {
            Self::Ipv4Src | Self::Ipv4Dst => {
                Ipv4Addr::new(val[0], val[1], val[2], val[3]).to_string()
            }

            Self::EthDst | Self::EthSrc => val
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<String>>()
                .join(":"),

            Self::EthType => {
                format!("0x{:04X}", u16::from_be_bytes([val[0], val[1]]))
            }

            Self::Metadata => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(val);
                format!("0x{:X}", u64::from_be_bytes(buf))
            }

            _ => {
                let mut n = 0u64;
                for b in val {
                    n = (n << 8) | u64::from(*b);
                }
                n.to_string()
            }
        }
    }
}

fn parse_uint(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn fmt_hex(val: &[u8]) -> String {
    let mut s = String::from("0x");
    for b in val {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Render a key as `field=value` pairs, splitting the key bytes
/// according to `fields`. Any bytes left over are rendered as hex.
pub fn fmt_key(fields: &[Field], key: &[u8]) -> String {
    let mut parts = Vec::with_capacity(fields.len());
    let mut off = 0;

    for f in fields {
        let end = off + f.width();
        if end > key.len() {
            break;
        }
        parts.push(format!("{}={}", f, f.fmt_value(&key[off..end])));
        off = end;
    }

    if off < key.len() {
        parts.push(fmt_hex(&key[off..]));
    }

    parts.join(",")
}

/// The total key width produced by an extractor.
pub fn key_width(fields: &[Field]) -> usize {
    fields.iter().map(Field::width).sum()
}

impl core::str::FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("oxm_of_").unwrap_or(&lower);
        Self::ALL
            .iter()
            .find(|f| f.to_string() == name)
            .copied()
            .ok_or_else(|| format!("unknown field: {}", s))
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::InPort => "in_port",
            Self::Metadata => "metadata",
            Self::EthDst => "eth_dst",
            Self::EthSrc => "eth_src",
            Self::EthType => "eth_type",
            Self::IpProto => "ip_proto",
            Self::Ipv4Src => "ipv4_src",
            Self::Ipv4Dst => "ipv4_dst",
            Self::TcpSrc => "tcp_src",
            Self::TcpDst => "tcp_dst",
            Self::UdpSrc => "udp_src",
            Self::UdpDst => "udp_dst",
        };

        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oxm_headers_match_openflow() {
        assert_eq!(Field::InPort.oxm_header(), 0x8000_0004);
        assert_eq!(Field::Ipv4Src.oxm_header(), 0x8000_1604);
        assert_eq!(Field::Ipv4Dst.oxm_header(), 0x8000_1804);
        assert_eq!(Field::EthType.oxm_header(), 0x8000_0A02);
        assert_eq!(Field::TcpDst.oxm_header(), 0x8000_1C02);

        for f in Field::ALL {
            assert_eq!(Field::from_oxm_header(f.oxm_header()).unwrap(), f);
        }

        // A masked IPV4_SRC header is not a valid key field.
        assert!(Field::from_oxm_header(0x8000_1708).is_err());
    }

    #[test]
    fn parse_and_render_values() {
        let v = Field::Ipv4Src.parse_value("10.0.0.3").unwrap();
        assert_eq!(v, vec![10, 0, 0, 3]);
        assert_eq!(Field::Ipv4Src.fmt_value(&v), "10.0.0.3");

        let v = Field::EthSrc.parse_value("aa:00:04:00:ff:10").unwrap();
        assert_eq!(v, vec![0xAA, 0x00, 0x04, 0x00, 0xFF, 0x10]);
        assert_eq!(Field::EthSrc.fmt_value(&v), "AA:00:04:00:FF:10");

        let v = Field::TcpDst.parse_value("443").unwrap();
        assert_eq!(v, vec![0x01, 0xBB]);
        assert_eq!(Field::EthType.parse_value("0x0800").unwrap(), [8, 0]);

        assert!(Field::TcpDst.parse_value("70000").is_err());
        assert!(Field::Ipv4Dst.parse_value("10.0.0").is_err());
        assert!(Field::EthDst.parse_value("aa:bb").is_err());
    }

    #[test]
    fn key_rendering() {
        let fields = [Field::Ipv4Src, Field::TcpDst];
        let key = [10, 0, 0, 5, 0, 80];
        assert_eq!(fmt_key(&fields, &key), "ipv4_src=10.0.0.5,tcp_dst=80");
        assert_eq!(key_width(&fields), 6);

        // Leftover bytes beyond the extractor are shown raw.
        assert_eq!(fmt_key(&[Field::IpProto], &[6, 1, 2]), "ip_proto=6,0x0102");
    }

    #[test]
    fn field_names() {
        assert_eq!("IPV4_SRC".parse::<Field>().unwrap(), Field::Ipv4Src);
        assert_eq!("OXM_OF_IPV4_SRC".parse::<Field>().unwrap(), Field::Ipv4Src);
        assert!("ipv9_src".parse::<Field>().is_err());
    }
}
