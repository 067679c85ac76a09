// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet metadata as seen by the match-action pipeline.
//!
//! The pipeline never looks at packet bytes. Header parsing happens
//! before a packet enters the datapath; what arrives here is the set
//! of header fields the tables may match on or extract keys from.

use crate::api::Field;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EtherMeta {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Meta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UlpMeta {
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
}

/// The header fields of a packet plus the pipeline scratch metadata.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketMeta {
    pub in_port: u32,
    pub ether: EtherMeta,
    pub ip: Option<Ipv4Meta>,
    pub ulp: Option<UlpMeta>,

    /// Opaque 64-bit value carried between tables. It starts at zero
    /// and is only changed by `WriteMetadata` instructions.
    pub metadata: u64,
}

impl PacketMeta {
    /// Append the network byte order value of `field` to `buf`.
    ///
    /// Returns `false`, leaving `buf` untouched, when the packet does
    /// not carry the field (e.g. `tcp_src` on a UDP packet).
    pub fn push_field(&self, field: Field, buf: &mut Vec<u8>) -> bool {
        match field {
            Field::InPort => {
                buf.extend_from_slice(&self.in_port.to_be_bytes())
            }
            Field::Metadata => {
                buf.extend_from_slice(&self.metadata.to_be_bytes())
            }
            Field::EthDst => buf.extend_from_slice(&self.ether.dst),
            Field::EthSrc => buf.extend_from_slice(&self.ether.src),
            Field::EthType => {
                buf.extend_from_slice(&self.ether.ether_type.to_be_bytes())
            }

            Field::IpProto => match self.ip {
                Some(ip) => buf.push(ip.proto),
                None => return false,
            },

            Field::Ipv4Src => match self.ip {
                Some(ip) => buf.extend_from_slice(&ip.src.octets()),
                None => return false,
            },

            Field::Ipv4Dst => match self.ip {
                Some(ip) => buf.extend_from_slice(&ip.dst.octets()),
                None => return false,
            },

            Field::TcpSrc => match self.ulp {
                Some(UlpMeta::Tcp { src, .. }) => {
                    buf.extend_from_slice(&src.to_be_bytes())
                }
                _ => return false,
            },

            Field::TcpDst => match self.ulp {
                Some(UlpMeta::Tcp { dst, .. }) => {
                    buf.extend_from_slice(&dst.to_be_bytes())
                }
                _ => return false,
            },

            Field::UdpSrc => match self.ulp {
                Some(UlpMeta::Udp { src, .. }) => {
                    buf.extend_from_slice(&src.to_be_bytes())
                }
                _ => return false,
            },

            Field::UdpDst => match self.ulp {
                Some(UlpMeta::Udp { dst, .. }) => {
                    buf.extend_from_slice(&dst.to_be_bytes())
                }
                _ => return false,
            },
        }

        true
    }

    /// The network byte order value of `field`, if the packet has it.
    pub fn field(&self, field: Field) -> Option<Vec<u8>> {
        let mut buf = Vec::with_capacity(field.width());
        self.push_field(field, &mut buf).then_some(buf)
    }
}

impl Display for PacketMeta {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "in_port={} eth_type=0x{:04X}",
            self.in_port, self.ether.ether_type
        )?;

        if let Some(ip) = self.ip {
            write!(f, " {} -> {} proto={}", ip.src, ip.dst, ip.proto)?;
        }

        match self.ulp {
            Some(UlpMeta::Tcp { src, dst }) => {
                write!(f, " tcp {src}:{dst}")?
            }
            Some(UlpMeta::Udp { src, dst }) => {
                write!(f, " udp {src}:{dst}")?
            }
            None => (),
        }

        Ok(())
    }
}
