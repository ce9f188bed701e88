//! Types produced by the frame decoder.
//!
//! Each layer is a closed tagged-variant enum. Adding a protocol means
//! adding a variant, never a new type hierarchy.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
    time::SystemTime,
};

/// A single link-layer capture unit as delivered by the capture mechanism.
///
/// `data.len()` is the captured length and may be shorter than `wire_len`
/// when the capture mechanism truncates frames.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
    /// Length of the frame on the wire, as declared by the capture mechanism.
    pub wire_len: u32,
}

impl RawFrame {
    pub fn captured_len(&self) -> usize {
        self.data.len()
    }
}

/// EtherType values the decoder dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Arp,
    /// Structurally valid but unrecognized; terminates the decode chain.
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86DD => EtherType::Ipv6,
            0x0806 => EtherType::Arp,
            other => EtherType::Unknown(other),
        }
    }
}

/// TCP header flags, low eight bits of the flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u8, &str); 6] = [
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::URG, "URG"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// Link-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHeader {
    Ethernet {
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        ether_type: EtherType,
    },
}

/// Network-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        header_len: u8,
        total_len: u16,
        ttl: u8,
        dscp: u8,
        ecn: u8,
    },
    Ipv6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        flow_label: u32,
    },
    /// Ethernet/IPv4 ARP. Terminates the chain; there is no deeper layer.
    Arp {
        operation: u16,
        sender_mac: [u8; 6],
        sender_ip: Ipv4Addr,
        target_mac: [u8; 6],
        target_ip: Ipv4Addr,
    },
}

/// Transport-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        length: u16,
    },
    Icmp {
        icmp_type: u8,
        code: u8,
    },
}

impl TransportHeader {
    pub fn src_port(&self) -> Option<u16> {
        match self {
            TransportHeader::Tcp { src_port, .. } | TransportHeader::Udp { src_port, .. } => {
                Some(*src_port)
            }
            TransportHeader::Icmp { .. } => None,
        }
    }

    pub fn dst_port(&self) -> Option<u16> {
        match self {
            TransportHeader::Tcp { dst_port, .. } | TransportHeader::Udp { dst_port, .. } => {
                Some(*dst_port)
            }
            TransportHeader::Icmp { .. } => None,
        }
    }
}

/// Application-layer header, identified by port and header signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppHeader {
    Dns {
        id: u16,
        is_response: bool,
        questions: u16,
        answers: u16,
    },
    Http {
        /// First request/status line, truncated to a sane display length.
        start_line: String,
    },
    Tls {
        content_type: u8,
        version_major: u8,
        version_minor: u8,
    },
}

/// Ordered layer records for one decoded frame. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeaders {
    pub link: LinkHeader,
    pub network: Option<NetworkHeader>,
    pub transport: Option<TransportHeader>,
    pub app: Option<AppHeader>,
    /// False when an unrecognized layer type ended the walk early.
    /// A partial decode is a valid result, not an error.
    pub complete: bool,
}

impl DecodedHeaders {
    pub fn src_port(&self) -> Option<u16> {
        self.transport.as_ref().and_then(TransportHeader::src_port)
    }

    pub fn dst_port(&self) -> Option<u16> {
        self.transport.as_ref().and_then(TransportHeader::dst_port)
    }
}
