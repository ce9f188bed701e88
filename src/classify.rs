//! Protocol classification: decoded headers into a protocol-tagged record.
//!
//! Classification is a pure function of the decoded headers. The deepest
//! parsed layer wins, with application labels preferred over transport,
//! transport over network, and `Unknown` as the always-legal terminal.

use std::{fmt, net::IpAddr, time::SystemTime};

use serde::Serialize;

use crate::packet::types::{
    AppHeader, DecodedHeaders, NetworkHeader, RawFrame, TransportHeader,
};

/// Closed protocol label set. Extending the classifier means adding a
/// variant here and a row to the port table, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolLabel {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Icmp,
    Dns,
    Http,
    Tls,
    Unknown,
}

impl ProtocolLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolLabel::Ethernet => "ETHERNET",
            ProtocolLabel::Arp => "ARP",
            ProtocolLabel::Ipv4 => "IPV4",
            ProtocolLabel::Ipv6 => "IPV6",
            ProtocolLabel::Tcp => "TCP",
            ProtocolLabel::Udp => "UDP",
            ProtocolLabel::Icmp => "ICMP",
            ProtocolLabel::Dns => "DNS",
            ProtocolLabel::Http => "HTTP",
            ProtocolLabel::Tls => "TLS",
            ProtocolLabel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a conversation. Both fields are optional: ARP and link-only
/// records have no port, link-only records have no address either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub addr: Option<IpAddr>,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn none() -> Self {
        Self {
            addr: None,
            port: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.addr, self.port) {
            (Some(addr), Some(port)) => write!(f, "{addr}:{port}"),
            (Some(addr), None) => write!(f, "{addr}"),
            (None, Some(port)) => write!(f, "?:{port}"),
            (None, None) => write!(f, "?"),
        }
    }
}

/// The unit flowing through the pipeline after classification.
/// Immutable, passed by value between stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficRecord {
    #[serde(with = "unix_millis")]
    pub timestamp: SystemTime,
    pub protocol: ProtocolLabel,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub wire_len: u32,
    pub summary: String,
}

mod unix_millis {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Serializer;

    pub fn serialize<S>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = ts
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        serializer.serialize_u64(millis)
    }
}

/// Classify a decoded frame. Total: incomplete headers yield a record
/// labeled from the deepest successfully parsed layer, never a failure.
pub fn classify(frame: &RawFrame, headers: &DecodedHeaders) -> TrafficRecord {
    let (src, dst) = endpoints(headers);
    let protocol = label(headers);
    let summary = summarize(protocol, headers, &src, &dst);

    TrafficRecord {
        timestamp: frame.timestamp,
        protocol,
        src,
        dst,
        wire_len: frame.wire_len,
        summary,
    }
}

/// Fixed port-to-label table, applied when no application header was parsed.
/// DNS rides UDP only; port 53 over TCP stays TCP.
fn port_label(transport: &TransportHeader) -> Option<ProtocolLabel> {
    match transport {
        TransportHeader::Udp {
            src_port, dst_port, ..
        } if *src_port == 53 || *dst_port == 53 => Some(ProtocolLabel::Dns),
        TransportHeader::Tcp {
            src_port, dst_port, ..
        } => match (*src_port, *dst_port) {
            (80 | 8080, _) | (_, 80 | 8080) => Some(ProtocolLabel::Http),
            (443, _) | (_, 443) => Some(ProtocolLabel::Tls),
            _ => None,
        },
        _ => None,
    }
}

fn label(headers: &DecodedHeaders) -> ProtocolLabel {
    if let Some(app) = &headers.app {
        return match app {
            AppHeader::Dns { .. } => ProtocolLabel::Dns,
            AppHeader::Http { .. } => ProtocolLabel::Http,
            AppHeader::Tls { .. } => ProtocolLabel::Tls,
        };
    }
    if let Some(transport) = &headers.transport {
        if let Some(by_port) = port_label(transport) {
            return by_port;
        }
        return match transport {
            TransportHeader::Tcp { .. } => ProtocolLabel::Tcp,
            TransportHeader::Udp { .. } => ProtocolLabel::Udp,
            TransportHeader::Icmp { .. } => ProtocolLabel::Icmp,
        };
    }
    if let Some(network) = &headers.network {
        return match network {
            NetworkHeader::Ipv4 { .. } => ProtocolLabel::Ipv4,
            NetworkHeader::Ipv6 { .. } => ProtocolLabel::Ipv6,
            NetworkHeader::Arp { .. } => ProtocolLabel::Arp,
        };
    }
    ProtocolLabel::Unknown
}

fn endpoints(headers: &DecodedHeaders) -> (Endpoint, Endpoint) {
    let (src_addr, dst_addr) = match &headers.network {
        Some(NetworkHeader::Ipv4 { src, dst, .. }) => {
            (Some(IpAddr::V4(*src)), Some(IpAddr::V4(*dst)))
        }
        Some(NetworkHeader::Ipv6 { src, dst, .. }) => {
            (Some(IpAddr::V6(*src)), Some(IpAddr::V6(*dst)))
        }
        Some(NetworkHeader::Arp {
            sender_ip,
            target_ip,
            ..
        }) => (
            Some(IpAddr::V4(*sender_ip)),
            Some(IpAddr::V4(*target_ip)),
        ),
        None => (None, None),
    };

    (
        Endpoint {
            addr: src_addr,
            port: headers.src_port(),
        },
        Endpoint {
            addr: dst_addr,
            port: headers.dst_port(),
        },
    )
}

fn summarize(
    protocol: ProtocolLabel,
    headers: &DecodedHeaders,
    src: &Endpoint,
    dst: &Endpoint,
) -> String {
    let detail = match (&headers.app, &headers.transport, &headers.network) {
        (Some(AppHeader::Dns { id, is_response, questions, answers }), _, _) => {
            if *is_response {
                format!("response 0x{id:04x} answers {answers}")
            } else {
                format!("query 0x{id:04x} questions {questions}")
            }
        }
        (Some(AppHeader::Http { start_line }), _, _) => start_line.clone(),
        (
            Some(AppHeader::Tls {
                version_major,
                version_minor,
                ..
            }),
            _,
            _,
        ) => format!("record v{version_major}.{version_minor}"),
        (None, Some(TransportHeader::Tcp { flags, .. }), _) => format!("flags {flags}"),
        (None, Some(TransportHeader::Udp { length, .. }), _) => format!("len {length}"),
        (None, Some(TransportHeader::Icmp { icmp_type, code }), _) => {
            format!("type {icmp_type} code {code}")
        }
        (None, None, Some(NetworkHeader::Arp { operation, .. })) => match operation {
            1 => "who-has".to_string(),
            2 => "is-at".to_string(),
            op => format!("op {op}"),
        },
        _ => "unclassified".to_string(),
    };

    format!("{protocol} {src} > {dst} {detail}")
}
