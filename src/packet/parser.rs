//! Layer-by-layer frame decoder.
//!
//! Each helper validates its own minimum length against the captured byte
//! range before reading fields, then advances the shared offset. Unknown
//! layer-type values terminate the chain with the headers decoded so far
//! preserved; only length violations produce an error.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::{
    error::DecodeError,
    packet::types::{
        AppHeader, DecodedHeaders, EtherType, LinkHeader, NetworkHeader, RawFrame, TcpFlags,
        TransportHeader,
    },
};

const ETHERNET_LEN: usize = 14;
const IPV4_MIN_LEN: usize = 20;
const IPV6_LEN: usize = 40;
const ARP_ETH_IPV4_LEN: usize = 28;
const TCP_MIN_LEN: usize = 20;
const UDP_LEN: usize = 8;
const ICMP_MIN_LEN: usize = 4;
const DNS_HEADER_LEN: usize = 12;
const TLS_RECORD_HEADER_LEN: usize = 5;

const HTTP_START_TOKENS: [&str; 9] = [
    "GET ", "POST ", "PUT ", "HEAD ", "DELETE ", "OPTIONS ", "PATCH ", "CONNECT ", "HTTP/",
];
const HTTP_START_LINE_MAX: usize = 120;

/// Decode a raw frame into its layered headers.
pub fn decode(frame: &RawFrame) -> Result<DecodedHeaders, DecodeError> {
    let data = frame.data.as_slice();
    let mut offset = 0;

    let link = parse_ethernet(data, &mut offset)?;
    let LinkHeader::Ethernet { ether_type, .. } = link;

    let network = match ether_type {
        EtherType::Ipv4 => parse_ipv4(data, &mut offset)?,
        EtherType::Ipv6 => parse_ipv6(data, &mut offset)?,
        EtherType::Arp => {
            // ARP carries no deeper layer; a successful parse is a complete chain.
            let arp = parse_arp(data, &mut offset)?;
            return Ok(DecodedHeaders {
                link,
                network: Some(arp),
                transport: None,
                app: None,
                complete: true,
            });
        }
        EtherType::Unknown(_) => {
            return Ok(DecodedHeaders {
                link,
                network: None,
                transport: None,
                app: None,
                complete: false,
            });
        }
    };

    let Some(network) = network else {
        // Structurally invalid header length field (e.g. IHL < 5); the bytes
        // are within the capture, so this is a terminated chain, not an error.
        return Ok(DecodedHeaders {
            link,
            network: None,
            transport: None,
            app: None,
            complete: false,
        });
    };

    let protocol = match network {
        NetworkHeader::Ipv4 { protocol, .. } => protocol,
        NetworkHeader::Ipv6 { next_header, .. } => next_header,
        NetworkHeader::Arp { .. } => unreachable!("arp handled above"),
    };

    let transport = match protocol {
        6 => parse_tcp(data, &mut offset)?,
        17 => Some(parse_udp(data, &mut offset)?),
        1 | 58 => Some(parse_icmp(data, &mut offset)?),
        _ => {
            return Ok(DecodedHeaders {
                link,
                network: Some(network),
                transport: None,
                app: None,
                complete: false,
            });
        }
    };

    let Some(transport) = transport else {
        return Ok(DecodedHeaders {
            link,
            network: Some(network),
            transport: None,
            app: None,
            complete: false,
        });
    };

    // Application decoding is best-effort: a missing or short payload means
    // the chain simply ends at the transport layer.
    let app = parse_app(&data[offset.min(data.len())..], &transport);

    Ok(DecodedHeaders {
        link,
        network: Some(network),
        transport: Some(transport),
        app,
        complete: true,
    })
}

fn require(
    data: &[u8],
    offset: usize,
    len: usize,
    layer: &'static str,
) -> Result<(), DecodeError> {
    let needed = offset + len;
    if data.len() < needed {
        return Err(DecodeError::truncated(layer, needed, data.len()));
    }
    Ok(())
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn parse_ethernet(data: &[u8], offset: &mut usize) -> Result<LinkHeader, DecodeError> {
    require(data, *offset, ETHERNET_LEN, "link")?;

    let mut dst_mac = [0u8; 6];
    let mut src_mac = [0u8; 6];
    dst_mac.copy_from_slice(&data[*offset..*offset + 6]);
    src_mac.copy_from_slice(&data[*offset + 6..*offset + 12]);
    let ether_type = EtherType::from(read_u16(data, *offset + 12));

    *offset += ETHERNET_LEN;
    Ok(LinkHeader::Ethernet {
        src_mac,
        dst_mac,
        ether_type,
    })
}

/// Returns `None` for a structurally invalid IHL (< 5 words).
fn parse_ipv4(data: &[u8], offset: &mut usize) -> Result<Option<NetworkHeader>, DecodeError> {
    require(data, *offset, IPV4_MIN_LEN, "network")?;

    let header_len = (data[*offset] & 0x0F) * 4;
    if usize::from(header_len) < IPV4_MIN_LEN {
        return Ok(None);
    }
    require(data, *offset, usize::from(header_len), "network")?;

    let dscp = data[*offset + 1] >> 2;
    let ecn = data[*offset + 1] & 0x03;
    let total_len = read_u16(data, *offset + 2);
    let ttl = data[*offset + 8];
    let protocol = data[*offset + 9];
    let src = Ipv4Addr::new(
        data[*offset + 12],
        data[*offset + 13],
        data[*offset + 14],
        data[*offset + 15],
    );
    let dst = Ipv4Addr::new(
        data[*offset + 16],
        data[*offset + 17],
        data[*offset + 18],
        data[*offset + 19],
    );

    *offset += usize::from(header_len);
    Ok(Some(NetworkHeader::Ipv4 {
        src,
        dst,
        protocol,
        header_len,
        total_len,
        ttl,
        dscp,
        ecn,
    }))
}

fn parse_ipv6(data: &[u8], offset: &mut usize) -> Result<Option<NetworkHeader>, DecodeError> {
    require(data, *offset, IPV6_LEN, "network")?;

    let flow_label = read_u32(data, *offset) & 0x000F_FFFF;
    let next_header = data[*offset + 6];
    let hop_limit = data[*offset + 7];

    let mut src_bytes = [0u8; 16];
    let mut dst_bytes = [0u8; 16];
    src_bytes.copy_from_slice(&data[*offset + 8..*offset + 24]);
    dst_bytes.copy_from_slice(&data[*offset + 24..*offset + 40]);

    *offset += IPV6_LEN;
    Ok(Some(NetworkHeader::Ipv6 {
        src: Ipv6Addr::from(src_bytes),
        dst: Ipv6Addr::from(dst_bytes),
        next_header,
        hop_limit,
        flow_label,
    }))
}

fn parse_arp(data: &[u8], offset: &mut usize) -> Result<NetworkHeader, DecodeError> {
    require(data, *offset, ARP_ETH_IPV4_LEN, "network")?;

    let operation = read_u16(data, *offset + 6);
    let mut sender_mac = [0u8; 6];
    let mut target_mac = [0u8; 6];
    sender_mac.copy_from_slice(&data[*offset + 8..*offset + 14]);
    target_mac.copy_from_slice(&data[*offset + 18..*offset + 24]);
    let sender_ip = Ipv4Addr::new(
        data[*offset + 14],
        data[*offset + 15],
        data[*offset + 16],
        data[*offset + 17],
    );
    let target_ip = Ipv4Addr::new(
        data[*offset + 24],
        data[*offset + 25],
        data[*offset + 26],
        data[*offset + 27],
    );

    *offset += ARP_ETH_IPV4_LEN;
    Ok(NetworkHeader::Arp {
        operation,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    })
}

/// Returns `None` for a structurally invalid data offset (< 5 words).
fn parse_tcp(data: &[u8], offset: &mut usize) -> Result<Option<TransportHeader>, DecodeError> {
    require(data, *offset, TCP_MIN_LEN, "transport")?;

    let data_offset = usize::from(data[*offset + 12] >> 4) * 4;
    if data_offset < TCP_MIN_LEN {
        return Ok(None);
    }
    require(data, *offset, data_offset, "transport")?;

    let src_port = read_u16(data, *offset);
    let dst_port = read_u16(data, *offset + 2);
    let seq = read_u32(data, *offset + 4);
    let ack = read_u32(data, *offset + 8);
    let flags = TcpFlags(data[*offset + 13]);

    *offset += data_offset;
    Ok(Some(TransportHeader::Tcp {
        src_port,
        dst_port,
        seq,
        ack,
        flags,
    }))
}

fn parse_udp(data: &[u8], offset: &mut usize) -> Result<TransportHeader, DecodeError> {
    require(data, *offset, UDP_LEN, "transport")?;

    let src_port = read_u16(data, *offset);
    let dst_port = read_u16(data, *offset + 2);
    let length = read_u16(data, *offset + 4);

    *offset += UDP_LEN;
    Ok(TransportHeader::Udp {
        src_port,
        dst_port,
        length,
    })
}

fn parse_icmp(data: &[u8], offset: &mut usize) -> Result<TransportHeader, DecodeError> {
    require(data, *offset, ICMP_MIN_LEN, "transport")?;

    let icmp_type = data[*offset];
    let code = data[*offset + 1];

    *offset += ICMP_MIN_LEN;
    Ok(TransportHeader::Icmp { icmp_type, code })
}

fn parse_app(payload: &[u8], transport: &TransportHeader) -> Option<AppHeader> {
    match transport {
        TransportHeader::Udp {
            src_port, dst_port, ..
        } if *src_port == 53 || *dst_port == 53 => parse_dns(payload),
        TransportHeader::Tcp {
            src_port, dst_port, ..
        } if [src_port, dst_port].iter().any(|p| **p == 80 || **p == 8080) => parse_http(payload),
        TransportHeader::Tcp {
            src_port, dst_port, ..
        } if *src_port == 443 || *dst_port == 443 => parse_tls(payload),
        _ => None,
    }
}

fn parse_dns(payload: &[u8]) -> Option<AppHeader> {
    if payload.len() < DNS_HEADER_LEN {
        return None;
    }
    let id = read_u16(payload, 0);
    let is_response = payload[2] & 0x80 != 0;
    let questions = read_u16(payload, 4);
    let answers = read_u16(payload, 6);
    Some(AppHeader::Dns {
        id,
        is_response,
        questions,
        answers,
    })
}

fn parse_http(payload: &[u8]) -> Option<AppHeader> {
    let head = payload.get(..payload.len().min(HTTP_START_LINE_MAX))?;
    let text = std::str::from_utf8(head).ok()?;
    if !HTTP_START_TOKENS.iter().any(|t| text.starts_with(t)) {
        return None;
    }
    let start_line = text
        .split(['\r', '\n'])
        .next()
        .unwrap_or(text)
        .trim_end()
        .to_string();
    Some(AppHeader::Http { start_line })
}

fn parse_tls(payload: &[u8]) -> Option<AppHeader> {
    if payload.len() < TLS_RECORD_HEADER_LEN {
        return None;
    }
    let content_type = payload[0];
    let version_major = payload[1];
    let version_minor = payload[2];
    // Record types 20-23 (change_cipher_spec through application_data),
    // legacy version field always 0x03xx.
    if !(20..=23).contains(&content_type) || version_major != 3 || version_minor > 4 {
        return None;
    }
    Some(AppHeader::Tls {
        content_type,
        version_major,
        version_minor,
    })
}
