use serde::{Deserialize, Serialize};

use crate::util;

pub const ECHO_REQUEST: u8 = 8;
pub const ECHO_REPLY: u8 = 0;

/// ICMP echo header size on the wire.
pub const HEADER_SIZE: usize = 8;

/// Filler bytes carried behind the echo header.
pub const PAYLOAD_SIZE: usize = 20;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct EchoHeader {
    pub msg_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub header_checksum: u16,
    pub source: u32,
    pub destination: u32,
}

/// How an incoming datagram relates to this echo session.
#[derive(Debug, PartialEq)]
pub enum Classification {
    /// An echo reply carrying our identifier.
    Matched { sequence: u16, ttl: u8, byte_len: usize },
    /// Well-formed ICMP traffic that is not ours; a raw socket sees every
    /// ICMP datagram delivered to the host.
    Ignored,
    /// Too short to hold an ICMP header behind the IP header.
    Malformed,
}

// ICMP header words are big endian on the wire
fn coder() -> bincode::Config {
    let mut coder = bincode::config();
    coder.big_endian();
    coder
}

/// Build an echo request: header plus filler payload, with the checksum
/// computed over the whole buffer and written back into the header.
pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8; PAYLOAD_SIZE]) -> Vec<u8> {
    let header = EchoHeader {
        msg_type: ECHO_REQUEST,
        code: 0,
        checksum: 0,
        identifier,
        sequence,
    };

    let mut packet = coder()
        .serialize(&header)
        .expect("fixed-size header serialization cannot fail");
    packet.extend_from_slice(payload);

    util::write_checksum(&mut packet);
    packet
}

/// Classify a raw datagram (IP header included) against this session's
/// identifier.
pub fn parse_reply(datagram: &[u8], identifier: u16) -> Classification {
    let version_ihl = match datagram.first() {
        Some(byte) => *byte,
        None => {
            tracing::warn!("empty datagram on raw socket");
            return Classification::Malformed;
        }
    };

    // The IHL field counts 32 bit words
    let ip_header_len = usize::from(version_ihl & 0x0F) * 4;

    let byte_len = match datagram.len().checked_sub(ip_header_len) {
        Some(len) if len >= HEADER_SIZE => len,
        _ => {
            tracing::warn!(
                "invalid ICMP length: {} byte datagram, {} byte IP header",
                datagram.len(),
                ip_header_len
            );
            return Classification::Malformed;
        }
    };

    let ttl = match coder().deserialize::<Ipv4Header>(datagram) {
        Ok(ip_header) => ip_header.ttl,
        Err(err) => {
            tracing::warn!("undecodable IP header: {}", err);
            return Classification::Malformed;
        }
    };

    let echo = match coder().deserialize::<EchoHeader>(&datagram[ip_header_len..]) {
        Ok(echo) => echo,
        Err(err) => {
            tracing::warn!("undecodable ICMP header: {}", err);
            return Classification::Malformed;
        }
    };

    if echo.msg_type == ECHO_REPLY && echo.identifier == identifier {
        Classification::Matched {
            sequence: echo.sequence,
            ttl,
            byte_len,
        }
    } else {
        tracing::trace!("ignoring foreign ICMP datagram, type {}", echo.msg_type);
        Classification::Ignored
    }
}
