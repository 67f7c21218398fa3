use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, Ipv4Addr};

use dns_lookup::lookup_host;

/// Resolve a hostname or dotted-decimal literal to an IPv4 address.
pub fn resolve_dest(dest: &str) -> Result<Ipv4Addr> {
    let addrs = lookup_host(dest)?;

    addrs
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "no IPv4 address for host"))
}

/// Opening a raw ICMP socket requires an elevated process.
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// RFC 1071 internet checksum: the one's complement of the one's complement
/// sum of the buffer taken as big endian 16 bit words. An odd trailing byte
/// counts as a word with a zero low byte.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = data
        .chunks(2)
        .map(|word| match *word {
            [hi] => u32::from(u16::from_be_bytes([hi, 0])),
            [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
            _ => unreachable!(),
        })
        .fold(0u32, u32::wrapping_add);

    // Fold the carries back into the low 16 bits until none remain
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    !sum as u16
}

/// Write the checksum of `data` into its checksum field (bytes 2..4).
/// The field must hold zero when this is called.
pub fn write_checksum(data: &mut [u8]) {
    let sum = checksum(data);
    data[2..4].copy_from_slice(&sum.to_be_bytes());
}
