use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{checksum, IcmpCode, IcmpPacket, IcmpType, IcmpTypes};

use super::{ICMP_HEADER_SIZE, IPV4_HEADER_SIZE, IPV6_HEADER_SIZE};

/// ICMPv6 Echo Request type
pub const ICMPV6_ECHO_REQUEST: u8 = 128;

/// Build an ICMPv4 Echo Request sized so that IPv4 header + ICMP header +
/// payload adds up to `packet_size`. Payload is zero bytes.
pub fn build_echo_v4(identifier: u16, sequence: u16, packet_size: usize) -> Vec<u8> {
    let icmp_size = packet_size
        .saturating_sub(IPV4_HEADER_SIZE)
        .max(ICMP_HEADER_SIZE);
    let mut buffer = vec![0u8; icmp_size];

    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);

    let cksum = checksum(&IcmpPacket::new(&buffer).unwrap());
    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_checksum(cksum);

    buffer
}

/// Build an ICMPv6 Echo Request sized so that IPv6 header + ICMP header +
/// payload adds up to `packet_size`.
///
/// The checksum field is left zero: the message is sent through a raw
/// ICMPv6 socket and the kernel fills in the pseudo-header checksum.
pub fn build_echo_v6(identifier: u16, sequence: u16, packet_size: usize) -> Vec<u8> {
    let icmp_size = packet_size
        .saturating_sub(IPV6_HEADER_SIZE)
        .max(ICMP_HEADER_SIZE);
    let mut buffer = vec![0u8; icmp_size];

    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_icmp_type(IcmpType::new(ICMPV6_ECHO_REQUEST));
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::inet_checksum;

    #[test]
    fn test_echo_v4_layout() {
        let packet = build_echo_v4(0x1234, 7, 52);
        // 52 total - 20 IPv4 header
        assert_eq!(packet.len(), 32);
        assert_eq!(packet[0], 8); // Echo Request
        assert_eq!(packet[1], 0); // Code
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
    }

    #[test]
    fn test_echo_v4_checksum_verifies() {
        // Re-summing a checksummed message yields zero (0xFFFF before invert)
        let packet = build_echo_v4(0xBEEF, 42, 64);
        assert_eq!(inet_checksum(&packet), 0);
    }

    #[test]
    fn test_echo_v6_layout() {
        let packet = build_echo_v6(0x4242, 3, 60);
        // 60 total - 40 IPv6 header
        assert_eq!(packet.len(), 20);
        assert_eq!(packet[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        // Kernel computes the v6 checksum on send
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
    }

    #[test]
    fn test_echo_minimum_size() {
        // Undersized request still yields a full ICMP header
        let packet = build_echo_v4(1, 1, 0);
        assert_eq!(packet.len(), ICMP_HEADER_SIZE);
    }
}
