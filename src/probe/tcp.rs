//! TCP SYN probe construction.
//!
//! Routers along the path answer the SYN with ICMP Time Exceeded; the
//! embedded IP id and ports carry the probe identity back.

use std::net::Ipv4Addr;

use super::{inet_checksum, IPPROTO_TCP};

/// TCP header length in bytes including options (data offset = 11 words)
pub const TCP_HEADER_SIZE: usize = 44;

/// Destination port for TCP probes, same convention as UDP
pub const TCP_PROBE_PORT: u16 = 33434;

const TCP_FLAG_SYN: u8 = 0x02;
const DATA_OFFSET_WORDS: u8 = 11;

/// Build a TCP SYN probe segment with the standard option block
/// (MSS 1460, window scale 5, SACK permitted, timestamps) padded out to the
/// declared 44-byte header. The pseudo-header checksum is filled in.
pub fn build_tcp_syn(
    src_port: u16,
    dst_port: u16,
    initial_seq: u32,
    tsval: u32,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut segment = vec![0u8; TCP_HEADER_SIZE];

    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
    segment[4..8].copy_from_slice(&initial_seq.to_be_bytes());
    // bytes 8..12: acknowledgment, zero for a bare SYN

    segment[12] = DATA_OFFSET_WORDS << 4;
    segment[13] = TCP_FLAG_SYN;
    segment[14..16].copy_from_slice(&0xFFFFu16.to_be_bytes());
    // bytes 16..18: checksum, set below; 18..20: urgent pointer, zero

    // Options, in order: MSS 1460, window scale 5, SACK permitted,
    // timestamps (TSval, TSecr=0), end of option list.
    let mut o = 20;
    segment[o..o + 4].copy_from_slice(&[2, 4, 0x05, 0xb4]);
    o += 4;
    segment[o..o + 3].copy_from_slice(&[3, 3, 5]);
    o += 3;
    segment[o..o + 2].copy_from_slice(&[4, 2]);
    o += 2;
    segment[o..o + 2].copy_from_slice(&[8, 10]);
    segment[o + 2..o + 6].copy_from_slice(&tsval.to_be_bytes());
    // TSecr stays zero: nothing to echo on an initial SYN
    o += 10;
    segment[o] = 0;
    // remainder stays zero-padded up to the declared header length

    let cksum = tcp_checksum(&segment, src_ip, dst_ip);
    segment[16..18].copy_from_slice(&cksum.to_be_bytes());

    segment
}

/// Checksum over the IPv4 pseudo-header (src, dst, zero, protocol, TCP
/// length) concatenated with the TCP segment.
pub(crate) fn tcp_checksum(segment: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> u16 {
    let mut data = Vec::with_capacity(12 + segment.len());
    data.extend_from_slice(&src_ip.octets());
    data.extend_from_slice(&dst_ip.octets());
    data.push(0);
    data.push(IPPROTO_TCP);
    data.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    data.extend_from_slice(segment);
    inet_checksum(&data)
}
