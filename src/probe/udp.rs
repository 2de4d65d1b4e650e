use super::{IPV4_HEADER_SIZE, UDP_HEADER_SIZE};

/// Destination port for UDP probes, the classic traceroute convention.
/// A single fixed port is used rather than the per-hop port ladder.
pub const UDP_PROBE_PORT: u16 = 33434;

/// Base source port; the tracer adds a jitter of 0, 100 or 200.
pub const UDP_SRC_PORT_BASE: u16 = 64000;

/// Build a UDP probe segment sized so IPv4 header + UDP header + payload
/// adds up to `packet_size`. The checksum is left zero, which is valid for
/// UDP over IPv4. Payload is zero bytes.
pub fn build_udp_probe(src_port: u16, dst_port: u16, packet_size: usize) -> Vec<u8> {
    let payload = packet_size.saturating_sub(IPV4_HEADER_SIZE + UDP_HEADER_SIZE);
    let mut segment = vec![0u8; UDP_HEADER_SIZE + payload];

    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
    segment[4..6].copy_from_slice(&((UDP_HEADER_SIZE + payload) as u16).to_be_bytes());
    // bytes 6..8 stay zero: no checksum

    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_probe_layout() {
        let segment = build_udp_probe(64100, UDP_PROBE_PORT, 52);
        // 52 total - 20 IPv4 header
        assert_eq!(segment.len(), 32);
        assert_eq!(u16::from_be_bytes([segment[0], segment[1]]), 64100);
        assert_eq!(u16::from_be_bytes([segment[2], segment[3]]), 33434);
        // Length covers header + payload
        assert_eq!(u16::from_be_bytes([segment[4], segment[5]]), 32);
        // Zero checksum is valid on IPv4
        assert_eq!(u16::from_be_bytes([segment[6], segment[7]]), 0);
        assert!(segment[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_udp_probe_header_only() {
        // packet_size exactly at the header floor leaves no payload
        let segment = build_udp_probe(64000, UDP_PROBE_PORT, 28);
        assert_eq!(segment.len(), UDP_HEADER_SIZE);
        assert_eq!(u16::from_be_bytes([segment[4], segment[5]]), 8);
    }

    #[test]
    fn test_udp_probe_undersized_clamps() {
        let segment = build_udp_probe(64000, UDP_PROBE_PORT, 10);
        assert_eq!(segment.len(), UDP_HEADER_SIZE);
    }
}
