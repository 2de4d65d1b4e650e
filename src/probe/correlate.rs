use std::net::{IpAddr, Ipv6Addr};

use pnet::packet::ipv4::Ipv4Packet;

use super::{inet_checksum, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};
use crate::config::ProbeMode;

// ICMPv4 types
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV4_DEST_UNREACHABLE: u8 = 3;
const ICMPV4_TIME_EXCEEDED: u8 = 11;
const ICMPV4_ECHO_REQUEST: u8 = 8;

// ICMPv6 types
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_ECHO_REQUEST: u8 = 128;

const IPV6_HEADER_LEN: usize = 40;

/// The outstanding probe a reply must be matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeIdentity {
    pub ttl: u8,
    pub icmp_id: u16,
    pub icmp_seq: u16,
    pub local_port: u16,
    pub remote_port: u16,
    pub ip_id: u16,
}

/// Reply classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded(u8),
    Unreachable(u8),
}

/// Probe identity recovered from the quoted original datagram inside an
/// ICMP error message.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedProbe {
    /// IP id of the original IPv4 datagram, 0 when absent or scrubbed
    pub ip_id: u16,
    /// Original destination, i.e. the address we probed
    pub dest: Option<IpAddr>,
    pub proto: u8,
    pub echo_id: u16,
    pub echo_seq: u16,
    pub src_port: u16,
    pub dst_port: u16,
}

/// A decoded incoming frame.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Responding router; for ICMPv6 the caller fills this from the
    /// recvfrom sockaddr since the kernel strips the IPv6 header.
    pub src: Option<IpAddr>,
    pub kind: ReplyKind,
    /// Echo id/seq when the frame is a direct echo reply
    pub echo_id: u16,
    pub echo_seq: u16,
    pub embedded: Option<EmbeddedProbe>,
}

impl Reply {
    /// The sequence number this frame carries, whether directly (echo
    /// reply) or quoted inside an error.
    fn carried_seq(&self) -> Option<u16> {
        match self.kind {
            ReplyKind::EchoReply => Some(self.echo_seq),
            _ => self
                .embedded
                .filter(|e| e.proto == IPPROTO_ICMP || e.proto == IPPROTO_ICMPV6)
                .map(|e| e.echo_seq),
        }
    }
}

/// Applies the per-mode correlation rules to decoded replies.
#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    pub mode: ProbeMode,
    pub dest: IpAddr,
    pub identity: ProbeIdentity,
}

impl Correlator {
    /// Decide whether a decoded frame answers the outstanding probe.
    ///
    /// ICMP mode: a checksummed echo reply with our id and seq, or an
    /// error quoting an echo request with our seq. UDP/TCP mode: an error
    /// quoting our destination together with our IP id, falling back to
    /// the quoted port pair when the id was scrubbed.
    pub fn matches(&self, reply: &Reply) -> bool {
        match self.mode {
            ProbeMode::Icmp => {
                if reply.kind == ReplyKind::EchoReply && reply.echo_id != self.identity.icmp_id {
                    return false;
                }
                reply.carried_seq() == Some(self.identity.icmp_seq)
            }
            ProbeMode::Udp | ProbeMode::Tcp => {
                let Some(embedded) = reply.embedded else {
                    return false;
                };
                if embedded.dest != Some(self.dest) {
                    return false;
                }
                embedded.ip_id == self.identity.ip_id
                    || (embedded.src_port == self.identity.local_port
                        && embedded.dst_port == self.identity.remote_port)
            }
        }
    }
}

/// Parse a whole IPv4 datagram received from the raw ICMP socket.
pub fn parse_reply_v4(data: &[u8]) -> Option<Reply> {
    let outer = Ipv4Packet::new(data)?;
    if outer.get_version() != 4 {
        return None;
    }
    let ihl = (outer.get_header_length() as usize) * 4;
    if ihl < 20 || data.len() < ihl + 8 {
        return None;
    }
    let src = IpAddr::V4(outer.get_source());

    let icmp_data = &data[ihl..];
    let icmp_type = icmp_data[0];
    let icmp_code = icmp_data[1];

    match icmp_type {
        ICMPV4_ECHO_REPLY => {
            // A forged or corrupted reply must not satisfy the correlator
            let folded = inet_checksum(icmp_data);
            if folded != 0 && folded != 0xFFFF {
                return None;
            }
            Some(Reply {
                src: Some(src),
                kind: ReplyKind::EchoReply,
                echo_id: u16::from_be_bytes([icmp_data[4], icmp_data[5]]),
                echo_seq: u16::from_be_bytes([icmp_data[6], icmp_data[7]]),
                embedded: None,
            })
        }
        ICMPV4_TIME_EXCEEDED | ICMPV4_DEST_UNREACHABLE => {
            let kind = if icmp_type == ICMPV4_TIME_EXCEEDED {
                ReplyKind::TimeExceeded(icmp_code)
            } else {
                ReplyKind::Unreachable(icmp_code)
            };
            let embedded = parse_embedded_v4(&icmp_data[8..])?;
            Some(Reply {
                src: Some(src),
                kind,
                echo_id: 0,
                echo_seq: 0,
                embedded: Some(embedded),
            })
        }
        _ => None,
    }
}

/// Parse the quoted original IPv4 header + first 8 transport bytes from an
/// ICMP error payload.
fn parse_embedded_v4(data: &[u8]) -> Option<EmbeddedProbe> {
    let original = Ipv4Packet::new(data)?;
    if original.get_version() != 4 {
        return None;
    }
    let ihl = (original.get_header_length() as usize) * 4;
    if ihl < 20 || data.len() < ihl + 8 {
        return None;
    }

    let mut embedded = EmbeddedProbe {
        ip_id: original.get_identification(),
        dest: Some(IpAddr::V4(original.get_destination())),
        proto: original.get_next_level_protocol().0,
        ..Default::default()
    };

    let transport = &data[ihl..];
    match embedded.proto {
        IPPROTO_ICMP => {
            if transport[0] != ICMPV4_ECHO_REQUEST {
                return None;
            }
            embedded.echo_id = u16::from_be_bytes([transport[4], transport[5]]);
            embedded.echo_seq = u16::from_be_bytes([transport[6], transport[7]]);
        }
        IPPROTO_UDP | IPPROTO_TCP => {
            embedded.src_port = u16::from_be_bytes([transport[0], transport[1]]);
            embedded.dst_port = u16::from_be_bytes([transport[2], transport[3]]);
        }
        _ => return None,
    }

    Some(embedded)
}

/// Parse a bare ICMPv6 message (the kernel strips the IPv6 header before
/// delivery on raw ICMPv6 sockets). `src` comes from the recvfrom sockaddr.
pub fn parse_reply_v6(icmp_data: &[u8], src: IpAddr) -> Option<Reply> {
    if icmp_data.len() < 8 {
        return None;
    }
    let icmp_type = icmp_data[0];
    let icmp_code = icmp_data[1];

    match icmp_type {
        ICMPV6_ECHO_REPLY => Some(Reply {
            src: Some(src),
            kind: ReplyKind::EchoReply,
            echo_id: u16::from_be_bytes([icmp_data[4], icmp_data[5]]),
            echo_seq: u16::from_be_bytes([icmp_data[6], icmp_data[7]]),
            embedded: None,
        }),
        ICMPV6_TIME_EXCEEDED | ICMPV6_DEST_UNREACHABLE => {
            let kind = if icmp_type == ICMPV6_TIME_EXCEEDED {
                ReplyKind::TimeExceeded(icmp_code)
            } else {
                ReplyKind::Unreachable(icmp_code)
            };
            let embedded = parse_embedded_v6(&icmp_data[8..])?;
            Some(Reply {
                src: Some(src),
                kind,
                echo_id: 0,
                echo_seq: 0,
                embedded: Some(embedded),
            })
        }
        _ => None,
    }
}

/// Parse the quoted original IPv6 header + first 8 transport bytes.
fn parse_embedded_v6(data: &[u8]) -> Option<EmbeddedProbe> {
    if data.len() < IPV6_HEADER_LEN + 8 {
        return None;
    }

    let next_header = data[6];
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&data[24..40]);

    let mut embedded = EmbeddedProbe {
        dest: Some(IpAddr::V6(Ipv6Addr::from(dst))),
        proto: next_header,
        ..Default::default()
    };

    let transport = &data[IPV6_HEADER_LEN..];
    match next_header {
        IPPROTO_ICMPV6 => {
            if transport[0] != ICMPV6_ECHO_REQUEST {
                return None;
            }
            embedded.echo_id = u16::from_be_bytes([transport[4], transport[5]]);
            embedded.echo_seq = u16::from_be_bytes([transport[6], transport[7]]);
        }
        IPPROTO_UDP | IPPROTO_TCP => {
            embedded.src_port = u16::from_be_bytes([transport[0], transport[1]]);
            embedded.dst_port = u16::from_be_bytes([transport[2], transport[3]]);
        }
        _ => return None,
    }

    Some(embedded)
}
