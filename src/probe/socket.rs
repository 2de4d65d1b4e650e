use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::MutableIpv4Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::IPV4_HEADER_SIZE;
use crate::error::TraceError;

/// Open the raw ICMP receive socket for a scan: bound to the wildcard
/// address, read/write timeouts taken from the per-probe wait. One socket
/// lives for the whole run and is owned by the producer.
pub fn open_recv_socket(ipv6: bool, wait: Duration) -> Result<Socket, TraceError> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(TraceError::Bind)?;
    socket.set_read_timeout(Some(wait)).map_err(TraceError::Bind)?;
    socket.set_write_timeout(Some(wait)).map_err(TraceError::Bind)?;

    let wildcard: SocketAddr = if ipv6 {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    socket
        .bind(&SockAddr::from(wildcard))
        .map_err(TraceError::Bind)?;

    Ok(socket)
}

/// Open a send socket for ICMP echo probes (raw, privileged).
pub fn open_icmp_send_socket(ipv6: bool) -> io::Result<Socket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };
    Socket::new(domain, Type::RAW, Some(protocol))
}

/// Open a raw IPv4 socket for UDP/TCP probes. The caller constructs the
/// full IPv4 header (IP_HDRINCL), which is how the per-probe TTL and IP id
/// are controlled on this path.
pub fn open_raw_ipv4_socket(proto: u8) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(proto as i32)))?;
    socket.set_header_included(true)?;
    Ok(socket)
}

/// Set the outbound TTL on an IPv4 ICMP send socket.
pub fn set_ttl(socket: &Socket, ttl: u8) -> io::Result<()> {
    socket.set_ttl(ttl as u32)
}

/// Set the outbound hop limit on an IPv6 send socket.
pub fn set_hop_limit(socket: &Socket, hops: u8) -> io::Result<()> {
    socket.set_unicast_hops_v6(hops as u32)
}

/// Send pre-built ICMP message bytes to the target.
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr, port: u16) -> io::Result<usize> {
    let addr = SocketAddr::new(target, port);
    socket.send_to(packet, &SockAddr::from(addr))
}

/// Build the outer IPv4 header around a transport segment and send it in
/// one shot over an IP_HDRINCL socket.
#[allow(clippy::too_many_arguments)]
pub fn send_ipv4_raw(
    socket: &Socket,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ttl: u8,
    ip_id: u16,
    segment: &[u8],
    port: u16,
) -> io::Result<usize> {
    let total_len = IPV4_HEADER_SIZE + segment.len();
    let mut buffer = vec![0u8; total_len];

    {
        let mut ip = MutableIpv4Packet::new(&mut buffer).unwrap();
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_SIZE / 4) as u8);
        ip.set_total_length(total_len as u16);
        ip.set_identification(ip_id);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocol::new(proto));
        ip.set_source(src);
        ip.set_destination(dst);
        let cksum = pnet::packet::ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(cksum);
    }
    buffer[IPV4_HEADER_SIZE..].copy_from_slice(segment);

    let addr = SocketAddr::new(IpAddr::V4(dst), port);
    socket.send_to(&buffer, &SockAddr::from(addr))
}

/// Receive one raw frame. For IPv4 raw sockets the buffer holds a whole IP
/// datagram; for ICMPv6 the kernel strips the IPv6 header, so the source
/// address from the sockaddr is the only way to identify the responder.
pub fn recv_frame(socket: &Socket, buffer: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
    let uninit: &mut [MaybeUninit<u8>] = unsafe {
        std::slice::from_raw_parts_mut(buffer.as_mut_ptr() as *mut MaybeUninit<u8>, buffer.len())
    };

    let (len, addr) = socket.recv_from(uninit)?;
    Ok((len, addr.as_socket().map(|s| s.ip())))
}

/// Local address the kernel would route from for this target, discovered by
/// dialing a UDP socket (no packets are sent).
pub fn detect_source_ip(target: IpAddr) -> Result<IpAddr, TraceError> {
    let domain = if target.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(TraceError::Bind)?;
    let addr = SocketAddr::new(target, 80);
    socket
        .connect(&SockAddr::from(addr))
        .map_err(TraceError::Bind)?;
    let local = socket.local_addr().map_err(TraceError::Bind)?;
    local
        .as_socket()
        .map(|s| s.ip())
        .ok_or_else(|| TraceError::resolution("failed to read local socket address"))
}

/// True when the error is the receive timeout rather than a real failure.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
