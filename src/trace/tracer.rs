use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use socket2::Socket;
use tokio::runtime::Handle;

use crate::config::{Config, ProbeMode};
use crate::error::TraceError;
use crate::lookup::PtrLookup;
use crate::output::HopResult;
use crate::probe::correlate::{parse_reply_v4, parse_reply_v6, Correlator, ProbeIdentity};
use crate::probe::socket::{
    is_timeout, open_icmp_send_socket, open_raw_ipv4_socket, recv_frame, send_icmp, send_ipv4_raw,
    set_hop_limit, set_ttl,
};
use crate::probe::{icmp, tcp, udp, IPPROTO_TCP, IPPROTO_UDP};

/// Base of the deterministic IPv4 id: `38840 + seq` lets the correlator
/// tell our probes from foreign traffic.
const IP_ID_BASE: u16 = 38840;

/// What came back for one probe.
pub(crate) enum ProbeOutcome {
    Matched { from: IpAddr },
    Timeout,
    /// Foreign frames exhausted the wait window; the last seen source is
    /// kept for diagnostics
    Wrong { from: Option<IpAddr> },
}

/// Path discovery state for one target.
pub struct Tracer {
    pub target_host: String,
    /// All addresses the target name resolved to, in resolver order
    pub resolved_ips: Vec<IpAddr>,
    /// Selected destination for this scan
    pub dest_ip: IpAddr,
    /// Local address the kernel routes from, for pseudo-header checksums
    pub src_ip: IpAddr,
    pub config: Config,
    /// Monotone probe sequence, unique for the lifetime of this tracer
    seq: u16,
    icmp_id: u16,
    rng: StdRng,
}

impl Tracer {
    /// Resolve the target and fix the address family. Surfaces
    /// `Resolution` and `Config` errors before any socket is opened.
    pub fn new(target: &str, config: Config) -> Result<Self, TraceError> {
        let resolved_ips = resolve(target)?;
        let dest_ip = select_dest(&resolved_ips, config.force_v4, config.force_v6)?;
        config.validate_for_family(dest_ip.is_ipv6())?;
        let src_ip = crate::probe::socket::detect_source_ip(dest_ip)?;

        Ok(Self {
            target_host: target.to_string(),
            resolved_ips,
            dest_ip,
            src_ip,
            config,
            seq: 0,
            icmp_id: std::process::id() as u16,
            rng: StdRng::from_entropy(),
        })
    }

    /// Identity of the next probe: bump the sequence, derive the IP id,
    /// pick the per-mode ports.
    fn next_identity(&mut self, ttl: u8) -> ProbeIdentity {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let (local_port, remote_port) = match self.config.mode {
            ProbeMode::Icmp => (0, 0),
            ProbeMode::Udp => (
                udp::UDP_SRC_PORT_BASE + self.rng.gen_range(0..3u16) * 100,
                udp::UDP_PROBE_PORT,
            ),
            ProbeMode::Tcp => (0, tcp::TCP_PROBE_PORT),
        };

        ProbeIdentity {
            ttl,
            icmp_id: self.icmp_id,
            icmp_seq: seq,
            local_port,
            remote_port,
            ip_id: IP_ID_BASE.wrapping_add(seq),
        }
    }

    /// Build and emit one probe. A fresh send socket per probe keeps the
    /// TTL setting scoped to that probe.
    fn send_probe(&mut self, identity: &ProbeIdentity) -> Result<(), TraceError> {
        match (self.config.mode, self.dest_ip) {
            (ProbeMode::Icmp, IpAddr::V4(_)) => {
                let socket = open_icmp_send_socket(false).map_err(TraceError::Send)?;
                set_ttl(&socket, identity.ttl).map_err(TraceError::Send)?;
                let packet = icmp::build_echo_v4(
                    identity.icmp_id,
                    identity.icmp_seq,
                    self.config.packet_size,
                );
                send_icmp(&socket, &packet, self.dest_ip, identity.remote_port)
                    .map_err(TraceError::Send)?;
            }
            (ProbeMode::Icmp, IpAddr::V6(_)) => {
                let socket = open_icmp_send_socket(true).map_err(TraceError::Send)?;
                set_hop_limit(&socket, identity.ttl).map_err(TraceError::Send)?;
                let packet = icmp::build_echo_v6(
                    identity.icmp_id,
                    identity.icmp_seq,
                    self.config.packet_size,
                );
                send_icmp(&socket, &packet, self.dest_ip, identity.remote_port)
                    .map_err(TraceError::Send)?;
            }
            (ProbeMode::Udp, IpAddr::V4(dst)) => {
                let socket = open_raw_ipv4_socket(IPPROTO_UDP).map_err(TraceError::Send)?;
                let segment = udp::build_udp_probe(
                    identity.local_port,
                    identity.remote_port,
                    self.config.packet_size,
                );
                send_ipv4_raw(
                    &socket,
                    self.src_v4(),
                    dst,
                    IPPROTO_UDP,
                    identity.ttl,
                    identity.ip_id,
                    &segment,
                    identity.remote_port,
                )
                .map_err(TraceError::Send)?;
            }
            (ProbeMode::Tcp, IpAddr::V4(dst)) => {
                let socket = open_raw_ipv4_socket(IPPROTO_TCP).map_err(TraceError::Send)?;
                let tsval = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as u32;
                let segment = tcp::build_tcp_syn(
                    identity.local_port,
                    identity.remote_port,
                    self.rng.gen(),
                    tsval,
                    self.src_v4(),
                    dst,
                );
                send_ipv4_raw(
                    &socket,
                    self.src_v4(),
                    dst,
                    IPPROTO_TCP,
                    identity.ttl,
                    identity.ip_id,
                    &segment,
                    identity.remote_port,
                )
                .map_err(TraceError::Send)?;
            }
            // Rejected in Config::validate_for_family
            (_, IpAddr::V6(_)) => {
                return Err(TraceError::config("udp/tcp probes are IPv4 only"));
            }
        }
        Ok(())
    }

    fn src_v4(&self) -> Ipv4Addr {
        match self.src_ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Drain the receive socket until a frame matches the outstanding
    /// probe or the wait window closes. Read errors are not fatal: the
    /// hop shows as a timeout and the scan moves on.
    fn await_reply(&self, rx: &Socket, correlator: &Correlator) -> ProbeOutcome {
        let started = Instant::now();
        let mut buffer = [0u8; 512];
        let mut foreign: Option<IpAddr> = None;

        loop {
            match recv_frame(rx, &mut buffer) {
                Ok((len, from)) => {
                    let reply = if self.dest_ip.is_ipv4() {
                        parse_reply_v4(&buffer[..len])
                    } else {
                        from.and_then(|src| parse_reply_v6(&buffer[..len], src))
                    };

                    match reply {
                        Some(reply) if correlator.matches(&reply) => {
                            let from = reply.src.or(from);
                            if let Some(from) = from {
                                return ProbeOutcome::Matched { from };
                            }
                        }
                        Some(reply) => foreign = reply.src.or(from).or(foreign),
                        None => {}
                    }
                }
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    debug!("receive failed at seq {}: {e}", correlator.identity.icmp_seq);
                    return ProbeOutcome::Timeout;
                }
            }

            if started.elapsed() >= self.config.wait {
                return match foreign {
                    Some(from) => ProbeOutcome::Wrong { from: Some(from) },
                    None => ProbeOutcome::Timeout,
                };
            }
        }
    }

    /// Probe one hop distance: emit a probe at this TTL, wait for the
    /// matching reply, measure the RTT and enrich with the PTR name.
    pub(crate) fn next_hop(
        &mut self,
        rx: &Socket,
        hop: u8,
        handle: &Handle,
        ptr: &mut PtrLookup,
    ) -> HopResult {
        let identity = self.next_identity(hop);
        let correlator = Correlator {
            mode: self.config.mode,
            dest: self.dest_ip,
            identity,
        };

        if let Err(e) = self.send_probe(&identity) {
            return HopResult::failed(hop, e.to_string());
        }
        let sent_at = Instant::now();

        let from = match self.await_reply(rx, &correlator) {
            ProbeOutcome::Matched { from } => from,
            ProbeOutcome::Timeout => return HopResult::timeout(hop),
            ProbeOutcome::Wrong { from } => {
                debug!("wrong response at ttl {hop} from {from:?}");
                return HopResult::timeout(hop);
            }
        };
        let elapsed_ms = sent_at.elapsed().as_secs_f64() * 1e3;

        let name = if self.config.resolve_dns {
            handle.block_on(ptr.lookup(from)).unwrap_or_default()
        } else {
            String::new()
        };

        HopResult {
            num: hop,
            name,
            ip: from.to_string(),
            elapsed_ms,
            last: self.resolved_ips.contains(&from),
            err: None,
            whois: Default::default(),
        }
    }
}

/// Resolve a target to its addresses; IP literals short-circuit.
fn resolve(target: &str) -> Result<Vec<IpAddr>, TraceError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let addrs: Vec<IpAddr> = (target, 0)
        .to_socket_addrs()
        .map_err(|e| TraceError::Resolution(format!("{target}: {e}")))?
        .map(|addr| addr.ip())
        .collect();

    if addrs.is_empty() {
        Err(TraceError::Resolution(format!(
            "no A or AAAA record for {target}"
        )))
    } else {
        Ok(addrs)
    }
}

/// First address the selected family allows: first IPv4 unless `-6`,
/// first IPv6 unless `-4`.
fn select_dest(ips: &[IpAddr], force_v4: bool, force_v6: bool) -> Result<IpAddr, TraceError> {
    for &ip in ips {
        if ip.is_ipv4() && !force_v6 {
            return Ok(ip);
        }
        if ip.is_ipv6() && !force_v4 {
            return Ok(ip);
        }
    }
    Err(TraceError::resolution(
        "no A or AAAA record matches the selected family",
    ))
}
