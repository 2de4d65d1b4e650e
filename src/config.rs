use std::time::Duration;

use crate::cli::Args;
use crate::error::TraceError;
use crate::probe::{ICMP_HEADER_SIZE, IPV4_HEADER_SIZE, IPV6_HEADER_SIZE};

/// Probe protocol. Modes are mutually exclusive; ICMP is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    #[default]
    Icmp,
    Udp,
    Tcp,
}

/// Runtime configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub force_v4: bool,
    pub force_v6: bool,
    pub mode: ProbeMode,
    /// Total probe size in bytes, inclusive of IP and transport headers
    pub packet_size: usize,
    pub max_ttl: u8,
    /// Probes per hop in single-pass mode
    pub retries: usize,
    /// Per-probe read timeout
    pub wait: Duration,
    pub resolve_dns: bool,
    pub lookup_asn: bool,
    /// Continuous-mode cycle limit; -1 = unbounded
    pub count: i32,
    pub report: bool,
    pub realtime: bool,
    pub theme: String,
    pub km: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            force_v4: false,
            force_v6: false,
            mode: ProbeMode::Icmp,
            packet_size: 52,
            max_ttl: 30,
            retries: 3,
            wait: Duration::from_secs(2),
            resolve_dns: true,
            lookup_asn: true,
            count: -1,
            report: false,
            realtime: false,
            theme: String::new(),
            km: false,
        }
    }
}

impl TryFrom<&Args> for Config {
    type Error = TraceError;

    fn try_from(args: &Args) -> Result<Self, TraceError> {
        if args.udp && args.tcp {
            return Err(TraceError::config("-u and -t are mutually exclusive"));
        }
        if args.ipv4 && args.ipv6 {
            return Err(TraceError::config("-4 and -6 are mutually exclusive"));
        }
        if args.ipv6 && (args.udp || args.tcp) {
            return Err(TraceError::config("udp/tcp probes are IPv4 only"));
        }

        let mode = if args.udp {
            ProbeMode::Udp
        } else if args.tcp {
            ProbeMode::Tcp
        } else {
            ProbeMode::Icmp
        };

        let wait = parse_duration(&args.wait)?;
        if wait.is_zero() {
            return Err(TraceError::config("wait must be greater than zero"));
        }

        // ICMP and UDP probes carry a sized payload; a packet smaller than
        // its headers would need a negative payload
        let floor = IPV4_HEADER_SIZE + ICMP_HEADER_SIZE;
        if matches!(mode, ProbeMode::Icmp | ProbeMode::Udp) && args.packet_size < floor {
            return Err(TraceError::Config(format!(
                "packet size {} below header overhead {}",
                args.packet_size, floor
            )));
        }

        // Report mode defaults to ten cycles when no count was given
        let count = if args.report && args.count < 0 {
            10
        } else {
            args.count
        };

        Ok(Self {
            force_v4: args.ipv4,
            force_v6: args.ipv6,
            mode,
            packet_size: args.packet_size,
            max_ttl: args.max_ttl,
            retries: 3,
            wait,
            resolve_dns: !args.no_dns,
            lookup_asn: !args.no_asn,
            count,
            report: args.report,
            realtime: args.realtime,
            theme: args.theme.clone(),
            km: args.km,
        })
    }
}

impl Config {
    /// Family-dependent size check, applied once the destination family is
    /// known. IPv6 carries a 40-byte IP header, so the floor moves.
    pub fn validate_for_family(&self, ipv6: bool) -> Result<(), TraceError> {
        if ipv6 && self.mode != ProbeMode::Icmp {
            return Err(TraceError::config("udp/tcp probes are IPv4 only"));
        }
        if ipv6 && self.packet_size < IPV6_HEADER_SIZE + ICMP_HEADER_SIZE {
            return Err(TraceError::Config(format!(
                "packet size {} below header overhead {}",
                self.packet_size,
                IPV6_HEADER_SIZE + ICMP_HEADER_SIZE
            )));
        }
        Ok(())
    }

    /// True when the scan should run in continuous (ping-style) mode.
    pub fn continuous(&self) -> bool {
        self.report || self.realtime || self.count >= 0
    }
}

/// Parse a duration string: one or more `<value><unit>` segments,
/// e.g. "2s", "500ms", "1m30s". Fractional values are accepted.
pub fn parse_duration(s: &str) -> Result<Duration, TraceError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TraceError::config("empty duration"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| TraceError::Config(format!("duration '{s}' is missing a unit")))?;
        if num_end == 0 {
            return Err(TraceError::Config(format!("invalid duration '{s}'")));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| TraceError::Config(format!("invalid duration '{s}'")))?;

        let unit_len = rest[num_end..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len() - num_end);
        let unit = &rest[num_end..num_end + unit_len];

        let secs = match unit {
            "ns" => value * 1e-9,
            "us" | "µs" => value * 1e-6,
            "ms" => value * 1e-3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => {
                return Err(TraceError::Config(format!(
                    "unknown duration unit '{unit}' in '{s}'"
                )))
            }
        };
        total += Duration::from_secs_f64(secs);
        rest = &rest[num_end + unit_len..];
    }

    Ok(total)
}
