use clap::Parser;

/// Discover the router path to a target by walking the IP TTL
#[derive(Parser, Debug, Clone)]
#[command(name = "trace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host (IP address or hostname)
    #[arg(required = true)]
    pub target: String,

    /// Force IPv4 (target should be a hostname)
    #[arg(short = '4')]
    pub ipv4: bool,

    /// Force IPv6 (target should be a hostname)
    #[arg(short = '6')]
    pub ipv6: bool,

    /// Use UDP datagrams instead of ICMP echo
    #[arg(short = 'u')]
    pub udp: bool,

    /// Use TCP SYN probes instead of ICMP echo
    #[arg(short = 't')]
    pub tcp: bool,

    /// Maximum number of hops
    #[arg(short = 'm', default_value_t = 30)]
    pub max_ttl: u8,

    /// Number of scan cycles in continuous mode (-1 = unbounded)
    #[arg(short = 'c', default_value_t = -1, allow_negative_numbers = true)]
    pub count: i32,

    /// Probe packet size in bytes, inclusive of headers
    #[arg(short = 'p', default_value_t = 52)]
    pub packet_size: usize,

    /// Per-probe read timeout, e.g. "2s" or "500ms"
    #[arg(short = 'w', default_value = "2s")]
    pub wait: String,

    /// Do not map IP addresses to host names
    #[arg(short = 'n', long = "no-dns")]
    pub no_dns: bool,

    /// Do not map IP addresses to ASN and holder
    #[arg(long = "nr", alias = "no-asn")]
    pub no_asn: bool,

    /// Report mode: run a fixed number of cycles, then summarize
    #[arg(short = 'R')]
    pub report: bool,

    /// Real-time per-hop output while scanning
    #[arg(short = 'r')]
    pub realtime: bool,

    /// Terminal theme name
    #[arg(short = 'T', default_value = "default")]
    pub theme: String,

    /// Use kilometers for geographic distances
    #[arg(long = "km")]
    pub km: bool,
}
