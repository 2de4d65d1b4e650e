use std::collections::BTreeMap;
use std::io::Write;

/// Origin-AS information attached to a hop. Zero values mean the lookup
/// was disabled, failed, or has not completed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whois {
    pub holder: String,
    pub asn: u32,
}

/// One probe outcome at a given hop distance.
#[derive(Debug, Clone, Default)]
pub struct HopResult {
    /// Hop index, 1-based
    pub num: u8,
    /// PTR name (first if multiple); empty when unresolved or disabled
    pub name: String,
    /// Responding router address; empty on timeout
    pub ip: String,
    /// Round-trip time in milliseconds; 0 means timeout
    pub elapsed_ms: f64,
    /// True iff the responder is one of the target's resolved addresses
    pub last: bool,
    /// Set only on fatal I/O failures; terminates the scan run
    pub err: Option<String>,
    pub whois: Whois,
}

impl HopResult {
    pub fn timeout(num: u8) -> Self {
        HopResult {
            num,
            ..Default::default()
        }
    }

    pub fn failed(num: u8, err: String) -> Self {
        HopResult {
            num,
            err: Some(err),
            ..Default::default()
        }
    }

    /// Stable single-line JSON encoding for machine consumers.
    pub fn marshal(&self) -> String {
        format!(
            "{{ \"Id\": {}, \"Hop\": \"{}\", \"IP\": \"{}\", \"Elapsed\": {:.3}, \"Holder\": \"{}\", \"ASN\": {}, \"Last\": {} }}",
            self.num, self.name, self.ip, self.elapsed_ms, self.whois.holder, self.whois.asn, self.last
        )
    }
}

/// Consumes the result stream. Implementations never call back into the
/// tracer; dropping the stream is the only upstream signal.
pub trait Formatter {
    /// One single-pass batch (all probes at one TTL).
    fn batch(&mut self, batch: &[HopResult]);
    /// One continuous-mode result.
    fn hop(&mut self, hop: &HopResult);
    /// Stream ended.
    fn finish(&mut self) {}
}

/// Format a group of same-router results the way classic traceroute does:
/// the router label once (repeated after a timeout gap), then one RTT or
/// `*` per probe.
pub fn fmt_hops(group: &[HopResult]) -> String {
    let mut msg = String::new();
    let mut timeout = false;

    for r in group {
        if (msg.is_empty() || timeout) && !r.name.is_empty() {
            if r.whois.asn != 0 {
                let short_holder = r.whois.holder.split_whitespace().next().unwrap_or("");
                msg += &format!(
                    "{} ({}) [ASN {}/{}] ",
                    r.name, r.ip, r.whois.asn, short_holder
                );
            } else {
                msg += &format!("{} ({}) ", r.name, r.ip);
            }
        }
        if (msg.is_empty() || timeout) && r.name.is_empty() && r.elapsed_ms != 0.0 {
            if r.whois.asn != 0 {
                let short_holder = r.whois.holder.split_whitespace().next().unwrap_or("");
                msg += &format!("{} [ASN {}/{}] ", r.ip, r.whois.asn, short_holder);
            } else {
                msg += &format!("{} ", r.ip);
            }
        }
        if r.elapsed_ms != 0.0 {
            msg += &format!("{:.3} ms ", r.elapsed_ms);
            timeout = false;
        } else {
            msg += "* ";
            timeout = true;
        }
    }

    msg
}

/// Plain-text batch printer for single-pass scans.
pub struct PlainFormatter<W: Write> {
    writer: W,
}

impl<W: Write> PlainFormatter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> Formatter for PlainFormatter<W> {
    fn batch(&mut self, batch: &[HopResult]) {
        let Some(first) = batch.first() else {
            return;
        };

        // Answered probes first, then group per distinct responder so load
        // balancing across routes shows as separate columns
        let mut sorted: Vec<HopResult> = batch.to_vec();
        sorted.sort_by(|a, b| b.ip.len().cmp(&a.ip.len()));

        let mut groups: Vec<Vec<HopResult>> = Vec::new();
        for r in sorted {
            match groups.last_mut() {
                Some(g) if g[0].ip == r.ip => g.push(r),
                _ => groups.push(vec![r]),
            }
        }

        let line = groups
            .iter()
            .map(|g| fmt_hops(g))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(self.writer, "{:<2} {}", first.num, line.trim_end());
    }

    fn hop(&mut self, hop: &HopResult) {
        let _ = writeln!(self.writer, "{}", fmt_hops(std::slice::from_ref(hop)).trim_end());
    }
}

/// Running min/avg/max for one hop index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HopStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub sent: u64,
    pub received: u64,
}

impl HopStats {
    pub fn record(&mut self, elapsed_ms: f64) {
        self.sent += 1;
        if elapsed_ms == 0.0 {
            return;
        }
        self.received += 1;
        self.min = if self.min == 0.0 {
            elapsed_ms
        } else {
            self.min.min(elapsed_ms)
        };
        self.avg = if self.avg == 0.0 {
            elapsed_ms
        } else {
            (self.avg + elapsed_ms) / 2.0
        };
        self.max = self.max.max(elapsed_ms);
    }

    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - self.received as f64 / self.sent as f64) * 100.0
        }
    }
}

/// Continuous-mode consumer: streams each hop, then prints a per-hop
/// min/avg/max summary when the stream closes.
pub struct ReportFormatter<W: Write> {
    writer: W,
    streaming: bool,
    stats: BTreeMap<u8, HopStats>,
    labels: BTreeMap<u8, (String, String)>,
}

impl<W: Write> ReportFormatter<W> {
    pub fn new(writer: W, streaming: bool) -> Self {
        Self {
            writer,
            streaming,
            stats: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

impl<W: Write> Formatter for ReportFormatter<W> {
    fn batch(&mut self, batch: &[HopResult]) {
        for hop in batch {
            self.hop(hop);
        }
    }

    fn hop(&mut self, hop: &HopResult) {
        self.stats.entry(hop.num).or_default().record(hop.elapsed_ms);
        if !hop.ip.is_empty() {
            self.labels
                .insert(hop.num, (hop.name.clone(), hop.ip.clone()));
        }
        if self.streaming {
            let _ = writeln!(
                self.writer,
                "{:<2} {}",
                hop.num,
                fmt_hops(std::slice::from_ref(hop)).trim_end()
            );
        }
    }

    fn finish(&mut self) {
        let _ = writeln!(
            self.writer,
            "{:<2} {:<42} {:>6} {:>9} {:>9} {:>9}",
            "", "Host", "Loss%", "Min", "Avg", "Max"
        );
        for (num, stats) in &self.stats {
            let label = match self.labels.get(num) {
                Some((name, ip)) if !name.is_empty() => format!("{} ({})", name, ip),
                Some((_, ip)) => ip.clone(),
                None => "???".to_string(),
            };
            let _ = writeln!(
                self.writer,
                "{:<2} {:<42} {:>5.1}% {:>9.3} {:>9.3} {:>9.3}",
                num,
                label,
                stats.loss_pct(),
                stats.min,
                stats.avg,
                stats.max
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HopResult {
        HopResult {
            num: 5,
            name: "r.x".to_string(),
            ip: "1.2.3.4".to_string(),
            elapsed_ms: 12.345,
            last: false,
            err: None,
            whois: Whois {
                holder: "EXAMPLE AS".to_string(),
                asn: 64500,
            },
        }
    }

    #[test]
    fn test_marshal_exact() {
        assert_eq!(
            sample().marshal(),
            "{ \"Id\": 5, \"Hop\": \"r.x\", \"IP\": \"1.2.3.4\", \"Elapsed\": 12.345, \"Holder\": \"EXAMPLE AS\", \"ASN\": 64500, \"Last\": false }"
        );
    }

    #[test]
    fn test_marshal_is_valid_json() {
        let value: serde_json::Value = serde_json::from_str(&sample().marshal()).unwrap();
        assert_eq!(value["Id"], 5);
        assert_eq!(value["Elapsed"], 12.345);
        assert_eq!(value["ASN"], 64500);
        assert_eq!(value["Last"], false);
    }

    #[test]
    fn test_marshal_timeout() {
        let hop = HopResult::timeout(3);
        let value: serde_json::Value = serde_json::from_str(&hop.marshal()).unwrap();
        assert_eq!(value["IP"], "");
        assert_eq!(value["Elapsed"], 0.0);
    }

    #[test]
    fn test_fmt_hops_named_router() {
        let out = fmt_hops(&[sample()]);
        assert_eq!(out, "r.x (1.2.3.4) [ASN 64500/EXAMPLE] 12.345 ms ");
    }

    #[test]
    fn test_fmt_hops_timeouts() {
        let out = fmt_hops(&[
            HopResult::timeout(2),
            HopResult::timeout(2),
            HopResult::timeout(2),
        ]);
        assert_eq!(out, "* * * ");
    }

    #[test]
    fn test_fmt_hops_label_repeats_after_timeout() {
        let mut answered = sample();
        answered.whois = Whois::default();
        let out = fmt_hops(&[answered.clone(), HopResult::timeout(5), answered]);
        assert_eq!(out, "r.x (1.2.3.4) 12.345 ms * r.x (1.2.3.4) 12.345 ms ");
    }

    #[test]
    fn test_plain_formatter_groups_distinct_routers() {
        let mut a = sample();
        a.whois = Whois::default();
        a.name = String::new();
        let mut b = a.clone();
        b.ip = "10.9.9.99".to_string();
        b.elapsed_ms = 20.5;

        let mut buf = Vec::new();
        {
            let mut formatter = PlainFormatter::new(&mut buf);
            formatter.batch(&[a.clone(), b, a]);
        }
        let out = String::from_utf8(buf).unwrap();
        // Longer (distinct) addresses sort first; two groups on the line
        assert!(out.starts_with("5  10.9.9.99 20.500 ms"));
        assert!(out.contains("1.2.3.4 12.345 ms 12.345 ms"));
    }

    #[test]
    fn test_hop_stats_running_aggregates() {
        let mut stats = HopStats::default();
        stats.record(10.0);
        stats.record(0.0); // timeout
        stats.record(20.0);

        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.avg, 15.0);
        assert_eq!(stats.max, 20.0);
        assert!((stats.loss_pct() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_report_formatter_summary() {
        let mut buf = Vec::new();
        {
            let mut formatter = ReportFormatter::new(&mut buf, false);
            let mut hop = sample();
            hop.num = 1;
            formatter.hop(&hop);
            hop.elapsed_ms = 14.0;
            formatter.hop(&hop);
            formatter.finish();
        }
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("r.x (1.2.3.4)"));
        assert!(out.contains("12.345"));
    }
}
