//! Integration tests for the configuration → tracer → output pipeline.
//!
//! These cover the flag surface, the tracer's pre-socket rejection paths
//! and the stable result encoding. No test opens a socket or queries the
//! system resolver.

use clap::Parser;
use std::time::Duration;

use hoptrace::cli::Args;
use hoptrace::config::{Config, ProbeMode};
use hoptrace::error::TraceError;
use hoptrace::output::{fmt_hops, HopResult, HopStats, Whois};
use hoptrace::trace::Tracer;

fn config_from(argv: &[&str]) -> Result<Config, TraceError> {
    let args = Args::parse_from(argv);
    Config::try_from(&args)
}

#[test]
fn test_flag_surface_to_config() {
    let config = config_from(&["trace", "example.com", "-u", "-m", "12", "-w", "500ms"]).unwrap();
    assert_eq!(config.mode, ProbeMode::Udp);
    assert_eq!(config.max_ttl, 12);
    assert_eq!(config.wait, Duration::from_millis(500));
    assert!(!config.continuous());
}

#[test]
fn test_report_mode_defaults_ten_cycles() {
    let config = config_from(&["trace", "8.8.8.8", "-R"]).unwrap();
    assert!(config.continuous());
    assert_eq!(config.count, 10);
}

#[test]
fn test_conflicting_probe_modes_rejected() {
    assert!(matches!(
        config_from(&["trace", "example.com", "-u", "-t"]),
        Err(TraceError::Config(_))
    ));
}

#[test]
fn test_undersized_packet_rejected() {
    assert!(matches!(
        config_from(&["trace", "example.com", "-p", "20"]),
        Err(TraceError::Config(_))
    ));
}

#[test]
fn test_lookup_toggles_map_to_config() {
    let config = config_from(&["trace", "example.com", "-n", "--nr"]).unwrap();
    assert!(!config.resolve_dns);
    assert!(!config.lookup_asn);
}

#[test]
fn test_family_floor_enforced_for_v6() {
    // 48 bytes of fixed headers on IPv6; 44 fits IPv4 but not IPv6
    let config = config_from(&["trace", "example.com", "-p", "44"]).unwrap();
    assert!(config.validate_for_family(false).is_ok());
    assert!(matches!(
        config.validate_for_family(true),
        Err(TraceError::Config(_))
    ));
}

#[test]
fn test_tracer_rejects_family_mismatch() {
    let config = Config {
        force_v6: true,
        ..Default::default()
    };
    // A v4 literal cannot satisfy a forced-v6 scan; construction stops at
    // address selection, before any socket is opened
    assert!(matches!(
        Tracer::new("127.0.0.1", config),
        Err(TraceError::Resolution(_))
    ));
}

#[test]
fn test_tracer_rejects_udp_over_v6() {
    let config = Config {
        mode: ProbeMode::Udp,
        ..Default::default()
    };
    // Rejected by the family check, before any socket is opened
    assert!(matches!(
        Tracer::new("::1", config),
        Err(TraceError::Config(_))
    ));
}

#[test]
fn test_timeout_results_are_consistent() {
    // elapsed == 0 and empty ip go together for timed-out probes
    let hop = HopResult::timeout(7);
    assert_eq!(hop.num, 7);
    assert_eq!(hop.elapsed_ms, 0.0);
    assert_eq!(hop.ip, "");
    assert!(!hop.last);
    assert!(hop.err.is_none());
}

#[test]
fn test_fatal_results_carry_the_error() {
    let hop = HopResult::failed(3, "send error: operation not permitted".to_string());
    assert!(hop.err.is_some());
    assert_eq!(hop.ip, "");
}

#[test]
fn test_marshal_stability() {
    let hop = HopResult {
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
    };
    assert_eq!(
        hop.marshal(),
        "{ \"Id\": 5, \"Hop\": \"r.x\", \"IP\": \"1.2.3.4\", \"Elapsed\": 12.345, \"Holder\": \"EXAMPLE AS\", \"ASN\": 64500, \"Last\": false }"
    );
}

#[test]
fn test_batch_rendering_with_partial_timeouts() {
    let answered = HopResult {
        num: 2,
        name: String::new(),
        ip: "10.0.0.1".to_string(),
        elapsed_ms: 4.2,
        ..Default::default()
    };
    let rendered = fmt_hops(&[answered, HopResult::timeout(2)]);
    assert_eq!(rendered, "10.0.0.1 4.200 ms * ");
}

#[test]
fn test_report_stats_accumulate_across_cycles() {
    let mut stats = HopStats::default();
    for elapsed in [5.0, 0.0, 7.0, 6.0] {
        stats.record(elapsed);
    }
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.received, 3);
    assert_eq!(stats.min, 5.0);
    assert_eq!(stats.max, 7.0);
    assert!((stats.loss_pct() - 25.0).abs() < f64::EPSILON);
}
