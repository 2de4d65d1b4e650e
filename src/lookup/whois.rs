//! Origin-AS enrichment through the RIPEstat prefix-overview service.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use ipnetwork::Ipv4Network;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::TraceError;
use crate::output::Whois;

const RIPESTAT_URL: &str = "https://stat.ripe.net/data/prefix-overview/data.json";

/// Deadline for one whois HTTP request.
const WHOIS_TIMEOUT: Duration = Duration::from_secs(3);

/// Abstract prefix-info service: one operation, mapping a router address
/// to the holder and origin AS of its covering BGP prefix.
#[async_trait]
pub trait PrefixInfoClient: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<Whois, TraceError>;
}

#[derive(Debug, Deserialize)]
struct PrefixOverview {
    data: PrefixData,
}

#[derive(Debug, Deserialize)]
struct PrefixData {
    asns: Vec<AsnRecord>,
}

#[derive(Debug, Deserialize)]
struct AsnRecord {
    holder: String,
    asn: u32,
}

/// RIPEstat-backed implementation.
pub struct RipeStatClient {
    client: reqwest::Client,
}

impl RipeStatClient {
    pub fn new() -> Result<Self, TraceError> {
        let client = reqwest::Client::builder()
            .timeout(WHOIS_TIMEOUT)
            .build()
            .map_err(|e| TraceError::Enrichment(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PrefixInfoClient for RipeStatClient {
    async fn lookup(&self, ip: &str) -> Result<Whois, TraceError> {
        let resource = widen_prefix(ip);

        let response: PrefixOverview = self
            .client
            .get(RIPESTAT_URL)
            .query(&[("resource", resource.as_str())])
            .send()
            .await
            .map_err(|e| TraceError::Enrichment(e.to_string()))?
            .json()
            .await
            .map_err(|e| TraceError::Enrichment(e.to_string()))?;

        let first = response
            .data
            .asns
            .first()
            .ok_or_else(|| TraceError::Enrichment(format!("no origin AS for {resource}")))?;

        Ok(Whois {
            holder: first.holder.clone(),
            asn: first.asn,
        })
    }
}

/// Widen a router address to its /24 prefix so adjacent interface
/// addresses share one query. IPv6 addresses are queried as-is.
fn widen_prefix(ip: &str) -> String {
    match ip.parse::<Ipv4Addr>() {
        Ok(v4) => match Ipv4Network::new(v4, 24) {
            Ok(network) => format!("{}/24", network.network()),
            Err(_) => ip.to_string(),
        },
        Err(_) => ip.to_string(),
    }
}

/// Look up a set of router addresses concurrently, tolerating individual
/// failures. Used for single-pass batch enrichment.
pub async fn lookup_many(
    client: &Arc<dyn PrefixInfoClient>,
    ips: Vec<String>,
) -> HashMap<String, Whois> {
    let futures: Vec<_> = ips
        .into_iter()
        .map(|ip| {
            let client = client.clone();
            async move { (ip.clone(), client.lookup(&ip).await.ok()) }
        })
        .collect();

    join_all(futures)
        .await
        .into_iter()
        .filter_map(|(ip, whois)| whois.map(|w| (ip, w)))
        .collect()
}

/// Shared ASN cache for continuous scans. Lookups happen outside the lock;
/// the in-flight set gives single-flight semantics so one slow prefix
/// query is issued once no matter how often its router answers.
#[derive(Default)]
pub struct AsnCache {
    entries: Mutex<HashMap<String, Whois>>,
    in_flight: Mutex<HashSet<String>>,
}

impl AsnCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, ip: &str) -> Option<Whois> {
        self.entries.lock().get(ip).cloned()
    }

    /// Claim an address for lookup. Returns false when the address is
    /// already cached or a lookup for it is in flight.
    pub fn begin(&self, ip: &str) -> bool {
        if self.entries.lock().contains_key(ip) {
            return false;
        }
        self.in_flight.lock().insert(ip.to_string())
    }

    /// Record a completed lookup and release the in-flight claim.
    pub fn complete(&self, ip: &str, whois: Option<Whois>) {
        if let Some(whois) = whois {
            self.entries.lock().insert(ip.to_string(), whois);
        }
        self.in_flight.lock().remove(ip);
    }
}
