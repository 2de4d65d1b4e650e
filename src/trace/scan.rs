use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::TraceError;
use crate::lookup::whois::lookup_many;
use crate::lookup::{AsnCache, PrefixInfoClient, PtrLookup, RipeStatClient};
use crate::output::HopResult;
use crate::probe::socket::open_recv_socket;
use crate::trace::tracer::Tracer;

/// Pause between probes within a continuous cycle.
const PROBE_PAUSE: Duration = Duration::from_millis(100);
/// Pause between continuous cycles.
const CYCLE_PAUSE: Duration = Duration::from_secs(1);

impl Tracer {
    /// Single-pass scan: one `Vec<HopResult>` of `retries` probes per hop
    /// distance, delivered over a bounded channel in strictly increasing
    /// hop order. The scan stops after the batch that reached the target,
    /// hit a fatal error, or exhausted `max_ttl`.
    ///
    /// The receive socket is bound here so privilege problems surface
    /// before the producer starts. Dropping the receiver cancels the scan:
    /// the producer sees the closed channel on its next send and unwinds,
    /// releasing the socket.
    pub fn run(mut self, retries: usize) -> Result<mpsc::Receiver<Vec<HopResult>>, TraceError> {
        let rx_socket = open_recv_socket(self.dest_ip.is_ipv6(), self.config.wait)?;
        let handle = runtime_handle()?;
        let client = self.whois_client();
        let cache = AsnCache::new();
        let (tx, rx) = mpsc::channel::<Vec<HopResult>>(1);

        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ptr = {
                    let _guard = handle.enter();
                    PtrLookup::new()
                };

                for h in 1..=self.config.max_ttl {
                    let mut batch = Vec::with_capacity(retries);
                    for _ in 0..retries {
                        let hop = self.next_hop(&rx_socket, h, &handle, &mut ptr);
                        let fatal = hop.err.is_some();
                        batch.push(hop);
                        if fatal {
                            break;
                        }
                    }

                    if let Some(client) = &client {
                        enrich_batch(&handle, client, &cache, &mut batch);
                    }

                    let stop = batch.iter().any(|r| r.last || r.err.is_some());
                    if tx.blocking_send(batch).is_err() {
                        debug!("scan consumer went away, stopping");
                        break;
                    }
                    if stop {
                        break;
                    }
                }
            }));
            // The receive socket unbinds here on every path
            if result.is_err() {
                error!("scan producer panicked");
            }
        });

        Ok(rx)
    }

    /// Continuous scan: individual `HopResult`s in hop-cycle order,
    /// repeating until `report_count` cycles complete (or forever when
    /// unbounded). Once a cycle reaches the target, later cycles stop at
    /// that hop distance.
    ///
    /// ASN enrichment is fire-and-forget: a newly seen router is looked up
    /// on a helper task and the result attaches to later sightings only.
    pub fn run_continuous(mut self) -> Result<mpsc::Receiver<HopResult>, TraceError> {
        let rx_socket = open_recv_socket(self.dest_ip.is_ipv6(), self.config.wait)?;
        let handle = runtime_handle()?;
        let client = self.whois_client();
        let cache = AsnCache::new();
        let (tx, rx) = mpsc::channel::<HopResult>(1);

        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ptr = {
                    let _guard = handle.enter();
                    PtrLookup::new()
                };
                let mut cur_max_ttl = self.config.max_ttl;
                let mut cycles = 0;

                'outer: loop {
                    for h in 1..=cur_max_ttl {
                        let mut hop = self.next_hop(&rx_socket, h, &handle, &mut ptr);

                        if !hop.ip.is_empty() {
                            if let Some(whois) = cache.get(&hop.ip) {
                                hop.whois = whois;
                            } else if let Some(client) = &client {
                                spawn_enrichment(&handle, client, &cache, &hop.ip);
                            }
                        }

                        let reached = hop.last;
                        let fatal = hop.err.is_some();
                        if tx.blocking_send(hop).is_err() {
                            debug!("scan consumer went away, stopping");
                            break 'outer;
                        }
                        if fatal {
                            break 'outer;
                        }
                        if reached && cur_max_ttl == self.config.max_ttl {
                            cur_max_ttl = h;
                        }
                        thread::sleep(PROBE_PAUSE);
                    }

                    cycles += 1;
                    if self.config.count > 0 && cycles >= self.config.count {
                        break;
                    }
                    thread::sleep(CYCLE_PAUSE);
                }
            }));
            if result.is_err() {
                error!("scan producer panicked");
            }
        });

        Ok(rx)
    }

    /// Enrichment is best-effort: a client that cannot be built only
    /// costs the ASN column, never the scan.
    fn whois_client(&self) -> Option<Arc<dyn PrefixInfoClient>> {
        if !self.config.lookup_asn {
            return None;
        }
        match RipeStatClient::new() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("whois client unavailable: {e}");
                None
            }
        }
    }
}

fn runtime_handle() -> Result<Handle, TraceError> {
    Handle::try_current()
        .map_err(|_| TraceError::config("scans must be started from within a tokio runtime"))
}

/// Fill in whois data for every responder in a batch. Routers seen in an
/// earlier batch of the same run come out of the cache.
fn enrich_batch(
    handle: &Handle,
    client: &Arc<dyn PrefixInfoClient>,
    cache: &AsnCache,
    batch: &mut [HopResult],
) {
    let mut missing: Vec<String> = batch
        .iter()
        .filter(|r| !r.ip.is_empty() && cache.get(&r.ip).is_none())
        .map(|r| r.ip.clone())
        .collect();
    missing.sort();
    missing.dedup();

    if !missing.is_empty() {
        for (ip, whois) in handle.block_on(lookup_many(client, missing)) {
            cache.complete(&ip, Some(whois));
        }
    }

    for hop in batch.iter_mut() {
        if hop.ip.is_empty() {
            continue;
        }
        if let Some(whois) = cache.get(&hop.ip) {
            hop.whois = whois;
        }
    }
}

/// Kick off a single-flight background lookup for a newly seen router.
/// The lookup runs outside the cache lock; only the insert takes it.
fn spawn_enrichment(
    handle: &Handle,
    client: &Arc<dyn PrefixInfoClient>,
    cache: &Arc<AsnCache>,
    ip: &str,
) {
    if !cache.begin(ip) {
        return;
    }
    let client = client.clone();
    let cache = cache.clone();
    let ip = ip.to_string();
    handle.spawn(async move {
        let whois = client.lookup(&ip).await.ok();
        cache.complete(&ip, whois);
    });
}
