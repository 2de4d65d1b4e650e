use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use tokio::time::timeout;

/// Hard deadline for a single PTR query; late answers are discarded.
const PTR_DEADLINE: Duration = Duration::from_secs(1);

/// Reverse DNS lookup with a per-scan cache. The cache is owned by the
/// scan producer, so no locking is involved.
pub struct PtrLookup {
    resolver: TokioAsyncResolver,
    cache: HashMap<IpAddr, Option<String>>,
}

impl PtrLookup {
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            resolver,
            cache: HashMap::new(),
        }
    }

    /// PTR name for a router address, first record wins. Negative results
    /// are cached too so a dead resolver costs one deadline per router.
    pub async fn lookup(&mut self, ip: IpAddr) -> Option<String> {
        if let Some(cached) = self.cache.get(&ip) {
            return cached.clone();
        }

        let name = match timeout(PTR_DEADLINE, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(lookup)) => lookup
                .iter()
                .next()
                .map(|n| n.to_string().trim_end_matches('.').to_string()),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("ptr lookup for {ip} exceeded {PTR_DEADLINE:?}");
                None
            }
        };

        self.cache.insert(ip, name.clone());
        name
    }
}

impl Default for PtrLookup {
    fn default() -> Self {
        Self::new()
    }
}
