use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dns_types::protocol::types::{DomainName, ResourceRecord};

use crate::zone::{NameServer, ZoneServers};

/// How long a discovered zone stays usable.
pub const CACHE_LIFESPAN: Duration = Duration::from_secs(60 * 60);

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] zone cache lock poisoned, cannot recover from this - aborting";

/// The per-zone server cache, shared between every resolution running
/// against one client.  Readers take the shared half of the lock;
/// any task which obtains new servers for a zone takes the exclusive
/// half.
///
/// Invoking `clone` gives a new handle to the same underlying cache.
#[derive(Debug, Clone, Default)]
pub struct SharedZoneCache {
    inner: Arc<RwLock<HashMap<DomainName, CacheEntry>>>,
}

impl SharedZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a freshly discovered zone into the cache.  An expired
    /// entry for the same zone is replaced outright.
    pub fn update(&self, zone_servers: &ZoneServers) {
        let mut entries = self.inner.write().expect(LOCK_POISON_MESSAGE);
        match entries.get_mut(zone_servers.zone()) {
            Some(entry) if !entry.expired() => entry.absorb(zone_servers),
            _ => {
                let mut entry = CacheEntry::new(zone_servers.zone().clone());
                entry.absorb(zone_servers);
                entries.insert(zone_servers.zone().clone(), entry);
            }
        }
    }

    /// The deepest live entry whose zone serves the given name, if
    /// any.  Expired entries encountered along the way are purged.
    pub fn closest(&self, domain: &DomainName) -> Option<ZoneServers> {
        let mut stale = Vec::new();
        let found = {
            let entries = self.inner.read().expect(LOCK_POISON_MESSAGE);
            let mut best: Option<&CacheEntry> = None;
            for (zone, entry) in entries.iter() {
                if !domain.is_subdomain_of(zone) {
                    continue;
                }
                if entry.expired() {
                    stale.push(zone.clone());
                    continue;
                }
                if entry.servers.is_empty() {
                    continue;
                }
                match best {
                    Some(b) if zone.depth() <= b.zone.depth() => {}
                    _ => best = Some(entry),
                }
            }
            best.map(CacheEntry::zone_servers)
        };

        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "purging expired zone cache entries");
            let mut entries = self.inner.write().expect(LOCK_POISON_MESSAGE);
            for zone in stale {
                if entries.get(&zone).is_some_and(CacheEntry::expired) {
                    entries.remove(&zone);
                }
            }
        }

        found
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect(LOCK_POISON_MESSAGE).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The cached server set for one zone.  Hostnames are partitioned
/// into `resolved` and `unresolved`; discovering an address for an
/// unresolved hostname promotes it in the same exclusive-lock
/// critical section, so the partition is never observably split.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    zone: DomainName,
    servers: Vec<NameServer>,
    server_ips: HashSet<u32>,
    resolved: HashSet<DomainName>,
    unresolved: Vec<DomainName>,
    records: Vec<ResourceRecord>,
    record_digests: HashSet<String>,
    expires: Instant,
}

impl CacheEntry {
    fn new(zone: DomainName) -> Self {
        Self {
            zone,
            servers: Vec::new(),
            server_ips: HashSet::new(),
            resolved: HashSet::new(),
            unresolved: Vec::new(),
            records: Vec::new(),
            record_digests: HashSet::new(),
            expires: Instant::now() + CACHE_LIFESPAN,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.expires
    }

    fn absorb(&mut self, zone_servers: &ZoneServers) {
        for ns in zone_servers.servers() {
            let Some(ip) = ns.ip else { continue };
            if self.server_ips.insert(u32::from(ip)) {
                self.servers.push(ns.clone());
            }
            if self.resolved.insert(ns.domain.clone()) {
                self.unresolved.retain(|d| *d != ns.domain);
            }
        }

        for name in zone_servers.unresolved() {
            if !self.resolved.contains(name) && !self.unresolved.contains(name) {
                self.unresolved.push(name.clone());
            }
        }

        for rr in zone_servers.records() {
            if self.record_digests.insert(rr.digest()) {
                self.records.push(rr.clone());
            }
        }
    }

    /// Reconstruct a `ZoneServers` from this entry: the zone, its
    /// glued servers, the hostnames still waiting on glue, and the
    /// establishing records.
    pub fn zone_servers(&self) -> ZoneServers {
        let mut zone = ZoneServers::new(self.zone.clone());
        for ns in &self.servers {
            if let Some(ip) = ns.ip {
                zone.add_server(ns.domain.clone(), ip);
            }
        }
        for name in &self.unresolved {
            zone.add_unresolved(name.clone());
        }
        for rr in &self.records {
            zone.add_record(rr.clone());
        }
        zone
    }
}
