use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::error::{EbafError, Result};
use crate::firewall::BlockSet;

/// Upper bound on registered domains.
pub const MAX_DOMAINS: usize = 10_000;

#[derive(Debug)]
struct DomainEntry {
    name: String,
    /// Every address ever resolved for this domain, deduplicated. Entries
    /// live for the process lifetime; the kernel map may evict, the
    /// registry never forgets.
    resolved_ips: Vec<Ipv4Addr>,
    /// Last rollup of kernel drop counters across `resolved_ips`.
    drop_count: u64,
}

/// Thread-safe store of domains scheduled for periodic resolution.
///
/// One mutex guards the whole registry; every operation takes it for its
/// full duration, so no entry is freed or moved while another caller is
/// traversing.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    entries: Mutex<Vec<DomainEntry>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain. Idempotent: adding a name already present leaves
    /// the registry unchanged.
    pub fn add(&self, name: &str) -> Result<()> {
        let mut entries = self.lock();
        if entries.iter().any(|e| e.name == name) {
            return Ok(());
        }
        if entries.len() >= MAX_DOMAINS {
            return Err(EbafError::RegistryFull);
        }
        entries.push(DomainEntry {
            name: name.to_string(),
            resolved_ips: Vec::new(),
            drop_count: 0,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered names, cloned out so resolution happens off-lock.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Append newly observed addresses to a domain, skipping duplicates.
    /// Unknown names are silently ignored.
    pub fn record_ips(&self, name: &str, ips: &[Ipv4Addr]) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            for ip in ips {
                if !entry.resolved_ips.contains(ip) {
                    entry.resolved_ips.push(*ip);
                }
            }
        }
    }

    /// Last-observed drop count for a domain; 0 when unknown.
    pub fn get_drops(&self, name: &str) -> u64 {
        self.lock()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.drop_count)
            .unwrap_or(0)
    }

    /// Re-aggregate per-domain drop counts from the kernel map. The map
    /// read is non-blocking, so holding the lock across the rollup is fine.
    pub fn update_drops(&self, block_set: &BlockSet) {
        self.update_drops_with(|ip| block_set.drops(ip));
    }

    fn update_drops_with(&self, drops: impl Fn(Ipv4Addr) -> u64) {
        let mut entries = self.lock();
        for entry in entries.iter_mut() {
            entry.drop_count = entry.resolved_ips.iter().map(|ip| drops(*ip)).sum();
        }
    }

    /// Ordered `(name, drop_count)` pairs for domains that have dropped
    /// anything, for the statistics exporter.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .filter(|e| e.drop_count > 0)
            .map(|e| (e.name.clone(), e.drop_count))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DomainEntry>> {
        // A poisoned lock means a panic mid-operation; the data is append-
        // only counters and IPs, still safe to read.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn add_is_idempotent() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.add("ads.example.com").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn record_ips_deduplicates() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.record_ips("ads.example.com", &[ip(1, 2, 3, 4), ip(1, 2, 3, 4)]);
        registry.record_ips("ads.example.com", &[ip(1, 2, 3, 4), ip(5, 6, 7, 8)]);

        registry.update_drops_with(|_| 1);
        // Two distinct addresses at one drop each.
        assert_eq!(registry.get_drops("ads.example.com"), 2);
    }

    #[test]
    fn record_ips_ignores_unknown_names() {
        let registry = DomainRegistry::new();
        registry.record_ips("never.registered", &[ip(1, 2, 3, 4)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn drops_for_unknown_name_is_zero() {
        let registry = DomainRegistry::new();
        assert_eq!(registry.get_drops("nope.example.com"), 0);
    }

    #[test]
    fn update_drops_sums_over_resolved_ips() {
        let registry = DomainRegistry::new();
        registry.add("ads.example.com").unwrap();
        registry.record_ips("ads.example.com", &[ip(1, 2, 3, 4), ip(5, 6, 7, 8)]);

        registry.update_drops_with(|addr| if addr == ip(1, 2, 3, 4) { 10 } else { 32 });
        assert_eq!(registry.get_drops("ads.example.com"), 42);
    }

    #[test]
    fn snapshot_skips_zero_drop_domains() {
        let registry = DomainRegistry::new();
        registry.add("quiet.example.com").unwrap();
        registry.add("noisy.example.com").unwrap();
        registry.record_ips("noisy.example.com", &[ip(1, 2, 3, 4)]);

        registry.update_drops_with(|_| 7);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot, vec![("noisy.example.com".to_string(), 7)]);
    }

    #[test]
    fn capacity_is_enforced() {
        let registry = DomainRegistry::new();
        for i in 0..MAX_DOMAINS {
            registry.add(&format!("d{i}.example.com")).unwrap();
        }
        assert!(matches!(
            registry.add("one.too.many"),
            Err(EbafError::RegistryFull)
        ));
        // Re-adding an existing name still succeeds at capacity.
        registry.add("d0.example.com").unwrap();
    }
}
