use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dns_lookup::lookup_host;
use glob::Pattern;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::firewall::{AllowSet, BlockSet};
use crate::registry::DomainRegistry;

/// Time between full re-resolution passes.
pub const RESOLUTION_INTERVAL: Duration = Duration::from_secs(600);
/// Shutdown is observed at this granularity during the idle wait.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Static inputs of the resolver loop, taken from the list files at
/// startup. The blacklist names here are the file entries, which may be a
/// superset of what fit into the registry.
pub struct ResolverConfig {
    pub blacklist_domains: Vec<String>,
    pub whitelist_patterns: Vec<String>,
}

struct WhitelistMatcher {
    /// Every pattern, compiled; exact entries match only themselves.
    patterns: Vec<Pattern>,
    /// Wildcard-free entries, resolved directly each pass.
    exact: Vec<String>,
}

impl WhitelistMatcher {
    fn compile(raw: &[String]) -> Self {
        let mut patterns = Vec::new();
        let mut exact = Vec::new();
        for entry in raw {
            match Pattern::new(entry) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => {
                    warn!(pattern = %entry, error = %e, "ignoring malformed whitelist pattern");
                    continue;
                }
            }
            if !entry.contains(['*', '?', '[']) {
                exact.push(entry.clone());
            }
        }
        Self { patterns, exact }
    }

    fn matches(&self, domain: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(domain))
    }
}

/// Spawn the background resolver thread. Runs until `running` goes false.
pub fn spawn(
    registry: Arc<DomainRegistry>,
    config: ResolverConfig,
    block_set: BlockSet,
    allow_set: AllowSet,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("resolver".into())
        .spawn(move || run(&registry, &config, block_set, allow_set, &running))?;
    Ok(handle)
}

fn run(
    registry: &DomainRegistry,
    config: &ResolverConfig,
    mut block_set: BlockSet,
    mut allow_set: AllowSet,
    running: &AtomicBool,
) {
    let matcher = WhitelistMatcher::compile(&config.whitelist_patterns);
    info!(
        domains = registry.len(),
        patterns = matcher.patterns.len(),
        "resolver started"
    );

    while running.load(Ordering::Relaxed) {
        resolve_blacklist(registry, &mut block_set);
        // Allow passes run after the block pass within the iteration, so a
        // blacklisted-but-whitelisted domain ends up in both sets and the
        // classifier's rule order decides.
        resolve_whitelist_matches(&config.blacklist_domains, &matcher, &mut allow_set);
        resolve_exact_whitelist(&matcher, &mut allow_set);
        registry.update_drops(&block_set);

        idle(running);
    }
    info!("resolver stopped");
}

/// Re-resolve every registered domain and grow the block set with whatever
/// came back. A failure affects only that domain for this pass.
fn resolve_blacklist(registry: &DomainRegistry, block_set: &mut BlockSet) {
    for name in registry.names() {
        match resolve_ipv4(&name) {
            Ok(ips) => {
                registry.record_ips(&name, &ips);
                for ip in ips {
                    match block_set.insert(ip) {
                        Ok(true) => debug!(domain = %name, %ip, "blocking resolved address"),
                        Ok(false) => {}
                        Err(e) => warn!(domain = %name, %ip, error = %e, "block set insert failed"),
                    }
                }
            }
            Err(e) => debug!(domain = %name, error = %e, "resolution failed"),
        }
    }
}

/// Whitelist precedence: any blacklist file entry that glob-matches a
/// whitelist pattern gets its current addresses into the allow set.
fn resolve_whitelist_matches(
    blacklist_domains: &[String],
    matcher: &WhitelistMatcher,
    allow_set: &mut AllowSet,
) {
    for domain in blacklist_domains {
        if !matcher.matches(domain) {
            continue;
        }
        match resolve_ipv4(domain) {
            Ok(ips) => {
                for ip in ips {
                    debug!(%domain, %ip, "allowing whitelisted blacklist entry");
                    if let Err(e) = allow_set.insert(ip) {
                        warn!(%domain, %ip, error = %e, "allow set insert failed");
                    }
                }
            }
            Err(e) => debug!(%domain, error = %e, "resolution failed"),
        }
    }
}

/// Wildcard-free whitelist entries are plain domains; resolve them
/// directly into the allow set.
fn resolve_exact_whitelist(matcher: &WhitelistMatcher, allow_set: &mut AllowSet) {
    for name in &matcher.exact {
        match resolve_ipv4(name) {
            Ok(ips) => {
                for ip in ips {
                    if let Err(e) = allow_set.insert(ip) {
                        warn!(domain = %name, %ip, error = %e, "allow set insert failed");
                    }
                }
            }
            Err(e) => debug!(domain = %name, error = %e, "resolution failed"),
        }
    }
}

/// Resolve via the host resolver, keeping IPv4 results only.
fn resolve_ipv4(name: &str) -> io::Result<Vec<Ipv4Addr>> {
    let addrs = lookup_host(name)?;
    Ok(addrs
        .into_iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect())
}

/// Sleep for the resolution interval in short slices so a shutdown signal
/// is observed within a second.
fn idle(running: &AtomicBool) {
    let mut remaining = RESOLUTION_INTERVAL;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> WhitelistMatcher {
        let raw: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        WhitelistMatcher::compile(&raw)
    }

    #[test]
    fn star_matches_any_subdomain() {
        let m = matcher(&["*.example.com"]);
        assert!(m.matches("ads.example.com"));
        assert!(m.matches("a.b.example.com"));
        assert!(!m.matches("example.com"));
        assert!(!m.matches("example.org"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let m = matcher(&["ad?.example.com"]);
        assert!(m.matches("ads.example.com"));
        assert!(m.matches("ad1.example.com"));
        assert!(!m.matches("ad.example.com"));
    }

    #[test]
    fn character_classes_match_like_a_shell() {
        let m = matcher(&["ads[0-9].example.com"]);
        assert!(m.matches("ads3.example.com"));
        assert!(!m.matches("adsx.example.com"));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let m = matcher(&["cdn.example.com"]);
        assert!(m.matches("cdn.example.com"));
        assert!(!m.matches("x.cdn.example.com"));
        assert_eq!(m.exact, vec!["cdn.example.com"]);
    }

    #[test]
    fn wildcard_patterns_are_not_resolved_directly() {
        let m = matcher(&["*.example.com", "exact.example.net"]);
        assert_eq!(m.exact, vec!["exact.example.net"]);
        assert_eq!(m.patterns.len(), 2);
    }

    #[test]
    fn malformed_patterns_are_dropped() {
        // Unclosed character class fails to compile.
        let m = matcher(&["ads[.example.com", "*.example.com"]);
        assert_eq!(m.patterns.len(), 1);
        assert!(m.matches("ads.example.com"));
    }
}
