use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::firewall::StatsCounters;
use crate::registry::DomainRegistry;

pub const STATS_FILE: &str = "ebaf-stats.dat";
pub const DOMAIN_STATS_FILE: &str = "ebaf-domain-stats.dat";

/// Writes the two statistics files for external readers (dashboard and
/// health checks). Single writer, whole-file overwrites, no locks; readers
/// tolerate the brief truncation window.
pub struct StatsExporter {
    counters: StatsCounters,
    registry: Arc<DomainRegistry>,
    stats_path: PathBuf,
    domain_stats_path: PathBuf,
}

impl StatsExporter {
    pub fn new(counters: StatsCounters, registry: Arc<DomainRegistry>) -> Self {
        let dir = std::env::temp_dir();
        Self {
            counters,
            registry,
            stats_path: dir.join(STATS_FILE),
            domain_stats_path: dir.join(DOMAIN_STATS_FILE),
        }
    }

    /// Write both files. Failures are logged and retried on the next tick;
    /// a bad read skips the write so the file never regresses to zero.
    pub fn write(&self) {
        match (self.counters.total(), self.counters.blocked()) {
            (Ok(total), Ok(blocked)) => {
                debug!(total, blocked, "exporting counters");
                if let Err(e) = fs::write(&self.stats_path, format_stats(total, blocked)) {
                    warn!(path = %self.stats_path.display(), error = %e, "stats write failed");
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to read aggregate counters");
            }
        }

        let body = format_domain_stats(&self.registry.snapshot());
        if let Err(e) = fs::write(&self.domain_stats_path, body) {
            warn!(path = %self.domain_stats_path.display(), error = %e, "domain stats write failed");
        }
    }
}

fn format_stats(total: u64, blocked: u64) -> String {
    format!("total: {total}\nblocked: {blocked}\n")
}

fn format_domain_stats(entries: &[(String, u64)]) -> String {
    let mut out = String::new();
    for (name, drops) in entries {
        let _ = writeln!(out, "{name}:{drops}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_file_has_two_labelled_lines() {
        assert_eq!(format_stats(1234, 56), "total: 1234\nblocked: 56\n");
    }

    #[test]
    fn fresh_counters_format_as_zero() {
        assert_eq!(format_stats(0, 0), "total: 0\nblocked: 0\n");
    }

    #[test]
    fn domain_stats_are_one_line_per_domain() {
        let entries = vec![
            ("ads.example.com".to_string(), 3),
            ("tracker.example.net".to_string(), 11),
        ];
        assert_eq!(
            format_domain_stats(&entries),
            "ads.example.com:3\ntracker.example.net:11\n"
        );
    }

    #[test]
    fn no_active_domains_means_an_empty_file() {
        assert_eq!(format_domain_stats(&[]), "");
    }
}
