mod cli;
mod error;
mod firewall;
mod iface;
mod lists;
mod registry;
mod resolver;
mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use error::Result;
use firewall::Firewall;
use registry::DomainRegistry;
use stats::StatsExporter;

/// Cadence of the statistics files.
const EXPORT_INTERVAL: Duration = Duration::from_secs(2);
/// Shutdown observation granularity of the main loop.
const TICK: Duration = Duration::from_secs(1);

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "ebaf=debug,info"
    } else if cli.quiet {
        "ebaf=warn"
    } else {
        "ebaf=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    firewall::check_capabilities()?;

    let iface = iface::select_interface(cli.interface.as_deref())?;

    firewall::raise_memlock_limit();
    let mut fw = Firewall::load()?;

    let mut counters = fw.take_stats()?;
    counters.reset()?;

    let blacklist = lists::load_blacklist()?;
    let whitelist = lists::load_whitelist();
    info!(
        seed_ips = blacklist.seed_ips.len(),
        domains = blacklist.domains.len(),
        patterns = whitelist.patterns.len(),
        "lists loaded"
    );

    let mut block_set = fw.take_block_set()?;
    let allow_set = fw.take_allow_set()?;

    // Literal blacklist addresses never expire; they go in before attach
    // so the very first packet sees them.
    for ip in &blacklist.seed_ips {
        if let Err(e) = block_set.insert(*ip) {
            warn!(%ip, error = %e, "failed to seed block set");
        }
    }

    let registry = Arc::new(DomainRegistry::new());
    for name in &blacklist.domains {
        if let Err(e) = registry.add(name) {
            warn!(domain = %name, error = %e, "domain not registered");
        }
    }

    fw.attach(&iface)?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    // Covers both SIGINT and SIGTERM (termination feature).
    ctrlc::set_handler(move || flag.store(false, Ordering::Relaxed))?;

    let resolver = resolver::spawn(
        registry.clone(),
        resolver::ResolverConfig {
            blacklist_domains: blacklist.domains,
            whitelist_patterns: whitelist.patterns,
        },
        block_set,
        allow_set,
        running.clone(),
    )?;

    let exporter = StatsExporter::new(counters, registry);
    info!(iface = %iface, "ebaf running");

    while running.load(Ordering::Relaxed) {
        exporter.write();
        let mut waited = Duration::ZERO;
        while waited < EXPORT_INTERVAL && running.load(Ordering::Relaxed) {
            thread::sleep(TICK);
            waited += TICK;
        }
    }

    info!("shutting down");
    // Bounded by the resolver's 1 s sleep slice plus any in-flight lookup.
    if resolver.join().is_err() {
        warn!("resolver thread panicked");
    }
    // Leave the files at their final values for external readers.
    exporter.write();
    fw.detach();
    Ok(())
}
