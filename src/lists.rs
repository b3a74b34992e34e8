use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EbafError, Result};

pub const BLACKLIST_FILE: &str = "spotify-blacklist.txt";
pub const WHITELIST_FILE: &str = "spotify-whitelist.txt";

/// System-wide fallback directory, checked after the working directory.
const SYSTEM_LIST_DIR: &str = "/usr/local/share/ebaf";

/// DNS caps names at 255 octets; longer entries cannot resolve anyway.
const MAX_DOMAIN_LEN: usize = 255;

/// Parsed blacklist: literal addresses seed the block set once at startup,
/// domains go to the registry for periodic re-resolution.
#[derive(Debug, Default)]
pub struct Blacklist {
    pub seed_ips: Vec<Ipv4Addr>,
    pub domains: Vec<String>,
}

/// Whitelist patterns, verbatim. Compiled to globs at the use site.
#[derive(Debug, Default)]
pub struct Whitelist {
    pub patterns: Vec<String>,
}

fn list_candidates(file_name: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from(file_name),
        Path::new(SYSTEM_LIST_DIR).join(file_name),
    ]
}

fn find_list(file_name: &str) -> Option<PathBuf> {
    list_candidates(file_name).into_iter().find(|p| p.is_file())
}

/// One entry per line; `#` starts a comment; the first whitespace-delimited
/// token is the entry.
fn entries(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .filter_map(|line| line.split('#').next())
        .filter_map(|line| line.split_whitespace().next())
}

pub fn parse_blacklist(text: &str) -> Blacklist {
    let mut list = Blacklist::default();
    for entry in entries(text) {
        match entry.parse::<Ipv4Addr>() {
            Ok(ip) => list.seed_ips.push(ip),
            Err(_) => {
                if entry.len() > MAX_DOMAIN_LEN {
                    warn!(len = entry.len(), "skipping over-long blacklist entry");
                    continue;
                }
                list.domains.push(entry.to_string());
            }
        }
    }
    list
}

pub fn parse_whitelist(text: &str) -> Whitelist {
    Whitelist {
        patterns: entries(text).map(str::to_string).collect(),
    }
}

/// Load the blacklist from the documented search path. A missing blacklist
/// is setup-fatal: without it there is nothing to block.
pub fn load_blacklist() -> Result<Blacklist> {
    let path = find_list(BLACKLIST_FILE).ok_or_else(|| EbafError::BlacklistMissing {
        searched: list_candidates(BLACKLIST_FILE),
    })?;
    debug!(path = %path.display(), "reading blacklist");
    let text = fs::read_to_string(&path)?;
    Ok(parse_blacklist(&text))
}

/// Load the whitelist. Absence is equivalent to an empty list.
pub fn load_whitelist() -> Whitelist {
    match find_list(WHITELIST_FILE) {
        Some(path) => {
            debug!(path = %path.display(), "reading whitelist");
            match fs::read_to_string(&path) {
                Ok(text) => parse_whitelist(&text),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read whitelist");
                    Whitelist::default()
                }
            }
        }
        None => {
            debug!("no whitelist found, allow set stays empty");
            Whitelist::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn blacklist_separates_literals_from_domains() {
        let list = parse_blacklist(
            "ads.example.com\n\
             1.2.3.4\n\
             tracker.example.net\n\
             10.0.0.1\n",
        );
        assert_eq!(
            list.seed_ips,
            vec![Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(10, 0, 0, 1)]
        );
        assert_eq!(list.domains, vec!["ads.example.com", "tracker.example.net"]);
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let list = parse_blacklist(
            "# full-line comment\n\
             \n\
             ads.example.com  # trailing comment\n\
                \n\
             #1.2.3.4\n",
        );
        assert!(list.seed_ips.is_empty());
        assert_eq!(list.domains, vec!["ads.example.com"]);
    }

    #[test]
    fn first_whitespace_token_is_the_entry() {
        let list = parse_blacklist("ads.example.com ignored trailing words\n");
        assert_eq!(list.domains, vec!["ads.example.com"]);
    }

    #[test]
    fn malformed_addresses_are_treated_as_domains() {
        // Not valid IPv4, so it is scheduled for resolution instead.
        let list = parse_blacklist("300.1.2.3\n");
        assert!(list.seed_ips.is_empty());
        assert_eq!(list.domains, vec!["300.1.2.3"]);
    }

    #[test]
    fn over_long_entries_are_dropped() {
        let long = "a".repeat(300);
        let list = parse_blacklist(&long);
        assert!(list.domains.is_empty());
    }

    #[test]
    fn whitelist_keeps_wildcard_entries_verbatim() {
        let wl = parse_whitelist("*.example.com\nexact.example.net # keep\n");
        assert_eq!(wl.patterns, vec!["*.example.com", "exact.example.net"]);
    }

    #[test]
    fn blacklist_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BLACKLIST_FILE);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "ads.example.com\n192.0.2.7").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let list = parse_blacklist(&text);
        assert_eq!(list.seed_ips, vec![Ipv4Addr::new(192, 0, 2, 7)]);
        assert_eq!(list.domains, vec!["ads.example.com"]);
    }
}
