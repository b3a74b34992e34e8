use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ebaf")]
#[command(about = "eBPF Ad Firewall - drop traffic to blacklisted ad endpoints", long_about = None)]
pub struct Cli {
    /// Network interface to attach to (auto-selected if not provided)
    pub interface: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (suppress INFO logs, only show warnings and errors)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_selects_interface_automatically() {
        let cli = Cli::try_parse_from(["ebaf"]).unwrap();
        assert!(cli.interface.is_none());
    }

    #[test]
    fn single_argument_is_the_interface() {
        let cli = Cli::try_parse_from(["ebaf", "eth0"]).unwrap();
        assert_eq!(cli.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn extra_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["ebaf", "eth0", "wlan0"]).is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["ebaf", "-v", "-q"]).is_err());
    }
}
