use std::ffi::OsString;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use nfsen_core::models::ProcessOptions;

const EXAMPLES: &str = "\
Examples:
  nfsen-ng -f import
      Re-import all data for the configured sources

  nfsen-ng -p import
      Import data including per-port statistics

  nfsen-ng start
      Start the daemon for continuous reading of new data

Notice: if you have many existing nfcapd files, run the import overnight.";

// ── Cli ────────────────────────────────────────────────────────────────────────

/// The command line interface to nfsen-ng
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nfsen-ng",
    about = "The command line interface to nfsen-ng",
    version,
    after_help = EXAMPLES
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Import ports data
    #[arg(short = 'p', long, global = true)]
    pub ports: bool,

    /// Import ports data per source (also accepted as -ps)
    #[arg(long, global = true)]
    pub ports_per_source: bool,

    /// Force overwriting the database and start at the beginning
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Settings file
    #[arg(long, env = "NFSEN_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// Years of history to import
    #[arg(long, env = "NFSEN_IMPORT_YEARS", default_value_t = 3, global = true)]
    pub import_years: u32,

    /// First day to import (YYYY-MM-DD), overrides --import-years
    #[arg(long, value_parser = parse_day, global = true)]
    pub start: Option<NaiveDate>,

    /// Logging level (overrides the settings file)
    #[arg(
        long,
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "ALERT"],
        ignore_case = true,
        global = true
    )]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Import existing nfdump data to nfsen-ng
    Import,
    /// Start the daemon for continuous reading of new data
    Start,
    /// Stop the daemon
    Stop,
    /// Get the daemon's status
    Status,
    /// Run the listener in the foreground
    #[command(hide = true)]
    Daemon,
}

impl Cli {
    /// Parse `args` after rewriting the historical `-ps` spelling.
    pub fn parse_from_env_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Per-unit switches for the processor.
    pub fn process_options(&self, configured_ports: &[u16]) -> ProcessOptions {
        ProcessOptions {
            process_ports: self.ports || self.ports_per_source,
            ports_per_source: self.ports_per_source,
            ports: configured_ports.to_vec(),
        }
    }

    /// Level from `--debug`, `--log-level` or the settings, in that order.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.debug {
            "DEBUG"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Flags forwarded to the detached daemon.
    pub fn daemon_args(&self, settings: PathBuf) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["daemon".into(), "--settings".into(), settings.into()];
        if self.ports {
            args.push("--ports".into());
        }
        if self.ports_per_source {
            args.push("--ports-per-source".into());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args
    }
}

/// Rewrite `-ps` into `--ports-per-source`; clap would read it as `-p -s`.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if arg == "-ps" {
                OsString::from("--ports-per-source")
            } else {
                arg
            }
        })
        .collect()
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{value}': {e}"))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["nfsen-ng"];
        full.extend_from_slice(args);
        Cli::parse_from_env_args(full).expect("valid arguments")
    }

    #[test]
    fn test_flags_before_and_after_subcommand() {
        let before = parse(&["-v", "-f", "import"]);
        let after = parse(&["import", "-v", "-f"]);
        for cli in [before, after] {
            assert_eq!(cli.command, Command::Import);
            assert!(cli.verbose);
            assert!(cli.force);
            assert!(!cli.ports);
        }
    }

    #[test]
    fn test_ps_is_normalised() {
        let cli = parse(&["-ps", "import"]);
        assert!(cli.ports_per_source);
        let options = cli.process_options(&[22, 80]);
        assert!(options.process_ports);
        assert!(options.ports_per_source);
        assert_eq!(options.ports, vec![22, 80]);
    }

    #[test]
    fn test_ports_flag() {
        let cli = parse(&["import", "-p"]);
        let options = cli.process_options(&[443]);
        assert!(options.process_ports);
        assert!(!options.ports_per_source);
    }

    #[test]
    fn test_lifecycle_commands() {
        assert_eq!(parse(&["start"]).command, Command::Start);
        assert_eq!(parse(&["stop"]).command, Command::Stop);
        assert_eq!(parse(&["status"]).command, Command::Status);
        assert_eq!(parse(&["daemon"]).command, Command::Daemon);
    }

    #[test]
    fn test_start_date_and_years() {
        let cli = parse(&["import", "--start", "2024-02-29", "--import-years", "2"]);
        assert_eq!(cli.start, NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(cli.import_years, 2);
    }

    #[test]
    fn test_rejects_bad_start_date() {
        let result = Cli::parse_from_env_args(["nfsen-ng", "import", "--start", "29.02.2024"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_command_is_an_error() {
        assert!(Cli::parse_from_env_args(["nfsen-ng", "-v"]).is_err());
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = parse(&["status"]);
        assert_eq!(cli.effective_log_level("WARNING"), "WARNING");
        let cli = parse(&["status", "--log-level", "ERROR"]);
        assert_eq!(cli.effective_log_level("WARNING"), "ERROR");
        let cli = parse(&["status", "--log-level", "ERROR", "--debug"]);
        assert_eq!(cli.effective_log_level("WARNING"), "DEBUG");
    }

    #[test]
    fn test_alert_log_level_is_accepted() {
        let cli = parse(&["status", "--log-level", "ALERT"]);
        assert_eq!(cli.effective_log_level("INFO"), "ALERT");
        assert!(Cli::parse_from_env_args(["nfsen-ng", "status", "--log-level", "PANIC"]).is_err());
    }

    #[test]
    fn test_daemon_args_round_trip() {
        let cli = parse(&["-ps", "start", "--log-level", "DEBUG"]);
        let args = cli.daemon_args(PathBuf::from("/etc/nfsen-ng/settings.json"));
        let reparsed = Cli::parse_from_env_args(
            std::iter::once(OsString::from("nfsen-ng")).chain(args),
        )
        .unwrap();
        assert_eq!(reparsed.command, Command::Daemon);
        assert!(reparsed.ports_per_source);
        assert_eq!(
            reparsed.settings,
            Some(PathBuf::from("/etc/nfsen-ng/settings.json"))
        );
        assert_eq!(reparsed.log_level.as_deref(), Some("DEBUG"));
    }
}
