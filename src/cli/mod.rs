//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Async test execution engine
#[derive(Parser, Debug)]
#[command(name = "async-test")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run parameterized async test suites and report result trees")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test suites
    Run(RunArgs),

    /// List registered suites
    List(ListArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Arguments for the run command.
///
/// Unset options fall back to the configuration.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Suites to run (all visible suites when omitted)
    pub suites: Vec<String>,

    /// Number of rounds
    #[arg(short, long)]
    pub rounds: Option<u32>,

    /// Run suites in parallel
    #[arg(short, long)]
    pub parallel: bool,

    /// Maximum concurrent suites (when parallel)
    #[arg(short = 'j', long)]
    pub concurrent: Option<usize>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Per-run timeout in seconds, 0 disables it
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Parameter filter, e.g. `encoding=identity,chunked` (repeatable)
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Only run tests in these categories (repeatable or comma-separated)
    #[arg(long = "category", value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Skip tests in these categories (repeatable or comma-separated)
    #[arg(long = "exclude-category", value_delimiter = ',')]
    pub exclude_categories: Vec<String>,

    /// Engine diagnostic level
    #[arg(short, long)]
    pub debug_level: Option<u8>,

    /// Show logged test messages in table output
    #[arg(short, long)]
    pub messages: bool,

    /// Save reports to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show descriptions and registered parameter sources
    #[arg(short, long)]
    pub detailed: bool,

    /// Include hidden suites
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "async-test.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        /// File to check (defaults to the standard locations)
        file: Option<PathBuf>,
    },

    /// Describe the supported environment variables
    Env,
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got `{s}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_args() {
        let args = Args::parse_from(["async-test", "list", "--detailed"]);
        match args.command {
            Command::List(list_args) => {
                assert!(list_args.detailed);
                assert!(!list_args.all);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "async-test",
            "-vv",
            "run",
            "parameters",
            "fixtures",
            "--rounds",
            "10",
            "--parallel",
            "--filter",
            "encoding=identity,chunked",
        ]);
        assert_eq!(args.verbose, 2);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.suites, vec!["parameters", "fixtures"]);
                assert_eq!(run.rounds, Some(10));
                assert!(run.parallel);
                assert!(run.format.is_none());
                assert_eq!(
                    run.filters,
                    vec![("encoding".to_string(), "identity,chunked".to_string())]
                );
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_category_args() {
        let args = Args::parse_from([
            "async-test",
            "run",
            "--category",
            "tls",
            "--exclude-category",
            "stress,slow",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.categories, vec!["tls"]);
                assert_eq!(run.exclude_categories, vec!["stress", "slow"]);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_invalid_filter() {
        assert!(Args::try_parse_from(["async-test", "run", "--filter", "nope"]).is_err());
    }

    #[test]
    fn test_config_init_defaults() {
        let args = Args::parse_from(["async-test", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("async-test.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
