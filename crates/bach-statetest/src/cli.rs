//! CLI argument parsing for bach-statetest

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Ethereum state test runner for the BachLedger EVM
#[derive(Parser, Debug, Clone)]
#[command(name = "bach-statetest")]
#[command(about = "Ethereum state test conformance and benchmark harness")]
#[command(version)]
pub struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Harness commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the state test corpus
    Run(RunArgs),
    /// Benchmark the interpreter over single-test vectors
    Bench(BenchArgs),
}

/// Arguments of `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Corpus root; repeat to walk several (overrides the config)
    #[arg(long = "dir")]
    pub dirs: Vec<PathBuf>,

    /// Skip tests matching slow rules
    #[arg(long)]
    pub short: bool,

    /// Only run test files matching this regex
    #[arg(long = "run")]
    pub runonly: Option<String>,

    /// Worker threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Print failing case logs before the summary
    #[arg(long, short)]
    pub verbose: bool,

    /// Print results as JSON instead of the summary
    #[arg(long)]
    pub json: bool,
}

/// Arguments of `bench`
#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Benchmark vector directory (overrides the config)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Iterations per subtest (overrides the config)
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::parse_from(["bach-statetest", "run"]);
        assert_eq!(cli.log_level, "info");
        assert!(cli.config.is_none());
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.dirs.is_empty());
        assert!(!args.short);
        assert!(args.runonly.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_cli_run_custom_values() {
        let cli = Cli::parse_from([
            "bach-statetest",
            "--config", "harness.toml",
            "run",
            "--dir", "a",
            "--dir", "b",
            "--short",
            "--run", "stExample/",
            "--threads", "4",
            "--log-level", "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("harness.toml")));
        assert_eq!(cli.log_level, "debug");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(args.short);
        assert_eq!(args.runonly.as_deref(), Some("stExample/"));
        assert_eq!(args.threads, Some(4));
    }

    #[test]
    fn test_cli_bench() {
        let cli = Cli::parse_from(["bach-statetest", "bench", "--iterations", "10", "--json"]);
        let Command::Bench(args) = cli.command else {
            panic!("expected bench");
        };
        assert_eq!(args.iterations, Some(10));
        assert!(args.dir.is_none());
        assert!(args.json);
    }
}
