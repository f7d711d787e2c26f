//! bach-statetest binary
//!
//! Runs the Ethereum state test corpus or the interpreter benchmarks.

mod cli;

use anyhow::{Context, Result};
use bach_statetest::{BenchOutcome, BenchReport, HarnessConfig, TestRunner};
use cli::{BenchArgs, Cli, Command, RunArgs};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    let ok = match cli.command {
        Command::Run(args) => run(config, args)?,
        Command::Bench(args) => bench(config, args)?,
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn run(mut config: HarnessConfig, args: RunArgs) -> Result<bool> {
    if !args.dirs.is_empty() {
        config.test_dirs = args.dirs;
    }
    config.short |= args.short;
    if args.runonly.is_some() {
        config.rules.runonly = args.runonly;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }

    let runner = TestRunner::new(config)?;
    let stats = runner.run_state_tests()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats.to_json())?);
    } else {
        stats.print_summary(args.verbose);
    }
    Ok(stats.success())
}

fn bench(mut config: HarnessConfig, args: BenchArgs) -> Result<bool> {
    if let Some(dir) = args.dir {
        config.bench_dir = dir;
    }
    if let Some(iterations) = args.iterations {
        config.bench_iterations = iterations;
    }

    let reports = TestRunner::new(config)?.run_benchmarks()?;
    if args.json {
        let reports: Vec<_> = reports.iter().map(report_json).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            match &report.outcome {
                BenchOutcome::Measured(_) => println!(
                    "{:<60} {:>8} iters {:>12.3?}/iter",
                    report.name,
                    report.iterations,
                    report.per_iteration().unwrap_or_default()
                ),
                BenchOutcome::Skipped(reason) => println!("{:<60} skipped: {reason}", report.name),
                BenchOutcome::Failed(error) => println!("{:<60} FAILED: {error}", report.name),
            }
        }
    }
    Ok(!reports.iter().any(BenchReport::failed))
}

fn report_json(report: &BenchReport) -> serde_json::Value {
    let mut value = json!({
        "name": report.name,
        "iterations": report.iterations,
    });
    match &report.outcome {
        BenchOutcome::Measured(elapsed) => {
            value["elapsedNanos"] = json!(elapsed.as_nanos() as u64);
            value["perIterationNanos"] =
                json!(report.per_iteration().unwrap_or_default().as_nanos() as u64);
        }
        BenchOutcome::Skipped(reason) => value["skipped"] = json!(reason),
        BenchOutcome::Failed(error) => value["error"] = json!(error),
    }
    value
}
