//! Test runner and statistics

use crate::bench::{bench_file, bench_walk, BenchOutcome, BenchReport};
use crate::config::HarnessConfig;
use crate::driver::run_subtests;
use crate::error::HarnessResult;
use crate::matcher::TestMatcher;
use crate::report::{CaseResult, CaseStatus, Reporter};
use crate::state_test::StateTest;
use crate::walker::Walker;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Aggregated test statistics
#[derive(Debug, Default)]
pub struct TestStats {
    /// Total cases recorded
    pub total: usize,
    /// Cases passed
    pub passed: usize,
    /// Cases failed
    pub failed: usize,
    /// Cases skipped
    pub skipped: usize,
    /// Total execution time
    pub duration: Duration,
    /// Failed case names with reasons
    pub failures: Vec<(String, String)>,
    /// Every recorded case, sorted by name
    pub results: Vec<CaseResult>,
}

impl TestStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Tally `results`
    pub fn from_results(results: Vec<CaseResult>, duration: Duration) -> Self {
        let mut stats = Self {
            duration,
            ..Self::default()
        };
        for case in &results {
            stats.total += 1;
            match case.status() {
                CaseStatus::Passed => stats.passed += 1,
                CaseStatus::Skipped(_) => stats.skipped += 1,
                CaseStatus::Failed => {
                    stats.failed += 1;
                    for failure in &case.failures {
                        stats
                            .failures
                            .push((case.name.clone(), failure.message.clone()));
                    }
                }
            }
        }
        stats.results = results;
        stats
    }

    /// Pass rate as percentage of executed cases
    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed;
        if executed == 0 {
            return 100.0;
        }
        (self.passed as f64 / executed as f64) * 100.0
    }

    /// Whether every executed case passed
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Print summary, with diagnostic logs of failed cases when `verbose`
    pub fn print_summary(&self, verbose: bool) {
        if verbose {
            for case in self.results.iter().filter(|c| c.status() == CaseStatus::Failed) {
                println!("--- FAIL: {}", case.name);
                for line in &case.logs {
                    println!("{line}");
                }
            }
        }

        println!("\n========================================");
        println!("State Test Summary");
        println!("========================================");
        println!("Total:   {}", self.total);
        println!("Passed:  {}", self.passed);
        println!("Failed:  {}", self.failed);
        println!("Skipped: {}", self.skipped);
        println!("Pass Rate: {:.2}%", self.pass_rate());
        println!("Duration: {:.2}s", self.duration.as_secs_f64());

        if !self.failures.is_empty() {
            println!("\nFailed tests:");
            for (name, reason) in &self.failures {
                println!("  - {}: {}", name, reason);
            }
        }
    }

    /// Machine-readable summary
    pub fn to_json(&self) -> Value {
        json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "skipped": self.skipped,
            "passRate": self.pass_rate(),
            "durationSecs": self.duration.as_secs_f64(),
            "results": self.results,
        })
    }
}

/// Main test runner
pub struct TestRunner {
    config: HarnessConfig,
    matcher: TestMatcher,
}

impl TestRunner {
    /// Compile the configured rules
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        let matcher = config.matcher()?;
        Ok(Self { config, matcher })
    }

    /// Rules in use
    pub fn matcher(&self) -> &TestMatcher {
        &self.matcher
    }

    /// Run `f` on the configured worker pool
    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> HarnessResult<R> {
        match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
                Ok(pool.install(f))
            }
            None => Ok(f()),
        }
    }

    /// Walk every configured corpus root and run all state tests
    pub fn run_state_tests(&self) -> HarnessResult<TestStats> {
        let start = Instant::now();
        let reporter = Reporter::new();
        let walker = Walker::new(&self.matcher, &reporter);

        self.install(|| -> HarnessResult<()> {
            for dir in &self.config.test_dirs {
                tracing::info!(dir = %dir.display(), "Running state tests");
                walker.walk::<StateTest, _>(dir, |name, test| {
                    run_subtests(&self.matcher, &reporter, name, test)
                })?;
            }
            Ok(())
        })??;

        let stats = TestStats::from_results(reporter.into_results(), start.elapsed());
        tracing::info!(
            total = stats.total,
            passed = stats.passed,
            failed = stats.failed,
            skipped = stats.skipped,
            "State tests finished"
        );
        Ok(stats)
    }

    /// Benchmark every file under the configured bench directory.
    ///
    /// A file that cannot be loaded is reported as a failed benchmark and
    /// the remaining files still run.
    pub fn run_benchmarks(&self) -> HarnessResult<Vec<BenchReport>> {
        let dir = &self.config.bench_dir;
        let iterations = self.config.bench_iterations;
        let mut reports = Vec::new();
        for (path, name) in bench_walk(dir)? {
            match bench_file(&path, &name, iterations) {
                Ok(file_reports) => reports.extend(file_reports),
                Err(e) => {
                    tracing::warn!(bench = %name, error = %e, "Benchmark file failed");
                    reports.push(BenchReport {
                        name,
                        iterations,
                        outcome: BenchOutcome::Failed(e.to_string()),
                    });
                }
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailureKind;

    #[test]
    fn test_stats_pass_rate() {
        let mut stats = TestStats::new();
        stats.passed = 90;
        stats.failed = 10;
        assert!((stats.pass_rate() - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_stats_empty() {
        let stats = TestStats::new();
        assert_eq!(stats.pass_rate(), 100.0);
        assert!(stats.success());
    }

    #[test]
    fn test_stats_from_results() {
        let mut failed = CaseResult::new("a/Berlin/0/trie");
        failed.fail(FailureKind::Case, "post state root mismatch");
        failed.fail(FailureKind::NonDeterminism, "different error for second run: no error");
        let results = vec![
            failed,
            CaseResult::new("a/Berlin/0/snap"),
            CaseResult::skipped("b.json", "skipped by skipLoad"),
        ];
        let stats = TestStats::from_results(results, Duration::from_secs(1));
        assert_eq!((stats.total, stats.passed, stats.failed, stats.skipped), (3, 1, 1, 1));
        assert_eq!(stats.failures.len(), 2);
        assert!(!stats.success());
        assert_eq!(stats.to_json()["failed"], 1);
    }

    #[test]
    fn test_runner_missing_corpus_is_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            test_dirs: vec![tmp.path().join("absent")],
            threads: Some(2),
            ..HarnessConfig::default()
        };
        let stats = TestRunner::new(config).unwrap().run_state_tests().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.skipped, 1);
        assert!(stats.success());
    }
}
