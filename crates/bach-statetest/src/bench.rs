//! Interpreter throughput benchmark over single-test files
//!
//! The execution context (pre-state, message, block and transaction
//! context, contract) is built once per subtest. Each iteration only
//! snapshots the state, runs the contract code and reverts.

use crate::error::{CaseError, HarnessError, HarnessResult};
use crate::state_test::{
    make_pre_state, supported_fork, to_message, vm_test_block_hash, StateBackend, StateTest, Subtest,
};
use crate::txbytes;
use crate::walker::{load_tests, missing_dir_message, TEST_EXTENSION};
use bach_crypto::H256;
use bach_evm::{chain_config, BlockContext, ChainConfig, Contract, Evm, Message, TxContext, VmConfig};
use bach_state::StateDb;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Load a file that must hold exactly one test
pub fn load_single<T: DeserializeOwned>(path: &Path) -> HarnessResult<(String, T)> {
    let tests = load_tests::<T>(path)?;
    if tests.len() != 1 {
        return Err(HarnessError::WrongKeyCount {
            path: path.to_path_buf(),
            count: tests.len(),
        });
    }
    tests
        .into_iter()
        .next()
        .ok_or_else(|| HarnessError::WrongKeyCount {
            path: path.to_path_buf(),
            count: 0,
        })
}

/// Benchmark files under `dir` as `(path, key)`, sorted by key.
///
/// A missing directory yields no files.
pub fn bench_walk(dir: &Path) -> HarnessResult<Vec<(PathBuf, String)>> {
    if !dir.is_dir() {
        tracing::warn!("{}", missing_dir_message(dir));
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == TEST_EXTENSION) {
                let key = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((path, key));
            }
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Result of one benchmarked subtest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchOutcome {
    /// Time spent in the timed loop
    Measured(Duration),
    /// Subtest not benchmarked, with the reason
    Skipped(String),
    /// Setup or an iteration failed
    Failed(String),
}

/// Outcome of one benchmarked subtest, or of a file that could not be loaded
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// `<file>/<fork>/<index>`, or `<file>` for file-level failures
    pub name: String,
    /// Iterations requested
    pub iterations: u64,
    /// What happened
    pub outcome: BenchOutcome,
}

impl BenchReport {
    /// Time spent in the timed loop, if the subtest was measured
    pub fn elapsed(&self) -> Option<Duration> {
        match self.outcome {
            BenchOutcome::Measured(elapsed) => Some(elapsed),
            _ => None,
        }
    }

    /// Mean time per iteration, if the subtest was measured
    pub fn per_iteration(&self) -> Option<Duration> {
        let elapsed = self.elapsed()?;
        if self.iterations == 0 {
            return Some(Duration::ZERO);
        }
        let nanos = elapsed.as_nanos() / u128::from(self.iterations);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Whether the benchmark failed
    pub fn failed(&self) -> bool {
        matches!(self.outcome, BenchOutcome::Failed(_))
    }
}

/// Prebuilt execution context for one subtest
pub struct BenchRunner {
    state: StateDb,
    config: VmConfig,
    chain: ChainConfig,
    block: BlockContext,
    msg: Message,
    contract: Contract,
}

impl BenchRunner {
    /// Build the context for `subtest`.
    ///
    /// Fails when the fork is unknown, the message cannot be built, its
    /// `txbytes` do not recover, or it is a contract creation.
    pub fn new(test: &StateTest, subtest: &Subtest) -> Result<Self, CaseError> {
        let (chain, eips) =
            chain_config(&subtest.fork).map_err(|e| CaseError::Message(e.to_string()))?;
        let config = VmConfig {
            tracer: None,
            extra_eips: eips,
        };
        let header = test.header(&chain);
        let (_, state) = make_pre_state(&test.json().pre, StateBackend::Trie);

        let post = test
            .post(subtest)
            .ok_or_else(|| CaseError::Message(format!("no post state for {subtest}")))?;
        let msg = to_message(&test.json().transaction, post, header.base_fee)?;
        if let Some(txbytes) = post.txbytes.as_ref().filter(|b| !b.0.is_empty()) {
            txbytes::recover_sender(&txbytes.0, &chain.rules(&config.extra_eips))
                .map_err(CaseError::TxBytes)?;
        }

        let block = BlockContext::new(
            &header,
            vm_test_block_hash,
            Some(test.json().env.current_coinbase.0),
        );
        let dest = msg
            .to
            .ok_or_else(|| CaseError::Message("benchmark needs a call transaction".to_string()))?;
        let mut contract = Contract::new(msg.from, dest, msg.value, 0);
        contract.set_call_code(dest, state.code_hash(&dest), state.code(&dest));

        Ok(Self {
            state,
            config,
            chain,
            block,
            msg,
            contract,
        })
    }

    /// Current state root; unchanged by any number of iterations
    pub fn state_root(&self) -> H256 {
        self.state.state_root()
    }

    /// Bind the interpreter once and return a handle for timed iterations
    pub fn session(&mut self) -> BenchSession<'_> {
        let Self {
            state,
            config,
            chain,
            block,
            msg,
            contract,
        } = self;
        let evm = Evm::new(block.clone(), TxContext::new(msg), state, chain, config);
        BenchSession {
            evm,
            contract,
            input: &msg.data,
            gas: msg.gas_limit,
        }
    }

    /// Run `iterations` timed iterations
    pub fn run(&mut self, iterations: u64) -> HarnessResult<Duration> {
        let mut session = self.session();
        let start = Instant::now();
        for _ in 0..iterations {
            session.iterate()?;
        }
        Ok(start.elapsed())
    }
}

/// Interpreter bound to a [`BenchRunner`]'s context
pub struct BenchSession<'a> {
    evm: Evm<'a>,
    contract: &'a mut Contract,
    input: &'a [u8],
    gas: u64,
}

impl BenchSession<'_> {
    /// One snapshot, run, revert cycle
    pub fn iterate(&mut self) -> HarnessResult<()> {
        let snapshot = self.evm.state_mut().snapshot();
        self.contract.gas = self.gas;
        let result = self.evm.run(self.contract, self.input, false);
        self.evm.state_mut().revert_to_snapshot(snapshot)?;
        result?;
        Ok(())
    }
}

/// Benchmark every subtest of the single test in `path`.
///
/// Only a file that cannot be loaded is an error. Each subtest gets its own
/// report: unsupported forks are skipped, and a failing subtest does not
/// stop the others.
pub fn bench_file(path: &Path, name: &str, iterations: u64) -> HarnessResult<Vec<BenchReport>> {
    let (_, test) = load_single::<StateTest>(path)?;
    let mut reports = Vec::new();
    for subtest in test.subtests() {
        let outcome = match supported_fork(&subtest.fork) {
            Err(e) => BenchOutcome::Skipped(e.to_string()),
            Ok(()) => match BenchRunner::new(&test, &subtest) {
                Err(e) => BenchOutcome::Failed(HarnessError::from(e).to_string()),
                Ok(mut runner) => match runner.run(iterations) {
                    Ok(elapsed) => BenchOutcome::Measured(elapsed),
                    Err(e) => BenchOutcome::Failed(e.to_string()),
                },
            },
        };
        let report = BenchReport {
            name: format!("{name}/{subtest}"),
            iterations,
            outcome,
        };
        match &report.outcome {
            BenchOutcome::Measured(_) => tracing::info!(
                bench = %report.name,
                iterations,
                per_iteration = ?report.per_iteration(),
                "Benchmark finished"
            ),
            BenchOutcome::Skipped(reason) => {
                tracing::debug!(bench = %report.name, reason = %reason, "Benchmark skipped")
            }
            BenchOutcome::Failed(error) => {
                tracing::warn!(bench = %report.name, error = %error, "Benchmark failed")
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_single_rejects_many() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("two.json");
        fs::write(&path, r#"{"a": 1, "b": 2}"#).unwrap();
        let err = load_single::<u32>(&path).unwrap_err();
        assert!(matches!(err, HarnessError::WrongKeyCount { count: 2, .. }));

        fs::write(&path, "{}").unwrap();
        let err = load_single::<u32>(&path).unwrap_err();
        assert!(matches!(err, HarnessError::WrongKeyCount { count: 0, .. }));

        fs::write(&path, r#"{"only": 7}"#).unwrap();
        assert_eq!(load_single::<u32>(&path).unwrap(), ("only".to_string(), 7));
    }

    #[test]
    fn test_bench_walk() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/b.json"), "{}").unwrap();
        fs::write(tmp.path().join("a.json"), "{}").unwrap();
        fs::write(tmp.path().join("notes.txt"), "").unwrap();
        let keys: Vec<_> = bench_walk(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(_, key)| key)
            .collect();
        assert_eq!(keys, vec!["a.json", "sub/b.json"]);

        assert!(bench_walk(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_per_iteration() {
        let report = BenchReport {
            name: "x".into(),
            iterations: 4,
            outcome: BenchOutcome::Measured(Duration::from_millis(8)),
        };
        assert_eq!(report.per_iteration(), Some(Duration::from_millis(2)));
        assert!(!report.failed());

        let failed = BenchReport {
            outcome: BenchOutcome::Failed("invalid opcode: 0xfe".into()),
            ..report
        };
        assert_eq!(failed.per_iteration(), None);
        assert!(failed.failed());
    }

    #[test]
    fn test_per_iteration_beyond_u32_iterations() {
        let report = BenchReport {
            name: "x".into(),
            iterations: 5_000_000_000,
            outcome: BenchOutcome::Measured(Duration::from_secs(10_000)),
        };
        assert_eq!(report.per_iteration(), Some(Duration::from_nanos(2_000)));
    }
}
