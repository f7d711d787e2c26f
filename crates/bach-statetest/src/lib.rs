//! # bach-statetest
//!
//! Ethereum GeneralStateTests conformance and benchmark harness for the
//! BachLedger EVM.
//!
//! This crate provides:
//! - Regex rules deciding which tests are skipped, slow or expected to fail
//! - A parallel corpus walker that prunes skipped files before decoding
//! - A subtest driver running every (fork, index) pair in trie and snap mode
//! - Failure triage: traced, determinism-checked re-runs of failing cases
//! - An interpreter benchmark over single-test vector files
//!
//! ## Test keys
//!
//! Files are keyed by their slash-separated path under the corpus root,
//! tests by `<file>/<test>` when a file holds several, and sub-cases by
//! `<test>/<fork>/<index>/<trie|snap>`.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bench;
mod config;
mod driver;
mod error;
mod matcher;
mod report;
mod runner;
mod triage;
mod txbytes;
mod types;
mod walker;

pub use bench::{
    bench_file, bench_walk, load_single, BenchOutcome, BenchReport, BenchRunner, BenchSession,
};
pub use config::{FailRuleConfig, HarnessConfig, RuleConfig};
pub use driver::{case_key, run_subtest, run_subtests};
pub use error::{CaseError, HarnessError, HarnessResult};
pub use matcher::{Skip, TestMatcher, SKIP_LOAD, SKIP_RUNONLY, SKIP_SHORT, SKIP_WIN32};
pub use report::{run_case, CaseResult, CaseStatus, Failure, FailureKind, Reporter};
pub use runner::{TestRunner, TestStats};
pub use state_test::{
    make_pre_state, supported_fork, to_message, vm_test_block_hash, Execution, RunOutcome,
    StateBackend, StateTest, Subtest, DEFAULT_BASE_FEE,
};
pub use triage::{with_trace, TRACE_ERROR_LIMIT};
pub use txbytes::{recover_sender, SignedTx};
pub use types::*;
pub use walker::{collect_files, load_tests, missing_dir_message, Walker, TEST_EXTENSION};
