//! Per-case results and the shared result sink

use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

/// Category of a reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Case did not match its vector
    Case,
    /// Traced re-run disagreed with the first run
    NonDeterminism,
    /// Case body panicked
    Panic,
    /// File could not be read or decoded
    Load,
}

/// One reported failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Category
    pub kind: FailureKind,
    /// Message
    pub message: String,
}

/// Final state of a case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseStatus {
    /// No failure was reported
    Passed,
    /// At least one failure was reported
    Failed,
    /// Case did not run
    Skipped(String),
}

/// Outcome of one schedulable case: a file, a test or a sub-case
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaseResult {
    /// Test key
    pub name: String,
    /// Set when the case was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// Failures in report order
    pub failures: Vec<Failure>,
    /// Diagnostic log lines
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl CaseResult {
    /// Fresh result for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Result of a case skipped for `reason`
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut case = Self::new(name);
        case.skip(reason);
        case
    }

    /// Record a failure
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failures.push(Failure {
            kind,
            message: message.into(),
        });
    }

    /// Record a diagnostic line
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// Mark the case skipped
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skipped = Some(reason.into());
    }

    /// Final status
    pub fn status(&self) -> CaseStatus {
        if !self.failures.is_empty() {
            CaseStatus::Failed
        } else if let Some(reason) = &self.skipped {
            CaseStatus::Skipped(reason.clone())
        } else {
            CaseStatus::Passed
        }
    }

    /// Whether any failure of `kind` was reported
    pub fn has_failure(&self, kind: FailureKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }
}

/// Run `body` as an isolated case; a panic becomes a failure of this case only
pub fn run_case<F>(name: impl Into<String>, body: F) -> CaseResult
where
    F: FnOnce(&mut CaseResult),
{
    let mut case = CaseResult::new(name);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&mut case))) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        case.fail(FailureKind::Panic, format!("panicked: {message}"));
    }
    match case.status() {
        CaseStatus::Passed => tracing::debug!(case = %case.name, "PASS"),
        CaseStatus::Failed => tracing::warn!(case = %case.name, failures = case.failures.len(), "FAIL"),
        CaseStatus::Skipped(ref reason) => tracing::debug!(case = %case.name, reason = %reason, "SKIP"),
    }
    case
}

/// Thread-safe sink for case results
#[derive(Debug, Default)]
pub struct Reporter {
    results: Mutex<Vec<CaseResult>>,
}

impl Reporter {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finished case
    pub fn record(&self, case: CaseResult) {
        self.results.lock().push(case);
    }

    /// Number of recorded cases
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Recorded cases sorted by name
    pub fn into_results(self) -> Vec<CaseResult> {
        let mut results = self.results.into_inner();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }
}
