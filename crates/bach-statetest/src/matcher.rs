//! Pattern rules deciding which cases run, skip or may fail.
//!
//! Every rule is a regular expression searched in a test key, the
//! slash-separated path `<file>/<fork>/<index>/<mode>` or a prefix of it.
//! Rule kinds are independent; within a kind the first match wins.

use crate::error::{CaseError, HarnessError, HarnessResult};
use regex::Regex;

/// Reason reported for skipped slow tests in short mode
pub const SKIP_SHORT: &str = "skipped in short mode";
/// Reason reported for skipped slow tests on 32-bit Windows
pub const SKIP_WIN32: &str = "skipped on 32bit windows";
/// Reason reported for `skip_load` matches
pub const SKIP_LOAD: &str = "skipped by skipLoad";
/// Reason reported for files outside the `runonly` pattern
pub const SKIP_RUNONLY: &str = "skipped by runonly";

/// Verdict of [`TestMatcher::find_skip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skip {
    /// Reason to report
    pub reason: &'static str,
    /// Whether the file must not even be decoded
    pub skip_load: bool,
}

#[derive(Debug, Clone)]
struct FailRule {
    pattern: Regex,
    reason: String,
}

/// Registered rules, built once and shared read-only
#[derive(Debug, Clone, Default)]
pub struct TestMatcher {
    slow: Vec<Regex>,
    skip_load: Vec<Regex>,
    fails: Vec<FailRule>,
    runonly: Option<Regex>,
    short: bool,
    win32: bool,
}

fn compile(pattern: &str) -> HarnessResult<Regex> {
    Regex::new(pattern).map_err(|source| HarnessError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl TestMatcher {
    /// Matcher without rules
    pub fn new() -> Self {
        Self {
            win32: cfg!(all(windows, target_pointer_width = "32")),
            ..Self::default()
        }
    }

    /// Enable or disable short mode
    pub fn set_short(&mut self, short: bool) {
        self.short = short;
    }

    /// Whether short mode is on
    pub fn is_short(&self) -> bool {
        self.short
    }

    /// Mark matching tests slow; they are skipped in short mode
    pub fn slow(&mut self, pattern: &str) -> HarnessResult<()> {
        self.slow.push(compile(pattern)?);
        Ok(())
    }

    /// Never load matching files or directories
    pub fn skip_load(&mut self, pattern: &str) -> HarnessResult<()> {
        self.skip_load.push(compile(pattern)?);
        Ok(())
    }

    /// Expect matching tests to fail for `reason`
    pub fn fails(&mut self, pattern: &str, reason: &str) -> HarnessResult<()> {
        if reason.is_empty() {
            return Err(HarnessError::EmptyFailReason(pattern.to_string()));
        }
        self.fails.push(FailRule {
            pattern: compile(pattern)?,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Run only files matching `pattern`
    pub fn runonly(&mut self, pattern: &str) -> HarnessResult<()> {
        self.runonly = Some(compile(pattern)?);
        Ok(())
    }

    /// Why `key` should be skipped, if at all
    pub fn find_skip(&self, key: &str) -> Option<Skip> {
        if self.find_slow(key) {
            if self.short {
                return Some(Skip {
                    reason: SKIP_SHORT,
                    skip_load: false,
                });
            }
            if self.win32 {
                return Some(Skip {
                    reason: SKIP_WIN32,
                    skip_load: false,
                });
            }
        }
        self.skip_load
            .iter()
            .any(|re| re.is_match(key))
            .then_some(Skip {
                reason: SKIP_LOAD,
                skip_load: true,
            })
    }

    /// Whether `key` matches a slow rule
    pub fn find_slow(&self, key: &str) -> bool {
        self.slow.iter().any(|re| re.is_match(key))
    }

    /// Reason of the first fail rule matching `key`
    pub fn find_failure(&self, key: &str) -> Option<&str> {
        self.fails
            .iter()
            .find(|rule| rule.pattern.is_match(key))
            .map(|rule| rule.reason.as_str())
    }

    /// Whether `key` is excluded by the runonly pattern
    pub fn excluded_by_runonly(&self, key: &str) -> bool {
        self.runonly.as_ref().is_some_and(|re| !re.is_match(key))
    }

    /// Apply fail rules to a case result.
    ///
    /// For a listed case an error becomes success and success becomes
    /// [`CaseError::UnexpectedSuccess`]. Unlisted results pass through.
    /// Listed cases push their reason, and the error they absorbed, to
    /// `logs`.
    pub fn check_failure(
        &self,
        key: &str,
        result: Result<(), CaseError>,
        logs: &mut Vec<String>,
    ) -> Result<(), CaseError> {
        let Some(reason) = self.find_failure(key) else {
            return result;
        };
        tracing::info!(key, reason, "expected failure");
        logs.push(format!("expected failure: {reason}"));
        match result {
            Err(err) => {
                tracing::info!(key, error = %err, "error");
                logs.push(format!("error: {err}"));
                Ok(())
            }
            Ok(()) => Err(CaseError::UnexpectedSuccess),
        }
    }
}
