//! Harness configuration

use crate::error::HarnessResult;
use crate::matcher::TestMatcher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Harness configuration, loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Corpus roots walked by `run`
    #[serde(default = "default_test_dirs")]
    pub test_dirs: Vec<PathBuf>,
    /// Root of the benchmark vectors
    #[serde(default = "default_bench_dir")]
    pub bench_dir: PathBuf,
    /// Skip tests matching slow rules
    #[serde(default)]
    pub short: bool,
    /// Worker threads; rayon's default when unset
    #[serde(default)]
    pub threads: Option<usize>,
    /// Iterations per benchmarked subtest
    #[serde(default = "default_bench_iterations")]
    pub bench_iterations: u64,
    /// Test selection rules
    #[serde(default)]
    pub rules: RuleConfig,
}

/// A `fails` rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailRuleConfig {
    /// Pattern
    pub pattern: String,
    /// Why the test is expected to fail
    pub reason: String,
}

/// `[rules]` table; missing keys keep the built-in lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Long-running tests
    pub slow: Vec<String>,
    /// Tests never loaded
    pub skip_load: Vec<String>,
    /// Tests expected to fail
    pub fails: Vec<FailRuleConfig>,
    /// Only run files matching this
    pub runonly: Option<String>,
}

fn default_test_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("testdata/GeneralStateTests"),
        PathBuf::from("testdata/LegacyTests/Constantinople/GeneralStateTests"),
        PathBuf::from("testdata/evm-benchmarks/benchmarks"),
    ]
}

fn default_bench_dir() -> PathBuf {
    PathBuf::from("testdata/evm-benchmarks/benchmarks")
}

fn default_bench_iterations() -> u64 {
    1000
}

impl Default for RuleConfig {
    fn default() -> Self {
        let slow = [
            "^stAttackTest/ContractCreationSpam",
            "^stBadOpcode/badOpcodes",
            "^stPreCompiledContracts/modexp",
            "^stQuadraticComplexityTest/",
            "^stStaticCall/static_Call50000",
            "^stStaticCall/static_Return50000",
            "^stSystemOperationsTest/CallRecursiveBomb",
            "^stTransactionTest/Opcodes_TransactionInit",
        ];
        let skip_load = [
            // Very time consuming
            "^stTimeConsuming/",
            ".*vmPerformance/loop.*",
            // Uses 1GB RAM per tested fork
            "^stStaticCall/static_Call1MB",
        ];
        Self {
            slow: slow.iter().map(|s| s.to_string()).collect(),
            skip_load: skip_load.iter().map(|s| s.to_string()).collect(),
            fails: Vec::new(),
            runonly: None,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test_dirs: default_test_dirs(),
            bench_dir: default_bench_dir(),
            short: false,
            threads: None,
            bench_iterations: default_bench_iterations(),
            rules: RuleConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Compile the rules; an invalid pattern is an error
    pub fn matcher(&self) -> HarnessResult<TestMatcher> {
        let mut matcher = TestMatcher::new();
        matcher.set_short(self.short);
        for pattern in &self.rules.slow {
            matcher.slow(pattern)?;
        }
        for pattern in &self.rules.skip_load {
            matcher.skip_load(pattern)?;
        }
        for rule in &self.rules.fails {
            matcher.fails(&rule.pattern, &rule.reason)?;
        }
        if let Some(pattern) = &self.rules.runonly {
            matcher.runonly(pattern)?;
        }
        Ok(matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_empty_document_is_default() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config.test_dirs, default_test_dirs());
        assert_eq!(config.rules, RuleConfig::default());
        assert_eq!(config.bench_iterations, 1000);
        assert!(!config.short);
    }

    #[test]
    fn test_partial_rules_keep_builtins() {
        let config = HarnessConfig::from_toml(
            r#"
            short = true
            threads = 4

            [rules]
            fails = [{ pattern = "^stRevertTest/", reason = "bug in test" }]
            "#,
        )
        .unwrap();
        assert!(config.short);
        assert_eq!(config.threads, Some(4));
        assert_eq!(config.rules.slow, RuleConfig::default().slow);
        assert_eq!(config.rules.fails.len(), 1);

        let matcher = config.matcher().unwrap();
        assert!(matcher.is_short());
        assert!(matcher.find_skip("stQuadraticComplexityTest/Call50000.json").is_some());
        assert_eq!(
            matcher.find_failure("stRevertTest/x.json/Byzantium/0/trie"),
            Some("bug in test")
        );
    }

    #[test]
    fn test_bad_pattern_and_bad_toml() {
        let config = HarnessConfig::from_toml("[rules]\nslow = [\"(\"]").unwrap();
        assert!(matches!(config.matcher(), Err(HarnessError::InvalidPattern { .. })));
        assert!(matches!(
            HarnessConfig::from_toml("short = 3"),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "bench_dir = \"benches/vectors\"").unwrap();
        let config = HarnessConfig::load(tmp.path()).unwrap();
        assert_eq!(config.bench_dir, PathBuf::from("benches/vectors"));
    }
}
