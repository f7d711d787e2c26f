//! Corpus discovery and decoding

use crate::error::{HarnessError, HarnessResult};
use crate::matcher::TestMatcher;
use crate::report::{run_case, CaseResult, FailureKind, Reporter};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Extension of test vector files
pub const TEST_EXTENSION: &str = "json";

/// Decode a corpus file into its tests, sorted by name
pub fn load_tests<T: DeserializeOwned>(path: &Path) -> HarnessResult<BTreeMap<String, T>> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|source| HarnessError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Message logged when a corpus root is absent
pub fn missing_dir_message(dir: &Path) -> String {
    format!(
        "can't find test files in {}, did you clone the tests submodule?",
        dir.display()
    )
}

/// Test vector files under `dir` as `(path, key)`, where the key is the
/// slash-separated path relative to `dir`. Sorted by key.
///
/// Directories whose `key/` is a skip-load match are not entered.
pub fn collect_files(matcher: &TestMatcher, dir: &Path) -> HarnessResult<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    visit(matcher, dir, "", &mut files)?;
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn visit(
    matcher: &TestMatcher,
    dir: &Path,
    prefix: &str,
    files: &mut Vec<(PathBuf, String)>,
) -> HarnessResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());

        if entry.file_type()?.is_dir() {
            let dir_key = format!("{name}/");
            if matcher.find_skip(&dir_key).is_some_and(|skip| skip.skip_load) {
                tracing::debug!(dir = %dir_key, "Pruned by skipLoad");
                continue;
            }
            visit(matcher, &path, &dir_key, files)?;
        } else if path.extension().is_some_and(|e| e == TEST_EXTENSION) {
            files.push((path, name));
        }
    }
    Ok(())
}

/// Walks corpus roots, applying file-level rules before decoding
pub struct Walker<'a> {
    matcher: &'a TestMatcher,
    reporter: &'a Reporter,
}

impl<'a> Walker<'a> {
    /// Walker reporting into `reporter`
    pub fn new(matcher: &'a TestMatcher, reporter: &'a Reporter) -> Self {
        Self { matcher, reporter }
    }

    /// Visit every test file under `dir` in parallel and call `run_test`
    /// once per decoded test with its key.
    ///
    /// A missing `dir` is reported as a skip. A file that fails to decode
    /// is reported as a load failure without affecting other files.
    pub fn walk<T, F>(&self, dir: &Path, run_test: F) -> HarnessResult<()>
    where
        T: DeserializeOwned,
        F: Fn(&str, &T) + Sync,
    {
        if !dir.is_dir() {
            let message = missing_dir_message(dir);
            tracing::warn!("{message}");
            let mut case = CaseResult::skipped(dir.display().to_string(), "missing test files");
            case.log(message);
            self.reporter.record(case);
            return Ok(());
        }

        let files = collect_files(self.matcher, dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "Walking test corpus");

        files
            .par_iter()
            .for_each(|(path, name)| self.run_file(path, name, &run_test));
        Ok(())
    }

    fn run_file<T, F>(&self, path: &Path, name: &str, run_test: &F)
    where
        T: DeserializeOwned,
        F: Fn(&str, &T) + Sync,
    {
        if let Some(skip) = self.matcher.find_skip(name) {
            self.reporter.record(CaseResult::skipped(name, skip.reason));
            return;
        }
        if self.matcher.excluded_by_runonly(name) {
            self.reporter
                .record(CaseResult::skipped(name, crate::matcher::SKIP_RUNONLY));
            return;
        }

        let tests = match load_tests::<T>(path) {
            Ok(tests) => tests,
            Err(e) => {
                let mut case = CaseResult::new(name);
                case.fail(FailureKind::Load, e.to_string());
                self.reporter.record(case);
                return;
            }
        };

        if tests.len() == 1 {
            if let Some(test) = tests.values().next() {
                self.guarded(name, |key| run_test(key, test));
            }
            return;
        }
        for (test_name, test) in &tests {
            let key = format!("{name}/{test_name}");
            if let Some(skip) = self.matcher.find_skip(&key) {
                self.reporter.record(CaseResult::skipped(key, skip.reason));
                continue;
            }
            self.guarded(&key, |key| run_test(key, test));
        }
    }

    /// Panics escaping the callback are charged to the test, not the walk
    fn guarded(&self, key: &str, body: impl FnOnce(&str)) {
        let case = run_case(key, |_| body(key));
        if !case.failures.is_empty() {
            self.reporter.record(case);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_collect_files_prunes_skip_load_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "stExample/add.json", "{}");
        write(tmp.path(), "stTimeConsuming/big.json", "{}");
        write(tmp.path(), "stExample/readme.md", "");

        let mut tm = TestMatcher::new();
        tm.skip_load("^stTimeConsuming/").unwrap();
        let files = collect_files(&tm, tmp.path()).unwrap();
        let keys: Vec<_> = files.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(keys, vec!["stExample/add.json"]);
    }

    #[test]
    fn test_multi_test_file_keys() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "multi.json", r#"{"b": 2, "a": 1, "c": 3}"#);

        let mut tm = TestMatcher::new();
        tm.skip_load("^multi.json/c$").unwrap();
        let reporter = Reporter::new();
        let seen = Mutex::new(Vec::new());
        Walker::new(&tm, &reporter)
            .walk::<u32, _>(tmp.path(), |key, value| seen.lock().push((key.to_string(), *value)))
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(
            seen,
            vec![("multi.json/a".to_string(), 1), ("multi.json/b".to_string(), 2)]
        );
        let results = reporter.into_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "multi.json/c");
    }
}
