//! Benchmark driver tests for bach-statetest

mod common;

use bach_statetest::{
    bench_file, make_pre_state, BenchOutcome, BenchRunner, CaseError, HarnessConfig, HarnessError,
    StateBackend, TestRunner,
};
use common::{post, state_test, vector, write_raw, write_test, LOOP, STORE_AND_LOG};
use serde_json::json;

/// Test that iterations leave the state untouched
#[test]
fn test_iterations_revert_state() {
    let test = state_test(&vector(LOOP, json!({"London": [post(0)]})));
    let subtest = &test.subtests()[0];
    let mut runner = BenchRunner::new(&test, subtest).unwrap();

    let (_, pre) = make_pre_state(&test.json().pre, StateBackend::Trie);
    let before = runner.state_root();
    assert_eq!(before, pre.state_root());

    runner.run(25).unwrap();
    assert_eq!(runner.state_root(), before);

    let mut session = runner.session();
    for _ in 0..5 {
        session.iterate().unwrap();
    }
    drop(session);
    assert_eq!(runner.state_root(), before);
}

/// Test benchmarking a vector file
#[test]
fn test_bench_file() {
    let tmp = tempfile::tempdir().unwrap();
    let value = vector(STORE_AND_LOG, json!({"Berlin": [post(0)], "Istanbul": [post(0)]}));
    write_test(tmp.path(), "loop.json", "loop", &value);

    let reports = bench_file(&tmp.path().join("loop.json"), "loop.json", 3).unwrap();
    let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["loop.json/Berlin/0", "loop.json/Istanbul/0"]);
    assert!(reports.iter().all(|r| r.iterations == 3));
    assert!(reports.iter().all(|r| r.elapsed().is_some()));
}

/// Test that benchmark files must hold exactly one test
#[test]
fn test_wrong_number_of_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let test = vector(LOOP, json!({"Berlin": [post(0)]}));
    write_raw(
        tmp.path(),
        "two.json",
        &json!({"first": test.clone(), "second": test}).to_string(),
    );

    let err = bench_file(&tmp.path().join("two.json"), "two.json", 1).unwrap_err();
    assert!(matches!(err, HarnessError::WrongKeyCount { count: 2, .. }));
    assert!(err.to_string().contains("wrong number of keys"));
}

/// Test that contract creations cannot be benchmarked
#[test]
fn test_create_is_rejected() {
    let mut value = vector(LOOP, json!({"Berlin": [post(0)]}));
    value["transaction"]["to"] = json!("");
    let test = state_test(&value);
    let err = BenchRunner::new(&test, &test.subtests()[0]).err().unwrap();
    assert_eq!(err, CaseError::Message("benchmark needs a call transaction".into()));
}

/// Test that a failing benchmark file does not stop its siblings
#[test]
fn test_failing_file_does_not_stop_others() {
    let tmp = tempfile::tempdir().unwrap();
    // INVALID as the only instruction
    write_test(tmp.path(), "a_bad.json", "bad", &vector("0xfe", json!({"Berlin": [post(0)]})));
    write_test(tmp.path(), "b_good.json", "good", &vector(LOOP, json!({"Berlin": [post(0)]})));
    let test = vector(LOOP, json!({"Berlin": [post(0)]}));
    write_raw(
        tmp.path(),
        "c_two.json",
        &json!({"first": test.clone(), "second": test}).to_string(),
    );

    let config = HarnessConfig {
        bench_dir: tmp.path().to_path_buf(),
        bench_iterations: 2,
        ..HarnessConfig::default()
    };
    let reports = TestRunner::new(config).unwrap().run_benchmarks().unwrap();

    let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a_bad.json/Berlin/0", "b_good.json/Berlin/0", "c_two.json"]);
    assert!(matches!(&reports[0].outcome, BenchOutcome::Failed(e) if e.contains("invalid opcode")));
    assert!(matches!(reports[1].outcome, BenchOutcome::Measured(_)));
    assert!(matches!(&reports[2].outcome, BenchOutcome::Failed(e) if e.contains("wrong number of keys")));
    assert!(reports.iter().filter(|r| r.failed()).count() == 2);
}

/// Test that unsupported forks are skipped while the other forks still run
#[test]
fn test_unsupported_fork_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let value = vector(LOOP, json!({"Amsterdam": [post(0)], "Berlin": [post(0)]}));
    write_test(tmp.path(), "forks.json", "forks", &value);

    let reports = bench_file(&tmp.path().join("forks.json"), "forks.json", 2).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].name, "forks.json/Amsterdam/0");
    assert!(matches!(reports[0].outcome, BenchOutcome::Skipped(_)));
    assert!(!reports[0].failed());
    assert_eq!(reports[1].name, "forks.json/Berlin/0");
    assert!(reports[1].per_iteration().is_some());
}
