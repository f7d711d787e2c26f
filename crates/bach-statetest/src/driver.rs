//! Runs every subtest of a state test in both backends

use crate::error::CaseError;
use crate::matcher::TestMatcher;
use crate::report::{run_case, CaseResult, Reporter};
use crate::state_test::{supported_fork, RunOutcome, StateBackend, StateTest, Subtest};
use crate::triage::with_trace;
use bach_evm::VmConfig;
use rayon::prelude::*;

/// Key of one sub-case: `<name>/<fork>/<index>/<mode>`
pub fn case_key(name: &str, subtest: &Subtest, backend: StateBackend) -> String {
    format!("{name}/{}/{}/{backend}", subtest.fork, subtest.index)
}

/// Run each (subtest, backend) pair of `test` as an independent case and
/// record the results
pub fn run_subtests(matcher: &TestMatcher, reporter: &Reporter, name: &str, test: &StateTest) {
    let cases: Vec<(Subtest, StateBackend)> = test
        .subtests()
        .into_iter()
        .flat_map(|subtest| StateBackend::ALL.map(|backend| (subtest.clone(), backend)))
        .collect();

    cases.par_iter().for_each(|(subtest, backend)| {
        reporter.record(run_subtest(matcher, name, test, subtest, *backend));
    });
}

/// Run one subtest against one backend
pub fn run_subtest(
    matcher: &TestMatcher,
    name: &str,
    test: &StateTest,
    subtest: &Subtest,
    backend: StateBackend,
) -> CaseResult {
    run_subtest_with(matcher, name, test, subtest, backend, |config| {
        test.run(subtest, config, backend)
    })
}

/// Verify the outcome of `execute` for one subtest and backend
pub(crate) fn run_subtest_with<F>(
    matcher: &TestMatcher,
    name: &str,
    test: &StateTest,
    subtest: &Subtest,
    backend: StateBackend,
    mut execute: F,
) -> CaseResult
where
    F: FnMut(&mut VmConfig) -> RunOutcome,
{
    let key = case_key(name, subtest, backend);
    run_case(key.clone(), |case| {
        if let Err(e) = supported_fork(&subtest.fork) {
            case.skip(e.to_string());
            return;
        }
        let expects_exception = test.post(subtest).is_some_and(|post| post.expects_exception());

        // Rule notes of the last attempt
        let mut notes = Vec::new();
        with_trace(case, test.gas_limit(subtest), |config| {
            notes.clear();
            let mut outcome = execute(config);
            if backend == StateBackend::Snap {
                if let (Some(snaps), Some(state)) = (outcome.snaps.as_ref(), outcome.state.as_mut()) {
                    snaps
                        .journal(state.intermediate_root(false))
                        .map_err(|e| CaseError::Snapshot(e.to_string()))?;
                }
            }
            // Exception strings are not compared, any engine error will do
            if expects_exception
                && outcome
                    .result
                    .as_ref()
                    .err()
                    .is_some_and(CaseError::is_engine_error)
            {
                return Ok(());
            }
            matcher.check_failure(&key, outcome.result, &mut notes)
        });
        for note in notes {
            case.log(note);
        }
    })
}
