//! Failure triage: re-run failing cases with a step tracer

use crate::error::CaseError;
use crate::report::{CaseResult, FailureKind};
use bach_evm::{JsonLogger, SharedBuffer, VmConfig};

/// Messages with a gas limit above this get no trace on failure
pub const TRACE_ERROR_LIMIT: u64 = 400_000;

/// Run `attempt` untraced; on failure report the error and, unless
/// `gas_limit` exceeds [`TRACE_ERROR_LIMIT`], run it again with a JSON
/// step logger.
///
/// The traced run must fail with the same error. A different outcome is
/// reported as [`FailureKind::NonDeterminism`]. The verdict is never
/// changed, only enriched with the trace.
pub fn with_trace<F>(case: &mut CaseResult, gas_limit: u64, mut attempt: F)
where
    F: FnMut(&mut VmConfig) -> Result<(), CaseError>,
{
    let mut config = VmConfig::default();
    let Err(first) = attempt(&mut config) else {
        return;
    };

    case.fail(FailureKind::Case, first.to_string());
    if gas_limit > TRACE_ERROR_LIMIT {
        case.log("gas limit too high for EVM trace");
        return;
    }

    let buffer = SharedBuffer::new();
    let mut config = VmConfig::with_tracer(JsonLogger::new(buffer.clone()));
    let second = attempt(&mut config);
    drop(config);

    if second.as_ref().err() != Some(&first) {
        let got = match &second {
            Ok(()) => "no error".to_string(),
            Err(err) => err.to_string(),
        };
        case.fail(
            FailureKind::NonDeterminism,
            format!("different error for second run: {got}"),
        );
    }

    if buffer.is_empty() {
        case.log("no EVM operation logs generated");
    } else {
        let trace = String::from_utf8_lossy(&buffer.contents()).into_owned();
        case.log(format!("EVM operation log:\n{trace}"));
    }
}
