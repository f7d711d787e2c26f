//! Harness error types

use bach_crypto::H256;
use bach_evm::{EvmError, TxError};
use bach_state::StateError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a harness run or a whole file
#[derive(Debug, Error)]
pub enum HarnessError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Test file is not valid JSON for the expected vector shape
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// File being decoded
        path: PathBuf,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file error
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Rule pattern does not compile
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// Pattern as registered
        pattern: String,
        /// Regex error
        #[source]
        source: regex::Error,
    },

    /// `fails` rule registered without a reason
    #[error("fail rule {0:?} needs a reason")]
    EmptyFailReason(String),

    /// Benchmark file must hold exactly one test
    #[error("wrong number of keys in {path}: {count}")]
    WrongKeyCount {
        /// Benchmark file
        path: PathBuf,
        /// Number of tests found
        count: usize,
    },

    /// Benchmark context could not be built
    #[error("benchmark setup: {0}")]
    BenchSetup(#[from] CaseError),

    /// Interpreter error inside a timed iteration
    #[error("benchmark iteration failed: {0}")]
    Evm(#[from] EvmError),

    /// State database error
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Worker pool could not be built
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Why one sub-case run did not match its vector.
///
/// Compared structurally by the triage determinism check, so every
/// variant carries plain data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaseError {
    /// Message rejected by the engine
    #[error("{0}")]
    Tx(#[from] TxError),

    /// Raw transaction bytes did not decode or recover
    #[error("invalid txbytes: {0}")]
    TxBytes(String),

    /// Message could not be built from the transaction template
    #[error("{0}")]
    Message(String),

    /// Vector expected an exception but the engine accepted the message
    #[error("expected error {0:?}, got no error")]
    MissingException(String),

    /// Post-state root differs
    #[error("post state root mismatch: got {got:x}, want {want:x}")]
    RootMismatch {
        /// Computed root
        got: H256,
        /// Expected root
        want: H256,
    },

    /// Logs hash differs
    #[error("post state logs hash mismatch: got {got:x}, want {want:x}")]
    LogsMismatch {
        /// Computed hash
        got: H256,
        /// Expected hash
        want: H256,
    },

    /// Snapshot journal could not be flushed
    #[error("snapshot journal: {0}")]
    Snapshot(String),

    /// Case is listed as failing but passed
    #[error("test succeeded unexpectedly")]
    UnexpectedSuccess,

    /// Several facets failed together
    #[error("{}", Facets(.0))]
    Multiple(Vec<CaseError>),
}

struct Facets<'a>(&'a [CaseError]);

impl fmt::Display for Facets<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl CaseError {
    /// Collapse collected facets: none is success, one is itself
    pub fn from_facets(mut facets: Vec<CaseError>) -> Result<(), CaseError> {
        match facets.len() {
            0 => Ok(()),
            1 => Err(facets.remove(0)),
            _ => Err(CaseError::Multiple(facets)),
        }
    }

    /// Whether the engine (not the verification) reported this error
    pub fn is_engine_error(&self) -> bool {
        match self {
            CaseError::Tx(_) | CaseError::TxBytes(_) | CaseError::Message(_) => true,
            CaseError::Multiple(facets) => facets.iter().any(CaseError::is_engine_error),
            _ => false,
        }
    }
}
