//! # bach-state
//!
//! State management consumed by the state-test harness:
//! - `StateDb`: journaled in-memory account database with snapshot/revert
//! - `trie_root` / `secure_trie_root`: Merkle-Patricia root computation
//! - `SnapshotTree`: incremental diff layers over a flat base layer, with journaling

#![warn(missing_docs)]
#![warn(clippy::all)]

mod account;
mod error;
mod snapshot;
mod statedb;
mod trie;

pub use account::Account;
pub use error::{SnapshotError, StateError, StateResult};
pub use snapshot::{SnapshotTree, StateDiff, JOURNAL_VERSION};
pub use statedb::{Log, StateDb};
pub use trie::{secure_trie_root, trie_root};

pub use bach_crypto::{Address, H256, U256};
