//! # bach-evm
//!
//! Reference EVM used by the state-test harness.
//!
//! This crate provides:
//! - Fork selection from fixture fork names (`chain_config`)
//! - Block, transaction and message contexts
//! - A bytecode interpreter with fork-aware gas metering
//! - Message application with nonce, fee and intrinsic gas checks
//! - Step tracing with a JSON line logger
//!
//! Message calls and contract creation from inside bytecode (CALL family,
//! CREATE/CREATE2, SELFDESTRUCT) and precompiles are not implemented; those
//! opcodes halt with `InvalidOpcode`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcode;
pub mod stack;
pub mod tracer;
pub mod transition;

pub use config::{chain_config, ChainConfig, Fork, Rules, VmConfig};
pub use context::{AccessListItem, BlockContext, GetHashFn, Header, Message, TxContext};
pub use contract::Contract;
pub use error::{EvmError, EvmResult, ForkError, TxError};
pub use interpreter::{create_address, Evm, FrameResult};
pub use opcode::Opcode;
pub use tracer::{JsonLogger, SharedBuffer, StepLog, Tracer};
pub use transition::{apply_message, ExecutionResult};
