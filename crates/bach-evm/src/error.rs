//! EVM error types

use bach_crypto::{Address, U256};
use thiserror::Error;

/// Errors raised while executing bytecode.
///
/// These never invalidate a transaction: the frame's gas is consumed
/// (except on revert) and its state changes are rolled back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvmError {
    /// Out of gas
    #[error("out of gas")]
    OutOfGas,

    /// Gas or memory arithmetic exceeded 64 bits
    #[error("gas uint64 overflow")]
    GasUintOverflow,

    /// Stack underflow
    #[error("stack underflow ({have} <=> {want})")]
    StackUnderflow {
        /// Items on the stack
        have: usize,
        /// Items required
        want: usize,
    },

    /// Stack overflow
    #[error("stack limit reached 1024")]
    StackOverflow,

    /// Jump target is not a JUMPDEST
    #[error("invalid jump destination")]
    InvalidJump,

    /// Opcode undefined for the active fork
    #[error("invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),

    /// State modification in a read-only frame
    #[error("write protection")]
    WriteProtection,

    /// Execution ended with REVERT
    #[error("execution reverted")]
    ExecutionReverted,

    /// Value transfer exceeds the caller's balance
    #[error("insufficient balance for transfer")]
    InsufficientBalance,

    /// Creation target already holds code or a nonce
    #[error("contract address collision")]
    ContractAddressCollision,

    /// Deployed code exceeds the EIP-170 limit
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,

    /// Not enough gas left to pay for code deposit
    #[error("contract creation code storage out of gas")]
    CodeStoreOutOfGas,

    /// Deployed code starts with 0xEF (EIP-3541)
    #[error("invalid code: must not begin with 0xef")]
    InvalidCode,
}

/// Consensus errors that make a message invalid before or while buying gas.
///
/// Returned by `apply_message`; no state change survives them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    /// Message nonce below the sender's nonce
    #[error("nonce too low: address {address:?}, tx: {tx} state: {state}")]
    NonceTooLow {
        /// Sender
        address: Address,
        /// Message nonce
        tx: u64,
        /// Account nonce
        state: u64,
    },

    /// Message nonce above the sender's nonce
    #[error("nonce too high: address {address:?}, tx: {tx} state: {state}")]
    NonceTooHigh {
        /// Sender
        address: Address,
        /// Message nonce
        tx: u64,
        /// Account nonce
        state: u64,
    },

    /// Sender nonce cannot be incremented
    #[error("nonce has max value: address {address:?}, nonce: {nonce}")]
    NonceMax {
        /// Sender
        address: Address,
        /// Account nonce
        nonce: u64,
    },

    /// Sender has deployed code (EIP-3607)
    #[error("sender not an eoa: address {0:?}")]
    SenderNoEoa(Address),

    /// Message gas exceeds the block gas limit
    #[error("gas limit reached")]
    GasLimitReached,

    /// Sender cannot pay for gas plus value
    #[error("insufficient funds for gas * price + value: address {address:?} have {have} want {want}")]
    InsufficientFunds {
        /// Sender
        address: Address,
        /// Sender balance
        have: U256,
        /// Required balance
        want: U256,
    },

    /// Gas limit below the intrinsic cost
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGas {
        /// Message gas limit
        have: u64,
        /// Intrinsic cost
        want: u64,
    },

    /// Intrinsic cost overflows 64 bits
    #[error("gas uint64 overflow")]
    GasUintOverflow,

    /// Tip cap above fee cap
    #[error("max priority fee per gas higher than max fee per gas: address {address:?}, maxPriorityFeePerGas: {tip}, maxFeePerGas: {fee_cap}")]
    TipAboveFeeCap {
        /// Sender
        address: Address,
        /// Tip cap
        tip: U256,
        /// Fee cap
        fee_cap: U256,
    },

    /// Fee cap below the block base fee
    #[error("max fee per gas less than block base fee: address {address:?}, maxFeePerGas: {fee_cap} baseFee: {base_fee}")]
    FeeCapTooLow {
        /// Sender
        address: Address,
        /// Fee cap
        fee_cap: U256,
        /// Block base fee
        base_fee: U256,
    },

    /// Creation init code exceeds the EIP-3860 limit
    #[error("max initcode size exceeded: code size {size} limit {limit}")]
    MaxInitCodeSizeExceeded {
        /// Init code size
        size: usize,
        /// Allowed size
        limit: usize,
    },

    /// Sender cannot cover the transferred value
    #[error("insufficient funds for transfer: address {0:?}")]
    InsufficientFundsForTransfer(Address),
}

/// Fork name could not be turned into a chain configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForkError {
    /// Unknown fork name
    #[error("unsupported fork {0:?}")]
    Unsupported(String),

    /// `+eip` suffix is not a number or not activatable
    #[error("unsupported EIP {eip:?} in fork {fork:?}")]
    InvalidEip {
        /// Full fork string
        fork: String,
        /// Offending suffix
        eip: String,
    },
}

/// Result type for bytecode execution
pub type EvmResult<T> = Result<T, EvmError>;
