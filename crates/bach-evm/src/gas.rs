//! Gas cost calculations

use crate::config::Rules;
use crate::context::AccessListItem;
use crate::error::{EvmError, EvmResult};
use crate::opcode::Opcode;

/// Gas costs for EVM operations
pub mod cost {
    /// Zero gas
    pub const ZERO: u64 = 0;
    /// Base gas
    pub const BASE: u64 = 2;
    /// Very low gas
    pub const VERYLOW: u64 = 3;
    /// Low gas
    pub const LOW: u64 = 5;
    /// Mid gas
    pub const MID: u64 = 8;
    /// High gas
    pub const HIGH: u64 = 10;
    /// Jump dest gas
    pub const JUMPDEST: u64 = 1;
    /// Block hash gas
    pub const BLOCKHASH: u64 = 20;

    /// Exp gas
    pub const EXP: u64 = 10;
    /// Exp byte gas before EIP-160
    pub const EXP_BYTE_FRONTIER: u64 = 10;
    /// Exp byte gas (EIP-160)
    pub const EXP_BYTE: u64 = 50;
    /// Keccak base gas
    pub const KECCAK256: u64 = 30;
    /// Keccak word gas
    pub const KECCAK256_WORD: u64 = 6;
    /// Copy gas per word
    pub const COPY: u64 = 3;
    /// Memory gas per word
    pub const MEMORY: u64 = 3;
    /// Quadratic memory denominator
    pub const QUAD_COEFF_DIV: u64 = 512;

    /// Account read before EIP-150
    pub const EXT_FRONTIER: u64 = 20;
    /// BALANCE under EIP-150
    pub const BALANCE_EIP150: u64 = 400;
    /// BALANCE under EIP-1884
    pub const BALANCE_EIP1884: u64 = 700;
    /// EXTCODESIZE under EIP-150
    pub const EXTCODE_EIP150: u64 = 700;
    /// EXTCODEHASH under EIP-1052
    pub const EXTCODEHASH_CONSTANTINOPLE: u64 = 400;
    /// EXTCODEHASH under EIP-1884
    pub const EXTCODEHASH_EIP1884: u64 = 700;
    /// SLOAD before EIP-150
    pub const SLOAD_FRONTIER: u64 = 50;
    /// SLOAD under EIP-150
    pub const SLOAD_EIP150: u64 = 200;
    /// SLOAD under EIP-1884
    pub const SLOAD_EIP1884: u64 = 800;

    /// Warm account or slot access (EIP-2929)
    pub const WARM_STORAGE_READ: u64 = 100;
    /// Cold account access (EIP-2929)
    pub const COLD_ACCOUNT_ACCESS: u64 = 2600;
    /// Cold slot access (EIP-2929)
    pub const COLD_SLOAD: u64 = 2100;

    /// Sstore set gas
    pub const SSTORE_SET: u64 = 20000;
    /// Sstore reset gas
    pub const SSTORE_RESET: u64 = 5000;
    /// Sstore clear refund before EIP-3529
    pub const SSTORE_CLEAR_REFUND: u64 = 15000;
    /// Sstore clear refund (EIP-3529)
    pub const SSTORE_CLEAR_REFUND_EIP3529: u64 = 4800;
    /// Minimum gas left for SSTORE (EIP-2200)
    pub const SSTORE_SENTRY: u64 = 2300;

    /// Log gas
    pub const LOG: u64 = 375;
    /// Log topic gas
    pub const LOG_TOPIC: u64 = 375;
    /// Log data gas (per byte)
    pub const LOG_DATA: u64 = 8;

    /// Code deposit gas per byte
    pub const CREATE_DATA: u64 = 200;
    /// Init code gas per word (EIP-3860)
    pub const INIT_CODE_WORD: u64 = 2;

    /// Transaction gas
    pub const TX: u64 = 21000;
    /// Contract creation transaction gas (Homestead)
    pub const TX_CREATE: u64 = 53000;
    /// Transaction data zero byte
    pub const TX_DATA_ZERO: u64 = 4;
    /// Transaction data non-zero byte before EIP-2028
    pub const TX_DATA_NONZERO_FRONTIER: u64 = 68;
    /// Transaction data non-zero byte (EIP-2028)
    pub const TX_DATA_NONZERO: u64 = 16;
    /// Access list address gas
    pub const ACCESS_LIST_ADDRESS: u64 = 2400;
    /// Access list storage key gas
    pub const ACCESS_LIST_STORAGE_KEY: u64 = 1900;

    /// Max stack size
    pub const MAX_STACK_SIZE: usize = 1024;
    /// Max code size (EIP-170)
    pub const MAX_CODE_SIZE: usize = 24576;
    /// Max init code size (EIP-3860)
    pub const MAX_INIT_CODE_SIZE: usize = 49152;
}

/// Constant gas for `op` under `rules`; `None` if the opcode is undefined
pub fn constant_gas(op: Opcode, rules: &Rules) -> Option<u64> {
    let gas = match op {
        Opcode::STOP | Opcode::RETURN | Opcode::INVALID => cost::ZERO,
        Opcode::REVERT if rules.is_byzantium() => cost::ZERO,

        Opcode::ADDRESS
        | Opcode::ORIGIN
        | Opcode::CALLER
        | Opcode::CALLVALUE
        | Opcode::CALLDATASIZE
        | Opcode::CODESIZE
        | Opcode::GASPRICE
        | Opcode::COINBASE
        | Opcode::TIMESTAMP
        | Opcode::NUMBER
        | Opcode::DIFFICULTY
        | Opcode::GASLIMIT
        | Opcode::POP
        | Opcode::PC
        | Opcode::MSIZE
        | Opcode::GAS => cost::BASE,
        Opcode::RETURNDATASIZE if rules.is_byzantium() => cost::BASE,
        Opcode::CHAINID if rules.has_eip(1344) => cost::BASE,
        Opcode::BASEFEE if rules.has_eip(3198) => cost::BASE,
        Opcode::PUSH0 if rules.has_eip(3855) => cost::BASE,

        Opcode::ADD
        | Opcode::SUB
        | Opcode::NOT
        | Opcode::LT
        | Opcode::GT
        | Opcode::SLT
        | Opcode::SGT
        | Opcode::EQ
        | Opcode::ISZERO
        | Opcode::AND
        | Opcode::OR
        | Opcode::XOR
        | Opcode::BYTE
        | Opcode::CALLDATALOAD
        | Opcode::MLOAD
        | Opcode::MSTORE
        | Opcode::MSTORE8
        | Opcode::CALLDATACOPY
        | Opcode::CODECOPY => cost::VERYLOW,
        Opcode::SHL | Opcode::SHR | Opcode::SAR if rules.is_constantinople() => cost::VERYLOW,
        op if op.push_size() > 0 || op.dup_depth() > 0 || op.swap_depth() > 0 => cost::VERYLOW,

        Opcode::MUL
        | Opcode::DIV
        | Opcode::SDIV
        | Opcode::MOD
        | Opcode::SMOD
        | Opcode::SIGNEXTEND => cost::LOW,
        Opcode::SELFBALANCE if rules.has_eip(1884) => cost::LOW,

        Opcode::ADDMOD | Opcode::MULMOD | Opcode::JUMP => cost::MID,
        Opcode::JUMPI => cost::HIGH,
        Opcode::JUMPDEST => cost::JUMPDEST,
        Opcode::EXP => cost::EXP,
        Opcode::KECCAK256 => cost::KECCAK256,
        Opcode::BLOCKHASH => cost::BLOCKHASH,

        Opcode::BALANCE => match rules {
            r if r.is_berlin() => cost::WARM_STORAGE_READ,
            r if r.has_eip(1884) => cost::BALANCE_EIP1884,
            r if r.is_eip150() => cost::BALANCE_EIP150,
            _ => cost::EXT_FRONTIER,
        },
        Opcode::EXTCODESIZE => match rules {
            r if r.is_berlin() => cost::WARM_STORAGE_READ,
            r if r.is_eip150() => cost::EXTCODE_EIP150,
            _ => cost::EXT_FRONTIER,
        },
        Opcode::EXTCODEHASH if rules.is_constantinople() => match rules {
            r if r.is_berlin() => cost::WARM_STORAGE_READ,
            r if r.has_eip(1884) => cost::EXTCODEHASH_EIP1884,
            _ => cost::EXTCODEHASH_CONSTANTINOPLE,
        },
        Opcode::SLOAD => match rules {
            r if r.is_berlin() => cost::ZERO,
            r if r.has_eip(1884) => cost::SLOAD_EIP1884,
            r if r.is_eip150() => cost::SLOAD_EIP150,
            _ => cost::SLOAD_FRONTIER,
        },
        Opcode::SSTORE => cost::ZERO,

        op => match op.log_topics() {
            Some(topics) => cost::LOG + cost::LOG_TOPIC * topics as u64,
            None => return None,
        },
    };
    Some(gas)
}

/// Words needed to hold `size` bytes
pub fn to_word_size(size: u64) -> u64 {
    size.div_ceil(32)
}

/// Total cost of a memory of `words` words
pub fn memory_word_cost(words: u64) -> EvmResult<u64> {
    if words > 0xffff_ffff {
        return Err(EvmError::GasUintOverflow);
    }
    Ok(words * cost::MEMORY + words * words / cost::QUAD_COEFF_DIV)
}

/// Cost of growing memory from `current_size` to `new_size` bytes
pub fn memory_gas(current_size: usize, new_size: u64) -> EvmResult<u64> {
    let current_words = to_word_size(current_size as u64);
    let new_words = to_word_size(new_size);
    if new_words <= current_words {
        return Ok(0);
    }
    Ok(memory_word_cost(new_words)? - memory_word_cost(current_words)?)
}

/// Per-word cost of copying `size` bytes
pub fn copy_gas(size: u64, per_word: u64) -> EvmResult<u64> {
    to_word_size(size)
        .checked_mul(per_word)
        .ok_or(EvmError::GasUintOverflow)
}

/// Intrinsic cost of a message
pub fn intrinsic_gas(
    data: &[u8],
    access_list: &[AccessListItem],
    is_create: bool,
    rules: &Rules,
) -> Option<u64> {
    let mut gas = if is_create && rules.is_homestead() {
        cost::TX_CREATE
    } else {
        cost::TX
    };

    if !data.is_empty() {
        let non_zero = data.iter().filter(|b| **b != 0).count() as u64;
        let zero = data.len() as u64 - non_zero;
        let non_zero_gas = if rules.is_istanbul() {
            cost::TX_DATA_NONZERO
        } else {
            cost::TX_DATA_NONZERO_FRONTIER
        };
        gas = gas.checked_add(non_zero.checked_mul(non_zero_gas)?)?;
        gas = gas.checked_add(zero.checked_mul(cost::TX_DATA_ZERO)?)?;

        if is_create && rules.has_eip(3860) {
            gas = gas.checked_add(to_word_size(data.len() as u64) * cost::INIT_CODE_WORD)?;
        }
    }

    if !access_list.is_empty() {
        let keys: u64 = access_list.iter().map(|(_, keys)| keys.len() as u64).sum();
        gas = gas.checked_add(access_list.len() as u64 * cost::ACCESS_LIST_ADDRESS)?;
        gas = gas.checked_add(keys * cost::ACCESS_LIST_STORAGE_KEY)?;
    }
    Some(gas)
}

/// Refund granted for clearing a slot
pub fn sstore_clear_refund(rules: &Rules) -> u64 {
    if rules.has_eip(3529) {
        cost::SSTORE_CLEAR_REFUND_EIP3529
    } else {
        cost::SSTORE_CLEAR_REFUND
    }
}

/// Largest share of used gas that may be refunded, as a divisor
pub fn max_refund_quotient(rules: &Rules) -> u64 {
    if rules.has_eip(3529) {
        5
    } else {
        2
    }
}
