//! Message application: nonce and fee checks, gas purchase, execution, refunds

use crate::context::{Message, TxContext};
use crate::error::{EvmError, TxError};
use crate::gas::{self, cost};
use crate::interpreter::Evm;
use bach_crypto::{H256, U256, EMPTY_CODE_HASH};

/// Outcome of a message that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Gas charged to the sender after refunds
    pub used_gas: u64,
    /// Execution error; the message is still included
    pub error: Option<EvmError>,
    /// Returned data, or revert data
    pub output: Vec<u8>,
}

impl ExecutionResult {
    /// Whether execution ended with an error
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Revert data, if execution reverted
    pub fn revert_data(&self) -> Option<&[u8]> {
        (self.error == Some(EvmError::ExecutionReverted)).then_some(self.output.as_slice())
    }
}

/// Apply `msg` to the EVM's state.
///
/// A `TxError` means the message is invalid; every state change it made
/// is rolled back. Execution errors are reported in the result instead.
pub fn apply_message(evm: &mut Evm<'_>, msg: &Message) -> Result<ExecutionResult, TxError> {
    evm.set_tx_context(TxContext::new(msg));
    let snapshot = evm.state_mut().snapshot();
    let result = transition(evm, msg);
    if result.is_err() {
        if let Err(e) = evm.state_mut().revert_to_snapshot(snapshot) {
            tracing::error!(error = %e, "Failed to revert invalid message");
        }
    }
    result
}

fn transition(evm: &mut Evm<'_>, msg: &Message) -> Result<ExecutionResult, TxError> {
    pre_check(evm, msg)?;
    buy_gas(evm, msg)?;

    let rules = evm.rules().clone();
    let intrinsic = gas::intrinsic_gas(&msg.data, &msg.access_list, msg.is_create(), &rules)
        .ok_or(TxError::GasUintOverflow)?;
    if msg.gas_limit < intrinsic {
        return Err(TxError::IntrinsicGas {
            have: msg.gas_limit,
            want: intrinsic,
        });
    }
    let gas = msg.gas_limit - intrinsic;

    if !msg.value.is_zero() && evm.state().balance(&msg.from) < msg.value {
        return Err(TxError::InsufficientFundsForTransfer(msg.from));
    }
    if msg.is_create() && rules.has_eip(3860) && msg.data.len() > cost::MAX_INIT_CODE_SIZE {
        return Err(TxError::MaxInitCodeSizeExceeded {
            size: msg.data.len(),
            limit: cost::MAX_INIT_CODE_SIZE,
        });
    }

    evm.prepare_access_list(msg.from, msg.to, &msg.access_list);

    let frame = match msg.to {
        None => evm.create(msg.from, msg.data.clone(), gas, msg.value).0,
        Some(to) => {
            let nonce = evm.state().nonce(&msg.from);
            evm.state_mut().set_nonce(msg.from, nonce + 1);
            evm.call(msg.from, to, &msg.data, gas, msg.value)
        }
    };

    let mut gas_left = frame.gas_left;
    let used = msg.gas_limit - gas_left;
    let refund = (used / gas::max_refund_quotient(&rules)).min(evm.state().refund());
    gas_left += refund;

    let remaining = U256::from(gas_left).saturating_mul(msg.gas_price);
    evm.state_mut().add_balance(msg.from, remaining);

    let used_gas = msg.gas_limit - gas_left;
    let effective_tip = if rules.is_london() {
        let base_fee = evm.block.base_fee.unwrap_or_default();
        msg.gas_tip_cap.min(msg.gas_fee_cap.saturating_sub(base_fee))
    } else {
        msg.gas_price
    };
    let coinbase = evm.block.coinbase;
    evm.state_mut()
        .add_balance(coinbase, U256::from(used_gas).saturating_mul(effective_tip));

    Ok(ExecutionResult {
        used_gas,
        error: frame.error,
        output: frame.output,
    })
}

fn pre_check(evm: &Evm<'_>, msg: &Message) -> Result<(), TxError> {
    let state = evm.state();
    let nonce = state.nonce(&msg.from);
    if nonce < msg.nonce {
        return Err(TxError::NonceTooHigh {
            address: msg.from,
            tx: msg.nonce,
            state: nonce,
        });
    }
    if nonce > msg.nonce {
        return Err(TxError::NonceTooLow {
            address: msg.from,
            tx: msg.nonce,
            state: nonce,
        });
    }
    if nonce == u64::MAX {
        return Err(TxError::NonceMax {
            address: msg.from,
            nonce,
        });
    }

    let code_hash = state.code_hash(&msg.from);
    if code_hash != H256::zero() && code_hash != EMPTY_CODE_HASH {
        return Err(TxError::SenderNoEoa(msg.from));
    }

    if evm.rules().is_london() {
        if msg.gas_fee_cap < msg.gas_tip_cap {
            return Err(TxError::TipAboveFeeCap {
                address: msg.from,
                tip: msg.gas_tip_cap,
                fee_cap: msg.gas_fee_cap,
            });
        }
        let base_fee = evm.block.base_fee.unwrap_or_default();
        if msg.gas_fee_cap < base_fee {
            return Err(TxError::FeeCapTooLow {
                address: msg.from,
                fee_cap: msg.gas_fee_cap,
                base_fee,
            });
        }
    }
    Ok(())
}

fn buy_gas(evm: &mut Evm<'_>, msg: &Message) -> Result<(), TxError> {
    let gas = U256::from(msg.gas_limit);
    let cost = gas.saturating_mul(msg.gas_price);
    let cap = if evm.rules().is_london() {
        msg.gas_fee_cap
    } else {
        msg.gas_price
    };
    let want = gas.saturating_mul(cap).saturating_add(msg.value);
    let have = evm.state().balance(&msg.from);
    if have < want {
        return Err(TxError::InsufficientFunds {
            address: msg.from,
            have,
            want,
        });
    }
    if msg.gas_limit > evm.block.gas_limit {
        return Err(TxError::GasLimitReached);
    }
    evm.state_mut()
        .sub_balance(msg.from, cost)
        .map_err(|_| TxError::InsufficientFunds {
            address: msg.from,
            have,
            want: cost,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, Fork, VmConfig};
    use crate::context::{BlockContext, Header};
    use bach_crypto::Address;
    use bach_state::{Account, StateDb};

    const SENDER: Address = Address::repeat_byte(0x11);
    const RECEIVER: Address = Address::repeat_byte(0x22);
    const COINBASE: Address = Address::repeat_byte(0x33);

    fn zero_hash(_: u64) -> H256 {
        H256::zero()
    }

    fn block() -> BlockContext {
        let header = Header {
            coinbase: COINBASE,
            number: 1,
            gas_limit: 1_000_000,
            base_fee: Some(U256::from(10)),
            ..Header::default()
        };
        BlockContext::new(&header, zero_hash, None)
    }

    fn message(gas_limit: u64) -> Message {
        Message {
            from: SENDER,
            to: Some(RECEIVER),
            nonce: 0,
            value: U256::from(5),
            gas_limit,
            gas_price: U256::from(10),
            gas_fee_cap: U256::from(10),
            gas_tip_cap: U256::zero(),
            data: Vec::new(),
            access_list: Vec::new(),
        }
    }

    fn apply(state: &mut StateDb, fork: Fork, msg: &Message) -> Result<ExecutionResult, TxError> {
        let mut config = VmConfig::default();
        let chain = ChainConfig::new(fork);
        let mut evm = Evm::new(block(), TxContext::new(msg), state, &chain, &mut config);
        apply_message(&mut evm, msg)
    }

    fn funded_state() -> StateDb {
        StateDb::from_accounts([(SENDER, Account::new(0, U256::from(1_000_000_000u64), vec![]))])
    }

    #[test]
    fn test_plain_transfer() {
        let mut state = funded_state();
        let result = apply(&mut state, Fork::London, &message(21_000)).unwrap();
        assert_eq!(result.used_gas, 21_000);
        assert!(!result.failed());
        assert_eq!(state.balance(&RECEIVER), U256::from(5));
        assert_eq!(state.nonce(&SENDER), 1);
        assert_eq!(
            state.balance(&SENDER),
            U256::from(1_000_000_000u64 - 5 - 21_000 * 10)
        );
        // Tip is zero, coinbase only touched
        assert_eq!(state.balance(&COINBASE), U256::zero());
    }

    #[test]
    fn test_intrinsic_gas_too_low_rolls_back() {
        let mut state = funded_state();
        let err = apply(&mut state, Fork::London, &message(20_000)).unwrap_err();
        assert_eq!(err, TxError::IntrinsicGas { have: 20_000, want: 21_000 });
        assert_eq!(state.balance(&SENDER), U256::from(1_000_000_000u64));
        assert_eq!(state.nonce(&SENDER), 0);
    }

    #[test]
    fn test_nonce_mismatch() {
        let mut state = funded_state();
        let mut msg = message(21_000);
        msg.nonce = 4;
        assert!(matches!(
            apply(&mut state, Fork::London, &msg),
            Err(TxError::NonceTooHigh { tx: 4, state: 0, .. })
        ));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut state = StateDb::from_accounts([(SENDER, Account::new(0, U256::from(100), vec![]))]);
        assert!(matches!(
            apply(&mut state, Fork::London, &message(21_000)),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_fee_cap_below_base_fee() {
        let mut state = funded_state();
        let mut msg = message(21_000);
        msg.gas_fee_cap = U256::from(9);
        assert!(matches!(
            apply(&mut state, Fork::London, &msg),
            Err(TxError::FeeCapTooLow { .. })
        ));
        // Pre-London the fee cap is not checked
        assert!(apply(&mut state, Fork::Berlin, &msg).is_ok());
    }

    #[test]
    fn test_gas_limit_above_block() {
        let mut state = funded_state();
        assert_eq!(
            apply(&mut state, Fork::London, &message(2_000_000)),
            Err(TxError::GasLimitReached)
        );
    }

    #[test]
    fn test_failed_execution_is_not_a_tx_error() {
        // INVALID
        let mut state = StateDb::from_accounts([
            (SENDER, Account::new(0, U256::from(1_000_000_000u64), vec![])),
            (RECEIVER, Account::new(0, U256::zero(), vec![0xfe])),
        ]);
        let result = apply(&mut state, Fork::London, &message(50_000)).unwrap();
        assert_eq!(result.error, Some(EvmError::InvalidOpcode(0xfe)));
        assert_eq!(result.used_gas, 50_000);
        // Value transfer undone, nonce still bumped
        assert_eq!(state.balance(&RECEIVER), U256::zero());
        assert_eq!(state.nonce(&SENDER), 1);
    }

    #[test]
    fn test_sstore_clear_refund() {
        // PUSH1 0, PUSH1 0, SSTORE: clears slot 0 which holds 1
        let mut receiver = Account::new(0, U256::zero(), vec![0x60, 0, 0x60, 0, 0x55]);
        receiver.storage.insert(H256::zero(), U256::one());
        let mut state = StateDb::from_accounts([
            (SENDER, Account::new(0, U256::from(1_000_000_000u64), vec![])),
            (RECEIVER, receiver),
        ]);
        let mut msg = message(100_000);
        msg.value = U256::zero();
        let result = apply(&mut state, Fork::Istanbul, &msg).unwrap();
        // 21000 + 6 + 5000, refund capped at half of used gas
        let used = 21_000 + 6 + 5_000;
        assert_eq!(result.used_gas, used - used / 2);
        assert_eq!(state.storage(&RECEIVER, &H256::zero()), U256::zero());
    }

    #[test]
    fn test_revert_data_exposed() {
        let result = ExecutionResult {
            used_gas: 1,
            error: Some(EvmError::ExecutionReverted),
            output: vec![1, 2],
        };
        assert_eq!(result.revert_data(), Some(&[1u8, 2][..]));
    }
}
