//! EVM bytecode interpreter

use crate::config::{ChainConfig, Fork, Rules, VmConfig};
use crate::context::{AccessListItem, BlockContext, TxContext};
use crate::contract::Contract;
use crate::error::{EvmError, EvmResult};
use crate::gas::{self, cost};
use crate::memory::Memory;
use crate::opcode::Opcode;
use crate::stack::Stack;
use crate::tracer::StepLog;
use bach_crypto::{keccak256, Address, H256, U256, EMPTY_CODE_HASH};
use bach_state::{Log, StateDb};
use primitive_types::U512;
use rlp::RlpStream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of a top-level call or creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResult {
    /// Returned data, or revert data on `ExecutionReverted`
    pub output: Vec<u8>,
    /// Gas left to refund to the caller
    pub gas_left: u64,
    /// Execution error, if any
    pub error: Option<EvmError>,
}

impl FrameResult {
    fn failed(error: EvmError, gas_left: u64) -> Self {
        Self {
            output: Vec::new(),
            gas_left,
            error: Some(error),
        }
    }
}

/// Registers of one executing frame
#[derive(Debug, Default)]
struct Frame {
    stack: Stack,
    memory: Memory,
    pc: usize,
    /// Gas charged by the current step
    cost: u64,
}

/// Execution environment bound to one state and one interpreter config
pub struct Evm<'a> {
    /// Block context
    pub block: BlockContext,
    /// Transaction context
    pub tx: TxContext,
    chain: ChainConfig,
    rules: Rules,
    state: &'a mut StateDb,
    config: &'a mut VmConfig,
    depth: usize,
    revert_output: Vec<u8>,
    warm_accounts: HashSet<Address>,
    warm_slots: HashSet<(Address, H256)>,
    original_storage: HashMap<(Address, H256), U256>,
}

impl<'a> Evm<'a> {
    /// Bind `state` and `config` for executing in `block`
    pub fn new(
        block: BlockContext,
        tx: TxContext,
        state: &'a mut StateDb,
        chain: &ChainConfig,
        config: &'a mut VmConfig,
    ) -> Self {
        let rules = chain.rules(&config.extra_eips);
        Self {
            block,
            tx,
            chain: *chain,
            rules,
            state,
            config,
            depth: 0,
            revert_output: Vec::new(),
            warm_accounts: HashSet::new(),
            warm_slots: HashSet::new(),
            original_storage: HashMap::new(),
        }
    }

    /// Switch to a new transaction, clearing per-transaction bookkeeping
    pub fn set_tx_context(&mut self, tx: TxContext) {
        self.tx = tx;
        self.warm_accounts.clear();
        self.warm_slots.clear();
        self.original_storage.clear();
    }

    /// State being executed against
    pub fn state(&self) -> &StateDb {
        &*self.state
    }

    /// Mutable state being executed against
    pub fn state_mut(&mut self) -> &mut StateDb {
        &mut *self.state
    }

    /// Chain config
    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain
    }

    /// Active rules
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Warm the sender, recipient, precompiles and access list (EIP-2929/2930)
    pub fn prepare_access_list(
        &mut self,
        sender: Address,
        dst: Option<Address>,
        access_list: &[AccessListItem],
    ) {
        if !self.rules.is_berlin() {
            return;
        }
        self.warm_accounts.insert(sender);
        self.warm_accounts.extend(dst);
        self.warm_accounts.extend((1u64..=9).map(Address::from_low_u64_be));
        if self.rules.fork >= Fork::Shanghai {
            self.warm_accounts.insert(self.block.coinbase);
        }
        for (address, keys) in access_list {
            self.warm_accounts.insert(*address);
            self.warm_slots.extend(keys.iter().map(|key| (*address, *key)));
        }
    }

    // ==================== Frames ====================

    /// Execute the code at `to` with `input`
    pub fn call(
        &mut self,
        caller: Address,
        to: Address,
        input: &[u8],
        gas: u64,
        value: U256,
    ) -> FrameResult {
        let top = self.depth == 0;
        if top {
            if let Some(tracer) = self.config.tracer.as_mut() {
                tracer.capture_start(caller, to, false, input, gas, value);
            }
        }
        let result = self.call_inner(caller, to, input, gas, value);
        if top {
            self.capture_end(&result, gas);
        }
        result
    }

    fn call_inner(
        &mut self,
        caller: Address,
        to: Address,
        input: &[u8],
        gas: u64,
        value: U256,
    ) -> FrameResult {
        if self.state.balance(&caller) < value {
            return FrameResult::failed(EvmError::InsufficientBalance, gas);
        }
        let snapshot = self.state.snapshot();
        if !self.state.exist(&to) {
            if self.rules.is_eip158() && value.is_zero() {
                return FrameResult {
                    output: Vec::new(),
                    gas_left: gas,
                    error: None,
                };
            }
            self.state.create_account(to);
        }
        if let Err(e) = self.transfer(caller, to, value) {
            return self.finish_frame(snapshot, gas, Err(e));
        }

        let mut contract = Contract::new(caller, to, value, gas);
        contract.set_call_code(to, self.state.code_hash(&to), self.state.code(&to));
        let result = self.run(&mut contract, input, false);
        self.finish_frame(snapshot, contract.gas, result)
    }

    /// Deploy `init_code` from `caller`, returning the result and the new address
    pub fn create(
        &mut self,
        caller: Address,
        init_code: Vec<u8>,
        gas: u64,
        value: U256,
    ) -> (FrameResult, Address) {
        let nonce = self.state.nonce(&caller);
        let address = create_address(&caller, nonce);
        let top = self.depth == 0;
        if top {
            if let Some(tracer) = self.config.tracer.as_mut() {
                tracer.capture_start(caller, address, true, &init_code, gas, value);
            }
        }
        let result = self.create_inner(caller, address, nonce, init_code, gas, value);
        if top {
            self.capture_end(&result, gas);
        }
        (result, address)
    }

    fn create_inner(
        &mut self,
        caller: Address,
        address: Address,
        nonce: u64,
        init_code: Vec<u8>,
        gas: u64,
        value: U256,
    ) -> FrameResult {
        if self.state.balance(&caller) < value {
            return FrameResult::failed(EvmError::InsufficientBalance, gas);
        }
        self.state.set_nonce(caller, nonce + 1);
        if self.rules.is_berlin() {
            self.warm_accounts.insert(address);
        }

        let existing_hash = self.state.code_hash(&address);
        if self.state.nonce(&address) != 0
            || (existing_hash != H256::zero() && existing_hash != EMPTY_CODE_HASH)
        {
            return FrameResult::failed(EvmError::ContractAddressCollision, 0);
        }

        let snapshot = self.state.snapshot();
        self.state.create_account(address);
        if self.rules.is_eip158() {
            self.state.set_nonce(address, 1);
        }
        if let Err(e) = self.transfer(caller, address, value) {
            return self.finish_frame(snapshot, gas, Err(e));
        }

        let mut contract = Contract::new(caller, address, value, gas);
        contract.set_call_code(address, keccak256(&init_code), Arc::new(init_code));
        let result = self
            .run(&mut contract, &[], false)
            .and_then(|code| self.deposit_code(&mut contract, address, code));
        self.finish_frame(snapshot, contract.gas, result)
    }

    fn deposit_code(
        &mut self,
        contract: &mut Contract,
        address: Address,
        code: Vec<u8>,
    ) -> EvmResult<Vec<u8>> {
        if self.rules.is_eip158() && code.len() > cost::MAX_CODE_SIZE {
            return Err(EvmError::MaxCodeSizeExceeded);
        }
        if self.rules.has_eip(3541) && code.first() == Some(&0xef) {
            return Err(EvmError::InvalidCode);
        }
        let deposit = code.len() as u64 * cost::CREATE_DATA;
        if contract.use_gas(deposit) {
            self.state.set_code(address, code.clone());
        } else if self.rules.is_homestead() {
            return Err(EvmError::CodeStoreOutOfGas);
        }
        Ok(code)
    }

    fn transfer(&mut self, from: Address, to: Address, value: U256) -> EvmResult<()> {
        self.state
            .sub_balance(from, value)
            .map_err(|_| EvmError::InsufficientBalance)?;
        self.state.add_balance(to, value);
        Ok(())
    }

    fn finish_frame(
        &mut self,
        snapshot: usize,
        gas_left: u64,
        result: EvmResult<Vec<u8>>,
    ) -> FrameResult {
        match result {
            Ok(output) => FrameResult {
                output,
                gas_left,
                error: None,
            },
            Err(error) => {
                if let Err(e) = self.state.revert_to_snapshot(snapshot) {
                    tracing::error!(error = %e, "Failed to revert frame");
                }
                if error == EvmError::ExecutionReverted {
                    FrameResult {
                        output: std::mem::take(&mut self.revert_output),
                        gas_left,
                        error: Some(error),
                    }
                } else {
                    FrameResult::failed(error, 0)
                }
            }
        }
    }

    fn capture_end(&mut self, result: &FrameResult, gas: u64) {
        if let Some(tracer) = self.config.tracer.as_mut() {
            tracer.capture_end(
                &result.output,
                gas.saturating_sub(result.gas_left),
                result.error.as_ref(),
            );
        }
    }

    // ==================== Interpreter loop ====================

    /// Run `contract`'s code with `input` until it halts.
    ///
    /// Gas is deducted from `contract.gas`. On REVERT the error is
    /// `ExecutionReverted` and the revert data is kept for the enclosing frame.
    pub fn run(&mut self, contract: &mut Contract, input: &[u8], read_only: bool) -> EvmResult<Vec<u8>> {
        if contract.code().is_empty() {
            return Ok(Vec::new());
        }
        self.depth += 1;
        let result = self.execute(contract, input, read_only);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, contract: &mut Contract, input: &[u8], read_only: bool) -> EvmResult<Vec<u8>> {
        let code = contract.code_arc();
        let mut frame = Frame::default();
        loop {
            let op = Opcode(code.get(frame.pc).copied().unwrap_or(Opcode::STOP.0));
            let gas_before = contract.gas;
            match self.step(op, &code, contract, input, read_only, &mut frame) {
                Ok(Some(output)) => return Ok(output),
                Ok(None) => {}
                Err(error) => {
                    if error != EvmError::ExecutionReverted {
                        if let Some(tracer) = self.config.tracer.as_mut() {
                            tracer.capture_fault(&StepLog {
                                pc: frame.pc as u64,
                                op,
                                gas: gas_before,
                                cost: frame.cost,
                                stack: frame.stack.data(),
                                memory_size: frame.memory.len(),
                                depth: self.depth,
                                refund: self.state.refund(),
                                error: Some(&error),
                            });
                        }
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Charge and execute one opcode; `Some(output)` halts the frame
    fn step(
        &mut self,
        op: Opcode,
        code: &[u8],
        contract: &mut Contract,
        input: &[u8],
        read_only: bool,
        frame: &mut Frame,
    ) -> EvmResult<Option<Vec<u8>>> {
        let gas_before = contract.gas;
        frame.cost = 0;

        let constant = gas::constant_gas(op, &self.rules).ok_or(EvmError::InvalidOpcode(op.0))?;
        let (pops, pushes) = op.stack_io();
        frame.stack.require(pops, pushes)?;
        if read_only && (op == Opcode::SSTORE || op.log_topics().is_some()) {
            return Err(EvmError::WriteProtection);
        }
        if !contract.use_gas(constant) {
            return Err(EvmError::OutOfGas);
        }
        frame.cost = constant;

        let memory_size = memory_size(op, &frame.stack)?;
        let dynamic = self.dynamic_gas(op, contract, frame, memory_size)?;
        frame.cost = frame.cost.saturating_add(dynamic);
        if !contract.use_gas(dynamic) {
            return Err(EvmError::OutOfGas);
        }

        if let Some(tracer) = self.config.tracer.as_mut() {
            tracer.capture_state(&StepLog {
                pc: frame.pc as u64,
                op,
                gas: gas_before,
                cost: frame.cost,
                stack: frame.stack.data(),
                memory_size: frame.memory.len(),
                depth: self.depth,
                refund: self.state.refund(),
                error: None,
            });
        }

        if let Some(size) = memory_size {
            frame.memory.resize(size as usize);
        }
        self.execute_op(op, code, contract, input, frame)
    }

    fn dynamic_gas(
        &mut self,
        op: Opcode,
        contract: &Contract,
        frame: &Frame,
        memory_size: Option<u64>,
    ) -> EvmResult<u64> {
        let memory = match memory_size {
            Some(size) => gas::memory_gas(frame.memory.len(), size)?,
            None => 0,
        };
        let stack = &frame.stack;
        let extra = match op {
            Opcode::KECCAK256 => gas::copy_gas(as_u64(stack.peek(1)?)?, cost::KECCAK256_WORD)?,
            Opcode::CALLDATACOPY | Opcode::CODECOPY => {
                gas::copy_gas(as_u64(stack.peek(2)?)?, cost::COPY)?
            }
            Opcode::EXP => {
                let bytes = (stack.peek(1)?.bits() as u64).div_ceil(8);
                let per_byte = if self.rules.is_eip158() {
                    cost::EXP_BYTE
                } else {
                    cost::EXP_BYTE_FRONTIER
                };
                bytes * per_byte
            }
            Opcode::BALANCE | Opcode::EXTCODESIZE | Opcode::EXTCODEHASH if self.rules.is_berlin() => {
                let address = u256_to_address(stack.peek(0)?);
                if self.warm_accounts.insert(address) {
                    cost::COLD_ACCOUNT_ACCESS - cost::WARM_STORAGE_READ
                } else {
                    0
                }
            }
            Opcode::SLOAD if self.rules.is_berlin() => {
                let slot = u256_to_h256(stack.peek(0)?);
                if self.warm_slots.insert((contract.address, slot)) {
                    cost::COLD_SLOAD
                } else {
                    cost::WARM_STORAGE_READ
                }
            }
            Opcode::SSTORE => self.sstore_gas(contract, stack)?,
            op => match op.log_topics() {
                Some(_) => as_u64(stack.peek(1)?)?
                    .checked_mul(cost::LOG_DATA)
                    .ok_or(EvmError::GasUintOverflow)?,
                None => 0,
            },
        };
        memory.checked_add(extra).ok_or(EvmError::GasUintOverflow)
    }

    fn sstore_gas(&mut self, contract: &Contract, stack: &Stack) -> EvmResult<u64> {
        let address = contract.address;
        let slot = u256_to_h256(stack.peek(0)?);
        let new = stack.peek(1)?;
        let current = self.state.storage(&address, &slot);
        let original = *self.original_storage.entry((address, slot)).or_insert(current);

        if !self.rules.is_istanbul() {
            return Ok(if current.is_zero() && !new.is_zero() {
                cost::SSTORE_SET
            } else {
                if !current.is_zero() && new.is_zero() {
                    self.state.add_refund(cost::SSTORE_CLEAR_REFUND);
                }
                cost::SSTORE_RESET
            });
        }

        if contract.gas <= cost::SSTORE_SENTRY {
            return Err(EvmError::OutOfGas);
        }
        let (cold, sload, reset) = if self.rules.is_berlin() {
            let cold = if self.warm_slots.insert((address, slot)) {
                cost::COLD_SLOAD
            } else {
                0
            };
            (cold, cost::WARM_STORAGE_READ, cost::SSTORE_RESET - cost::COLD_SLOAD)
        } else {
            (0, cost::SLOAD_EIP1884, cost::SSTORE_RESET)
        };
        let clear_refund = gas::sstore_clear_refund(&self.rules);

        let charge = if current == new {
            sload
        } else if original == current {
            if original.is_zero() {
                cost::SSTORE_SET
            } else {
                if new.is_zero() {
                    self.state.add_refund(clear_refund);
                }
                reset
            }
        } else {
            if !original.is_zero() {
                if current.is_zero() {
                    self.state.sub_refund(clear_refund);
                } else if new.is_zero() {
                    self.state.add_refund(clear_refund);
                }
            }
            if original == new {
                if original.is_zero() {
                    self.state.add_refund(cost::SSTORE_SET - sload);
                } else {
                    self.state.add_refund(reset - sload);
                }
            }
            sload
        };
        Ok(cold + charge)
    }

    fn execute_op(
        &mut self,
        op: Opcode,
        code: &[u8],
        contract: &mut Contract,
        input: &[u8],
        frame: &mut Frame,
    ) -> EvmResult<Option<Vec<u8>>> {
        let stack = &mut frame.stack;
        let memory = &mut frame.memory;

        match op {
            Opcode::STOP => return Ok(Some(Vec::new())),

            // Arithmetic
            Opcode::ADD => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_add(b).0)?;
            }
            Opcode::MUL => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_mul(b).0)?;
            }
            Opcode::SUB => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_sub(b).0)?;
            }
            Opcode::DIV => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(if b.is_zero() { U256::zero() } else { a / b })?;
            }
            Opcode::SDIV => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(signed_div(a, b))?;
            }
            Opcode::MOD => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(if b.is_zero() { U256::zero() } else { a % b })?;
            }
            Opcode::SMOD => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(signed_mod(a, b))?;
            }
            Opcode::ADDMOD => {
                let (a, b, n) = (stack.pop()?, stack.pop()?, stack.pop()?);
                let sum = U512::from(a) + U512::from(b);
                stack.push(mod_u512(sum, n))?;
            }
            Opcode::MULMOD => {
                let (a, b, n) = (stack.pop()?, stack.pop()?, stack.pop()?);
                stack.push(mod_u512(a.full_mul(b), n))?;
            }
            Opcode::EXP => {
                let (base, exponent) = (stack.pop()?, stack.pop()?);
                stack.push(base.overflowing_pow(exponent).0)?;
            }
            Opcode::SIGNEXTEND => {
                let (byte, value) = (stack.pop()?, stack.pop()?);
                stack.push(sign_extend(byte, value))?;
            }

            // Comparison & bitwise
            Opcode::LT => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_word(a < b))?;
            }
            Opcode::GT => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_word(a > b))?;
            }
            Opcode::SLT => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_word(signed_lt(a, b)))?;
            }
            Opcode::SGT => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_word(signed_lt(b, a)))?;
            }
            Opcode::EQ => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(bool_word(a == b))?;
            }
            Opcode::ISZERO => {
                let a = stack.pop()?;
                stack.push(bool_word(a.is_zero()))?;
            }
            Opcode::AND => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a & b)?;
            }
            Opcode::OR => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a | b)?;
            }
            Opcode::XOR => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a ^ b)?;
            }
            Opcode::NOT => {
                let a = stack.pop()?;
                stack.push(!a)?;
            }
            Opcode::BYTE => {
                let (index, value) = (stack.pop()?, stack.pop()?);
                let byte = if index < U256::from(32) {
                    value.byte(31 - index.low_u64() as usize)
                } else {
                    0
                };
                stack.push(U256::from(byte))?;
            }
            Opcode::SHL => {
                let (shift, value) = (stack.pop()?, stack.pop()?);
                stack.push(if shift < U256::from(256) {
                    value << shift.low_u64() as usize
                } else {
                    U256::zero()
                })?;
            }
            Opcode::SHR => {
                let (shift, value) = (stack.pop()?, stack.pop()?);
                stack.push(if shift < U256::from(256) {
                    value >> shift.low_u64() as usize
                } else {
                    U256::zero()
                })?;
            }
            Opcode::SAR => {
                let (shift, value) = (stack.pop()?, stack.pop()?);
                stack.push(arithmetic_shr(shift, value))?;
            }

            Opcode::KECCAK256 => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                let data = memory.slice(as_usize(offset), as_usize(size));
                stack.push(h256_to_u256(keccak256(&data)))?;
            }

            // Environment
            Opcode::ADDRESS => stack.push(address_to_u256(contract.address))?,
            Opcode::BALANCE => {
                let address = u256_to_address(stack.pop()?);
                stack.push(self.state.balance(&address))?;
            }
            Opcode::ORIGIN => stack.push(address_to_u256(self.tx.origin))?,
            Opcode::CALLER => stack.push(address_to_u256(contract.caller))?,
            Opcode::CALLVALUE => stack.push(contract.value)?,
            Opcode::CALLDATALOAD => {
                let offset = stack.pop()?;
                let mut word = Memory::new();
                word.resize(32);
                word.set_padded(0, 32, input, offset);
                stack.push(word.load(0))?;
            }
            Opcode::CALLDATASIZE => stack.push(U256::from(input.len()))?,
            Opcode::CALLDATACOPY => {
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                memory.set_padded(as_usize(dest), as_usize(size), input, src);
            }
            Opcode::CODESIZE => stack.push(U256::from(code.len()))?,
            Opcode::CODECOPY => {
                let (dest, src, size) = (stack.pop()?, stack.pop()?, stack.pop()?);
                memory.set_padded(as_usize(dest), as_usize(size), code, src);
            }
            Opcode::GASPRICE => stack.push(self.tx.gas_price)?,
            Opcode::EXTCODESIZE => {
                let address = u256_to_address(stack.pop()?);
                stack.push(U256::from(self.state.code(&address).len()))?;
            }
            // No nested calls, so the return data buffer stays empty
            Opcode::RETURNDATASIZE => stack.push(U256::zero())?,
            Opcode::EXTCODEHASH => {
                let address = u256_to_address(stack.pop()?);
                let hash = if self.state.empty(&address) {
                    H256::zero()
                } else {
                    self.state.code_hash(&address)
                };
                stack.push(h256_to_u256(hash))?;
            }

            // Block
            Opcode::BLOCKHASH => {
                let number = stack.pop()?;
                let current = self.block.number;
                let hash = if number < U256::from(current)
                    && U256::from(current) - number <= U256::from(256)
                {
                    (self.block.get_hash)(number.low_u64())
                } else {
                    H256::zero()
                };
                stack.push(h256_to_u256(hash))?;
            }
            Opcode::COINBASE => stack.push(address_to_u256(self.block.coinbase))?,
            Opcode::TIMESTAMP => stack.push(U256::from(self.block.timestamp))?,
            Opcode::NUMBER => stack.push(U256::from(self.block.number))?,
            Opcode::DIFFICULTY => {
                let value = match self.block.random {
                    Some(random) if self.rules.is_merge() => h256_to_u256(random),
                    _ => self.block.difficulty,
                };
                stack.push(value)?;
            }
            Opcode::GASLIMIT => stack.push(U256::from(self.block.gas_limit))?,
            Opcode::CHAINID => stack.push(U256::from(self.chain.chain_id))?,
            Opcode::SELFBALANCE => stack.push(self.state.balance(&contract.address))?,
            Opcode::BASEFEE => stack.push(self.block.base_fee.unwrap_or_default())?,

            // Stack, memory, storage, flow
            Opcode::POP => {
                stack.pop()?;
            }
            Opcode::MLOAD => {
                let offset = stack.pop()?;
                stack.push(memory.load(as_usize(offset)))?;
            }
            Opcode::MSTORE => {
                let (offset, value) = (stack.pop()?, stack.pop()?);
                memory.store(as_usize(offset), value);
            }
            Opcode::MSTORE8 => {
                let (offset, value) = (stack.pop()?, stack.pop()?);
                memory.store8(as_usize(offset), value.byte(0));
            }
            Opcode::SLOAD => {
                let slot = u256_to_h256(stack.pop()?);
                stack.push(self.state.storage(&contract.address, &slot))?;
            }
            Opcode::SSTORE => {
                let (slot, value) = (stack.pop()?, stack.pop()?);
                self.state.set_storage(contract.address, u256_to_h256(slot), value);
            }
            Opcode::JUMP => {
                let dest = stack.pop()?;
                if !contract.valid_jump_dest(dest) {
                    return Err(EvmError::InvalidJump);
                }
                frame.pc = dest.low_u64() as usize;
                return Ok(None);
            }
            Opcode::JUMPI => {
                let (dest, condition) = (stack.pop()?, stack.pop()?);
                if !condition.is_zero() {
                    if !contract.valid_jump_dest(dest) {
                        return Err(EvmError::InvalidJump);
                    }
                    frame.pc = dest.low_u64() as usize;
                    return Ok(None);
                }
            }
            Opcode::PC => stack.push(U256::from(frame.pc))?,
            Opcode::MSIZE => stack.push(U256::from(memory.len()))?,
            Opcode::GAS => stack.push(U256::from(contract.gas))?,
            Opcode::JUMPDEST => {}
            Opcode::PUSH0 => stack.push(U256::zero())?,

            Opcode::RETURN => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                return Ok(Some(memory.slice(as_usize(offset), as_usize(size))));
            }
            Opcode::REVERT => {
                let (offset, size) = (stack.pop()?, stack.pop()?);
                self.revert_output = memory.slice(as_usize(offset), as_usize(size));
                return Err(EvmError::ExecutionReverted);
            }
            Opcode::INVALID => return Err(EvmError::InvalidOpcode(op.0)),

            op if op.push_size() > 0 => {
                let size = op.push_size();
                let start = (frame.pc + 1).min(code.len());
                let end = (frame.pc + 1 + size).min(code.len());
                // Truncated immediates are right-padded with zeros
                let mut word = [0u8; 32];
                word[32 - size..32 - size + (end - start)].copy_from_slice(&code[start..end]);
                stack.push(U256::from_big_endian(&word))?;
                frame.pc += size + 1;
                return Ok(None);
            }
            op if op.dup_depth() > 0 => stack.dup(op.dup_depth())?,
            op if op.swap_depth() > 0 => stack.swap(op.swap_depth())?,
            op => match op.log_topics() {
                Some(count) => {
                    let (offset, size) = (stack.pop()?, stack.pop()?);
                    let mut topics = Vec::with_capacity(count);
                    for _ in 0..count {
                        topics.push(u256_to_h256(stack.pop()?));
                    }
                    let data = memory.slice(as_usize(offset), as_usize(size));
                    self.state.add_log(Log {
                        address: contract.address,
                        topics,
                        data,
                    });
                }
                None => return Err(EvmError::InvalidOpcode(op.0)),
            },
        }

        frame.pc += 1;
        Ok(None)
    }
}

/// Bytes of memory `op` touches, computed from the stack before it runs
fn memory_size(op: Opcode, stack: &Stack) -> EvmResult<Option<u64>> {
    let (offset, size) = match op {
        Opcode::MLOAD | Opcode::MSTORE => (stack.peek(0)?, U256::from(32)),
        Opcode::MSTORE8 => (stack.peek(0)?, U256::one()),
        Opcode::KECCAK256 | Opcode::RETURN | Opcode::REVERT => (stack.peek(0)?, stack.peek(1)?),
        Opcode::CALLDATACOPY | Opcode::CODECOPY => (stack.peek(0)?, stack.peek(2)?),
        op if op.log_topics().is_some() => (stack.peek(0)?, stack.peek(1)?),
        _ => return Ok(None),
    };
    if size.is_zero() {
        return Ok(None);
    }
    as_u64(offset)?
        .checked_add(as_u64(size)?)
        .map(Some)
        .ok_or(EvmError::GasUintOverflow)
}

fn as_u64(value: U256) -> EvmResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(EvmError::GasUintOverflow);
    }
    Ok(value.low_u64())
}

/// Offsets and sizes already bounded by memory expansion; zero sizes may carry any offset
fn as_usize(value: U256) -> usize {
    if value > U256::from(u64::MAX) {
        0
    } else {
        value.low_u64() as usize
    }
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

fn mod_u512(value: U512, modulus: U256) -> U256 {
    if modulus.is_zero() {
        return U256::zero();
    }
    U256::try_from(value % U512::from(modulus)).unwrap_or_default()
}

fn is_negative(value: U256) -> bool {
    value.bit(255)
}

fn negate(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn abs(value: U256) -> U256 {
    if is_negative(value) {
        negate(value)
    } else {
        value
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let quotient = abs(a) / abs(b);
    if is_negative(a) != is_negative(b) {
        negate(quotient)
    } else {
        quotient
    }
}

fn signed_mod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let remainder = abs(a) % abs(b);
    if is_negative(a) {
        negate(remainder)
    } else {
        remainder
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn sign_extend(byte: U256, value: U256) -> U256 {
    if byte >= U256::from(31) {
        return value;
    }
    let bit = byte.low_u64() as usize * 8 + 7;
    let mask = (U256::one() << (bit + 1)) - U256::one();
    if value.bit(bit) {
        value | !mask
    } else {
        value & mask
    }
}

fn arithmetic_shr(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256) {
        return if negative { U256::MAX } else { U256::zero() };
    }
    let shift = shift.low_u64() as usize;
    if negative {
        !((!value) >> shift)
    } else {
        value >> shift
    }
}

/// Big-endian word as a hash
pub fn u256_to_h256(value: U256) -> H256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    H256(bytes)
}

/// Hash as a big-endian word
pub fn h256_to_u256(hash: H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

fn u256_to_address(value: U256) -> Address {
    Address::from_slice(&u256_to_h256(value).as_bytes()[12..])
}

fn address_to_u256(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

/// Address of a contract created by `sender` at `nonce`
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(sender);
    stream.append(&nonce);
    let hash = keccak256(&stream.out());
    Address::from_slice(&hash.as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Header;
    use crate::tracer::{JsonLogger, SharedBuffer};
    use bach_state::Account;

    fn zero_hash(_: u64) -> H256 {
        H256::zero()
    }

    fn block() -> BlockContext {
        let header = Header {
            number: 1,
            gas_limit: 10_000_000,
            base_fee: Some(U256::from(10)),
            ..Header::default()
        };
        BlockContext::new(&header, zero_hash, None)
    }

    fn tx() -> TxContext {
        TxContext {
            origin: Address::repeat_byte(0xaa),
            gas_price: U256::from(10),
        }
    }

    /// Run `code` as a contract under `fork` and return (result, gas left, state)
    fn run_code(fork: Fork, code: Vec<u8>, gas: u64) -> (EvmResult<Vec<u8>>, u64, StateDb) {
        let target = Address::repeat_byte(0xcc);
        let mut state = StateDb::from_accounts([(target, Account::new(0, U256::zero(), code))]);
        let mut config = VmConfig::default();
        let chain = ChainConfig::new(fork);
        let mut evm = Evm::new(block(), tx(), &mut state, &chain, &mut config);

        let mut contract = Contract::new(Address::repeat_byte(0xaa), target, U256::zero(), gas);
        let code = evm.state().code(&target);
        contract.set_call_code(target, evm.state().code_hash(&target), code);
        let result = evm.run(&mut contract, &[], false);
        drop(evm);
        (result, contract.gas, state)
    }

    // ==================== Arithmetic ====================

    #[test]
    fn test_push_add_return() {
        // PUSH1 2, PUSH1 3, ADD, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
        let code = vec![0x60, 2, 0x60, 3, 0x01, 0x60, 0, 0x52, 0x60, 32, 0x60, 0, 0xf3];
        let (result, _, _) = run_code(Fork::London, code, 100_000);
        let output = result.unwrap();
        assert_eq!(U256::from_big_endian(&output), U256::from(5));
    }

    #[test]
    fn test_signed_helpers() {
        let minus_one = U256::MAX;
        let minus_two = negate(U256::from(2));
        assert_eq!(signed_div(U256::from(4), minus_two), minus_two);
        assert_eq!(signed_mod(negate(U256::from(5)), U256::from(3)), minus_two);
        assert!(signed_lt(minus_one, U256::zero()));
        assert_eq!(sign_extend(U256::zero(), U256::from(0xff)), minus_one);
        assert_eq!(sign_extend(U256::zero(), U256::from(0x7f)), U256::from(0x7f));
        assert_eq!(arithmetic_shr(U256::from(4), minus_one), minus_one);
        assert_eq!(arithmetic_shr(U256::from(300), minus_two), minus_one);
    }

    #[test]
    fn test_mulmod_wide() {
        assert_eq!(mod_u512(U256::MAX.full_mul(U256::from(2)), U256::from(7)), {
            let wide = U512::from(U256::MAX) * U512::from(2u64) % U512::from(7u64);
            U256::try_from(wide).unwrap()
        });
        assert_eq!(mod_u512(U512::from(10u64), U256::zero()), U256::zero());
    }

    // ==================== Gas and errors ====================

    #[test]
    fn test_out_of_gas() {
        // PUSH1 1, PUSH1 1, ADD
        let (result, gas, _) = run_code(Fork::London, vec![0x60, 1, 0x60, 1, 0x01], 8);
        assert_eq!(result, Err(EvmError::OutOfGas));
        assert_eq!(gas, 2);
    }

    #[test]
    fn test_push0_requires_shanghai() {
        let (result, _, _) = run_code(Fork::London, vec![0x5f], 100);
        assert_eq!(result, Err(EvmError::InvalidOpcode(0x5f)));
        let (result, _, _) = run_code(Fork::Shanghai, vec![0x5f], 100);
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_jump() {
        // PUSH1 3, JUMP, STOP
        let (result, _, _) = run_code(Fork::London, vec![0x60, 3, 0x56, 0x00], 100);
        assert_eq!(result, Err(EvmError::InvalidJump));
    }

    #[test]
    fn test_jumpi_taken() {
        // PUSH1 1, PUSH1 6, JUMPI, INVALID, JUMPDEST, STOP  (dest = 6)
        let code = vec![0x60, 1, 0x60, 6, 0x57, 0xfe, 0x5b, 0x00];
        let (result, _, _) = run_code(Fork::London, code, 100);
        assert_eq!(result, Ok(vec![]));
    }

    #[test]
    fn test_stack_underflow() {
        let (result, _, _) = run_code(Fork::London, vec![0x01], 100);
        assert_eq!(result, Err(EvmError::StackUnderflow { have: 0, want: 2 }));
    }

    #[test]
    fn test_sstore_legacy_and_net_metering() {
        // PUSH1 1, PUSH1 0, SSTORE
        let code = vec![0x60, 1, 0x60, 0, 0x55];
        let (result, gas, state) = run_code(Fork::Byzantium, code.clone(), 30_000);
        assert!(result.is_ok());
        assert_eq!(30_000 - gas, 3 + 3 + 20_000);
        assert_eq!(state.storage(&Address::repeat_byte(0xcc), &H256::zero()), U256::one());

        let (_, gas, _) = run_code(Fork::Berlin, code, 30_000);
        assert_eq!(30_000 - gas, 3 + 3 + 2_100 + 20_000);
    }

    #[test]
    fn test_revert_keeps_output() {
        // PUSH1 0xaa, PUSH1 0, MSTORE8, PUSH1 1, PUSH1 0, REVERT
        let code = vec![0x60, 0xaa, 0x60, 0, 0x53, 0x60, 1, 0x60, 0, 0xfd];
        let target = Address::repeat_byte(0xcc);
        let caller = Address::repeat_byte(0xaa);
        let mut state = StateDb::from_accounts([
            (target, Account::new(0, U256::zero(), code)),
            (caller, Account::new(0, U256::from(100), vec![])),
        ]);
        let mut config = VmConfig::default();
        let chain = ChainConfig::new(Fork::London);
        let mut evm = Evm::new(block(), tx(), &mut state, &chain, &mut config);

        let result = evm.call(caller, target, &[], 50_000, U256::from(7));
        assert_eq!(result.error, Some(EvmError::ExecutionReverted));
        assert_eq!(result.output, vec![0xaa]);
        assert!(result.gas_left > 0);
        // Value transfer undone
        assert_eq!(evm.state().balance(&caller), U256::from(100));
    }

    #[test]
    fn test_log_recorded() {
        // PUSH1 0x42 (topic), PUSH1 0, PUSH1 0, LOG1
        let code = vec![0x60, 0x42, 0x60, 0, 0x60, 0, 0xa1];
        let (result, _, state) = run_code(Fork::London, code, 10_000);
        assert!(result.is_ok());
        assert_eq!(state.logs().len(), 1);
        assert_eq!(state.logs()[0].topics, vec![u256_to_h256(U256::from(0x42))]);
    }

    #[test]
    fn test_create_deploys_code() {
        // Init code returning one byte 0x00: PUSH1 1, PUSH1 0, RETURN
        let init = vec![0x60, 1, 0x60, 0, 0xf3];
        let caller = Address::repeat_byte(0xaa);
        let mut state = StateDb::from_accounts([(caller, Account::new(0, U256::from(1), vec![]))]);
        let mut config = VmConfig::default();
        let chain = ChainConfig::new(Fork::London);
        let mut evm = Evm::new(block(), tx(), &mut state, &chain, &mut config);

        let (result, address) = evm.create(caller, init, 100_000, U256::zero());
        assert_eq!(result.error, None);
        assert_eq!(address, create_address(&caller, 0));
        assert_eq!(evm.state().code(&address).as_slice(), &[0u8]);
        assert_eq!(evm.state().nonce(&address), 1);
        assert_eq!(evm.state().nonce(&caller), 1);
    }

    #[test]
    fn test_create_address_known_value() {
        let sender = Address::from_slice(&hex::decode("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0").unwrap());
        assert_eq!(
            hex::encode(create_address(&sender, 0).as_bytes()),
            "cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
    }

    // ==================== Tracing ====================

    #[test]
    fn test_tracer_sees_every_step() {
        let code = vec![0x60, 1, 0x60, 2, 0x01, 0x00];
        let target = Address::repeat_byte(0xcc);
        let mut state = StateDb::from_accounts([(target, Account::new(0, U256::zero(), code))]);
        let buffer = SharedBuffer::new();
        let mut config = VmConfig::with_tracer(JsonLogger::new(buffer.clone()));
        let chain = ChainConfig::new(Fork::London);
        let mut evm = Evm::new(block(), tx(), &mut state, &chain, &mut config);

        let result = evm.call(Address::zero(), target, &[], 1_000, U256::zero());
        assert_eq!(result.error, None);

        let text = String::from_utf8(buffer.contents()).unwrap();
        let ops: Vec<String> = text
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|v| v.get("opName").and_then(|n| n.as_str()).map(str::to_string))
            .collect();
        assert_eq!(ops, vec!["PUSH1", "PUSH1", "ADD", "STOP"]);
        assert!(text.lines().last().unwrap().contains("gasUsed"));
    }
}
