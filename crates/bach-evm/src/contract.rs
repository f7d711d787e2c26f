//! Code being executed in a frame

use crate::opcode::Opcode;
use bach_crypto::{Address, H256, U256};
use std::collections::HashSet;
use std::sync::Arc;

/// A frame's code, call parameters and remaining gas
#[derive(Debug, Clone)]
pub struct Contract {
    /// Caller of the frame
    pub caller: Address,
    /// Account whose storage the frame uses
    pub address: Address,
    /// Value sent with the call
    pub value: U256,
    /// Gas remaining
    pub gas: u64,
    code: Arc<Vec<u8>>,
    code_hash: H256,
    jump_dests: Arc<HashSet<usize>>,
}

impl Contract {
    /// Frame without code
    pub fn new(caller: Address, address: Address, value: U256, gas: u64) -> Self {
        Self {
            caller,
            address,
            value,
            gas,
            code: Arc::default(),
            code_hash: H256::zero(),
            jump_dests: Arc::default(),
        }
    }

    /// Install `code` loaded from `address`
    pub fn set_call_code(&mut self, address: Address, code_hash: H256, code: Arc<Vec<u8>>) {
        self.address = address;
        self.jump_dests = Arc::new(analyze_jump_dests(&code));
        self.code_hash = code_hash;
        self.code = code;
    }

    /// Bytecode
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Shared handle to the bytecode
    pub fn code_arc(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.code)
    }

    /// Hash of the bytecode as recorded in state
    pub fn code_hash(&self) -> H256 {
        self.code_hash
    }

    /// Whether `dest` is a JUMPDEST outside PUSH data
    pub fn valid_jump_dest(&self, dest: U256) -> bool {
        if dest >= U256::from(self.code.len()) {
            return false;
        }
        self.jump_dests.contains(&(dest.low_u64() as usize))
    }

    /// Deduct `amount`; false if not enough gas is left
    pub fn use_gas(&mut self, amount: u64) -> bool {
        if self.gas < amount {
            return false;
        }
        self.gas -= amount;
        true
    }
}

fn analyze_jump_dests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut i = 0;
    while i < code.len() {
        let op = Opcode(code[i]);
        if op == Opcode::JUMPDEST {
            dests.insert(i);
        }
        i += op.push_size() + 1;
    }
    dests
}
