//! EVM opcode definitions

use std::fmt;

/// A single instruction byte (see Yellow Paper Appendix H)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

#[allow(missing_docs)]
impl Opcode {
    // Stop and Arithmetic
    pub const STOP: Self = Self(0x00);
    pub const ADD: Self = Self(0x01);
    pub const MUL: Self = Self(0x02);
    pub const SUB: Self = Self(0x03);
    pub const DIV: Self = Self(0x04);
    pub const SDIV: Self = Self(0x05);
    pub const MOD: Self = Self(0x06);
    pub const SMOD: Self = Self(0x07);
    pub const ADDMOD: Self = Self(0x08);
    pub const MULMOD: Self = Self(0x09);
    pub const EXP: Self = Self(0x0a);
    pub const SIGNEXTEND: Self = Self(0x0b);

    // Comparison & Bitwise Logic
    pub const LT: Self = Self(0x10);
    pub const GT: Self = Self(0x11);
    pub const SLT: Self = Self(0x12);
    pub const SGT: Self = Self(0x13);
    pub const EQ: Self = Self(0x14);
    pub const ISZERO: Self = Self(0x15);
    pub const AND: Self = Self(0x16);
    pub const OR: Self = Self(0x17);
    pub const XOR: Self = Self(0x18);
    pub const NOT: Self = Self(0x19);
    pub const BYTE: Self = Self(0x1a);
    pub const SHL: Self = Self(0x1b);
    pub const SHR: Self = Self(0x1c);
    pub const SAR: Self = Self(0x1d);

    pub const KECCAK256: Self = Self(0x20);

    // Environmental Information
    pub const ADDRESS: Self = Self(0x30);
    pub const BALANCE: Self = Self(0x31);
    pub const ORIGIN: Self = Self(0x32);
    pub const CALLER: Self = Self(0x33);
    pub const CALLVALUE: Self = Self(0x34);
    pub const CALLDATALOAD: Self = Self(0x35);
    pub const CALLDATASIZE: Self = Self(0x36);
    pub const CALLDATACOPY: Self = Self(0x37);
    pub const CODESIZE: Self = Self(0x38);
    pub const CODECOPY: Self = Self(0x39);
    pub const GASPRICE: Self = Self(0x3a);
    pub const EXTCODESIZE: Self = Self(0x3b);
    pub const RETURNDATASIZE: Self = Self(0x3d);
    pub const EXTCODEHASH: Self = Self(0x3f);

    // Block Information
    pub const BLOCKHASH: Self = Self(0x40);
    pub const COINBASE: Self = Self(0x41);
    pub const TIMESTAMP: Self = Self(0x42);
    pub const NUMBER: Self = Self(0x43);
    pub const DIFFICULTY: Self = Self(0x44);
    pub const GASLIMIT: Self = Self(0x45);
    pub const CHAINID: Self = Self(0x46);
    pub const SELFBALANCE: Self = Self(0x47);
    pub const BASEFEE: Self = Self(0x48);

    // Stack, Memory, Storage and Flow Operations
    pub const POP: Self = Self(0x50);
    pub const MLOAD: Self = Self(0x51);
    pub const MSTORE: Self = Self(0x52);
    pub const MSTORE8: Self = Self(0x53);
    pub const SLOAD: Self = Self(0x54);
    pub const SSTORE: Self = Self(0x55);
    pub const JUMP: Self = Self(0x56);
    pub const JUMPI: Self = Self(0x57);
    pub const PC: Self = Self(0x58);
    pub const MSIZE: Self = Self(0x59);
    pub const GAS: Self = Self(0x5a);
    pub const JUMPDEST: Self = Self(0x5b);
    pub const PUSH0: Self = Self(0x5f);
    pub const PUSH1: Self = Self(0x60);
    pub const PUSH32: Self = Self(0x7f);
    pub const DUP1: Self = Self(0x80);
    pub const DUP16: Self = Self(0x8f);
    pub const SWAP1: Self = Self(0x90);
    pub const SWAP16: Self = Self(0x9f);
    pub const LOG0: Self = Self(0xa0);
    pub const LOG4: Self = Self(0xa4);

    // System Operations
    pub const RETURN: Self = Self(0xf3);
    pub const REVERT: Self = Self(0xfd);
    pub const INVALID: Self = Self(0xfe);
}

impl Opcode {
    /// PUSH operand size (1-32 for PUSH1-PUSH32, 0 otherwise)
    pub fn push_size(self) -> usize {
        if (Self::PUSH1.0..=Self::PUSH32.0).contains(&self.0) {
            (self.0 - 0x5f) as usize
        } else {
            0
        }
    }

    /// DUP depth (1-16 for DUP1-DUP16, 0 otherwise)
    pub fn dup_depth(self) -> usize {
        if (Self::DUP1.0..=Self::DUP16.0).contains(&self.0) {
            (self.0 - 0x7f) as usize
        } else {
            0
        }
    }

    /// SWAP depth (1-16 for SWAP1-SWAP16, 0 otherwise)
    pub fn swap_depth(self) -> usize {
        if (Self::SWAP1.0..=Self::SWAP16.0).contains(&self.0) {
            (self.0 - 0x8f) as usize
        } else {
            0
        }
    }

    /// LOG topic count, `None` if not a LOG opcode
    pub fn log_topics(self) -> Option<usize> {
        (Self::LOG0.0..=Self::LOG4.0)
            .contains(&self.0)
            .then(|| (self.0 - Self::LOG0.0) as usize)
    }

    /// Items popped and pushed, as `(pops, pushes)`
    pub fn stack_io(self) -> (usize, usize) {
        match self {
            Self::ADDMOD | Self::MULMOD => (3, 1),
            Self::ADD
            | Self::MUL
            | Self::SUB
            | Self::DIV
            | Self::SDIV
            | Self::MOD
            | Self::SMOD
            | Self::EXP
            | Self::SIGNEXTEND
            | Self::LT
            | Self::GT
            | Self::SLT
            | Self::SGT
            | Self::EQ
            | Self::AND
            | Self::OR
            | Self::XOR
            | Self::BYTE
            | Self::SHL
            | Self::SHR
            | Self::SAR
            | Self::KECCAK256 => (2, 1),
            Self::ISZERO
            | Self::NOT
            | Self::BALANCE
            | Self::CALLDATALOAD
            | Self::EXTCODESIZE
            | Self::EXTCODEHASH
            | Self::BLOCKHASH
            | Self::MLOAD
            | Self::SLOAD => (1, 1),
            Self::CALLDATACOPY | Self::CODECOPY => (3, 0),
            Self::MSTORE | Self::MSTORE8 | Self::SSTORE | Self::JUMPI => (2, 0),
            Self::RETURN | Self::REVERT => (2, 0),
            Self::POP | Self::JUMP => (1, 0),
            Self::STOP | Self::JUMPDEST | Self::INVALID => (0, 0),
            op if op.dup_depth() > 0 => (op.dup_depth(), op.dup_depth() + 1),
            op if op.swap_depth() > 0 => (op.swap_depth() + 1, op.swap_depth() + 1),
            op => match op.log_topics() {
                Some(topics) => (topics + 2, 0),
                None => (0, 1),
            },
        }
    }

    fn mnemonic(self) -> Option<&'static str> {
        let name = match self {
            Self::STOP => "STOP",
            Self::ADD => "ADD",
            Self::MUL => "MUL",
            Self::SUB => "SUB",
            Self::DIV => "DIV",
            Self::SDIV => "SDIV",
            Self::MOD => "MOD",
            Self::SMOD => "SMOD",
            Self::ADDMOD => "ADDMOD",
            Self::MULMOD => "MULMOD",
            Self::EXP => "EXP",
            Self::SIGNEXTEND => "SIGNEXTEND",
            Self::LT => "LT",
            Self::GT => "GT",
            Self::SLT => "SLT",
            Self::SGT => "SGT",
            Self::EQ => "EQ",
            Self::ISZERO => "ISZERO",
            Self::AND => "AND",
            Self::OR => "OR",
            Self::XOR => "XOR",
            Self::NOT => "NOT",
            Self::BYTE => "BYTE",
            Self::SHL => "SHL",
            Self::SHR => "SHR",
            Self::SAR => "SAR",
            Self::KECCAK256 => "KECCAK256",
            Self::ADDRESS => "ADDRESS",
            Self::BALANCE => "BALANCE",
            Self::ORIGIN => "ORIGIN",
            Self::CALLER => "CALLER",
            Self::CALLVALUE => "CALLVALUE",
            Self::CALLDATALOAD => "CALLDATALOAD",
            Self::CALLDATASIZE => "CALLDATASIZE",
            Self::CALLDATACOPY => "CALLDATACOPY",
            Self::CODESIZE => "CODESIZE",
            Self::CODECOPY => "CODECOPY",
            Self::GASPRICE => "GASPRICE",
            Self::EXTCODESIZE => "EXTCODESIZE",
            Self::RETURNDATASIZE => "RETURNDATASIZE",
            Self::EXTCODEHASH => "EXTCODEHASH",
            Self::BLOCKHASH => "BLOCKHASH",
            Self::COINBASE => "COINBASE",
            Self::TIMESTAMP => "TIMESTAMP",
            Self::NUMBER => "NUMBER",
            Self::DIFFICULTY => "DIFFICULTY",
            Self::GASLIMIT => "GASLIMIT",
            Self::CHAINID => "CHAINID",
            Self::SELFBALANCE => "SELFBALANCE",
            Self::BASEFEE => "BASEFEE",
            Self::POP => "POP",
            Self::MLOAD => "MLOAD",
            Self::MSTORE => "MSTORE",
            Self::MSTORE8 => "MSTORE8",
            Self::SLOAD => "SLOAD",
            Self::SSTORE => "SSTORE",
            Self::JUMP => "JUMP",
            Self::JUMPI => "JUMPI",
            Self::PC => "PC",
            Self::MSIZE => "MSIZE",
            Self::GAS => "GAS",
            Self::JUMPDEST => "JUMPDEST",
            Self::PUSH0 => "PUSH0",
            Self::RETURN => "RETURN",
            Self::REVERT => "REVERT",
            Self::INVALID => "INVALID",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.mnemonic() {
            return f.write_str(name);
        }
        match self.0 {
            0x60..=0x7f => write!(f, "PUSH{}", self.push_size()),
            0x80..=0x8f => write!(f, "DUP{}", self.dup_depth()),
            0x90..=0x9f => write!(f, "SWAP{}", self.swap_depth()),
            0xa0..=0xa4 => write!(f, "LOG{}", self.0 - 0xa0),
            byte => write!(f, "opcode 0x{byte:x} not defined"),
        }
    }
}
