//! Block, transaction and message context

use bach_crypto::{Address, H256, U256};

/// Block hash lookup by number
pub type GetHashFn = fn(u64) -> H256;

/// Header fields the interpreter reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Block beneficiary
    pub coinbase: Address,
    /// Block number
    pub number: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// Block gas limit
    pub gas_limit: u64,
    /// Proof-of-work difficulty
    pub difficulty: U256,
    /// Beacon randomness (post-merge mix digest)
    pub random: Option<H256>,
    /// EIP-1559 base fee
    pub base_fee: Option<U256>,
}

/// Per-block execution context
#[derive(Debug, Clone)]
pub struct BlockContext {
    /// Fee recipient
    pub coinbase: Address,
    /// Block number
    pub number: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// Block gas limit
    pub gas_limit: u64,
    /// Difficulty
    pub difficulty: U256,
    /// Randomness returned by PREVRANDAO after the merge
    pub random: Option<H256>,
    /// Base fee, if London is active
    pub base_fee: Option<U256>,
    /// Ancestor hash lookup used by BLOCKHASH
    pub get_hash: GetHashFn,
}

impl BlockContext {
    /// Build a context from `header`; `coinbase` overrides the header's beneficiary
    pub fn new(header: &Header, get_hash: GetHashFn, coinbase: Option<Address>) -> Self {
        Self {
            coinbase: coinbase.unwrap_or(header.coinbase),
            number: header.number,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            difficulty: header.difficulty,
            random: header.random,
            base_fee: header.base_fee,
            get_hash,
        }
    }
}

/// Per-transaction execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    /// Transaction sender, returned by ORIGIN
    pub origin: Address,
    /// Effective gas price, returned by GASPRICE
    pub gas_price: U256,
}

impl TxContext {
    /// Context for executing `msg`
    pub fn new(msg: &Message) -> Self {
        Self {
            origin: msg.from,
            gas_price: msg.gas_price,
        }
    }
}

/// Access list entry: an address with the storage keys it pre-declares
pub type AccessListItem = (Address, Vec<H256>);

/// Message to apply against state, derived from a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Sender
    pub from: Address,
    /// Recipient; `None` creates a contract
    pub to: Option<Address>,
    /// Sender nonce
    pub nonce: u64,
    /// Transferred value
    pub value: U256,
    /// Gas limit
    pub gas_limit: u64,
    /// Effective gas price
    pub gas_price: U256,
    /// EIP-1559 fee cap
    pub gas_fee_cap: U256,
    /// EIP-1559 tip cap
    pub gas_tip_cap: U256,
    /// Call data or init code
    pub data: Vec<u8>,
    /// EIP-2930 access list
    pub access_list: Vec<AccessListItem>,
}

impl Message {
    /// Whether this message deploys a contract
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}
