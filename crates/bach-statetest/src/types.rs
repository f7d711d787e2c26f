//! Type definitions for the ethereum/tests state test JSON format

use bach_crypto::{Address, H256, U256};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

fn hex_str<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(s.strip_prefix("0x").map(str::to_owned).unwrap_or(s))
}

/// Hex-encoded bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = hex_str(deserializer)?;
        if s.is_empty() {
            return Ok(HexBytes(Vec::new()));
        }
        hex::decode(&s).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded 256-bit quantity, leading zeros allowed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HexU256(pub U256);

impl<'de> Deserialize<'de> for HexU256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = hex_str(deserializer)?;
        if s.is_empty() {
            return Ok(HexU256(U256::zero()));
        }
        U256::from_str_radix(&s, 16)
            .map(HexU256)
            .map_err(|e| serde::de::Error::custom(format!("invalid quantity 0x{s}: {e:?}")))
    }
}

/// Hex-encoded u64
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexU64(pub u64);

impl<'de> Deserialize<'de> for HexU64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = hex_str(deserializer)?;
        if s.is_empty() {
            return Ok(HexU64(0));
        }
        u64::from_str_radix(&s, 16)
            .map(HexU64)
            .map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded address (20 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexAddress(pub Address);

impl<'de> Deserialize<'de> for HexAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = hex_str(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 20 {
            return Err(serde::de::Error::custom(format!(
                "invalid address length: {}",
                bytes.len()
            )));
        }
        Ok(HexAddress(Address::from_slice(&bytes)))
    }
}

/// Hex-encoded 32-byte word; shorter input is left-padded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexH256(pub H256);

impl<'de> Deserialize<'de> for HexH256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = hex_str(deserializer)?;
        let padded = if s.len() % 2 == 1 { format!("0{s}") } else { s };
        let bytes = hex::decode(&padded).map_err(serde::de::Error::custom)?;
        if bytes.len() > 32 {
            return Err(serde::de::Error::custom(format!(
                "invalid hash length: {}",
                bytes.len()
            )));
        }
        let mut result = [0u8; 32];
        result[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(HexH256(H256(result)))
    }
}

// =============================================================================
// State Test Types
// =============================================================================

/// One named state test as found in a corpus file
#[derive(Debug, Clone, Deserialize)]
pub struct StateTestJson {
    /// Block environment
    pub env: StateEnv,
    /// Pre-execution state
    pub pre: BTreeMap<HexAddress, AccountState>,
    /// Transaction template
    pub transaction: StateTransaction,
    /// Expected post-conditions per fork, in index order
    pub post: BTreeMap<String, Vec<PostState>>,
}

/// State test environment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnv {
    /// Current coinbase
    pub current_coinbase: HexAddress,
    /// Current difficulty
    #[serde(default)]
    pub current_difficulty: HexU256,
    /// Current gas limit
    pub current_gas_limit: HexU64,
    /// Current block number
    pub current_number: HexU64,
    /// Current timestamp
    pub current_timestamp: HexU64,
    /// Previous hash
    #[serde(default)]
    pub previous_hash: Option<HexH256>,
    /// Current base fee (London and later)
    #[serde(default)]
    pub current_base_fee: Option<HexU256>,
    /// Current randomness (post-merge)
    #[serde(default)]
    pub current_random: Option<HexH256>,
}

/// State test transaction template.
///
/// `data`, `gasLimit` and `value` are option lists selected by a post
/// entry's `indexes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransaction {
    /// Data options
    pub data: Vec<HexBytes>,
    /// Gas limit options
    pub gas_limit: Vec<HexU64>,
    /// Legacy gas price
    #[serde(default)]
    pub gas_price: Option<HexU256>,
    /// Max fee per gas (EIP-1559)
    #[serde(default)]
    pub max_fee_per_gas: Option<HexU256>,
    /// Max priority fee per gas (EIP-1559)
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<HexU256>,
    /// Nonce
    pub nonce: HexU64,
    /// Sender secret key
    #[serde(default)]
    pub secret_key: Option<HexH256>,
    /// Recipient; empty for contract creation
    #[serde(default)]
    pub to: String,
    /// Value options
    pub value: Vec<HexU256>,
    /// Access list per data option
    #[serde(default)]
    pub access_lists: Option<Vec<Option<Vec<AccessListEntry>>>>,
}

/// Access list entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// Address
    pub address: HexAddress,
    /// Storage keys
    pub storage_keys: Vec<HexH256>,
}

/// Expected post-condition for one index combination
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostState {
    /// Post-state root
    pub hash: HexH256,
    /// Index selectors
    pub indexes: PostIndexes,
    /// Hash of the RLP-encoded logs
    pub logs: HexH256,
    /// Signed transaction bytes
    #[serde(default)]
    pub txbytes: Option<HexBytes>,
    /// Expected exception
    #[serde(default)]
    pub expect_exception: Option<String>,
}

impl PostState {
    /// Whether a non-empty exception is expected
    pub fn expects_exception(&self) -> bool {
        self.expect_exception
            .as_deref()
            .is_some_and(|e| !e.is_empty())
    }
}

/// Index selectors into the transaction's option lists
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PostIndexes {
    /// Data index
    pub data: usize,
    /// Gas index
    pub gas: usize,
    /// Value index
    pub value: usize,
}

// =============================================================================
// Common Types
// =============================================================================

/// Account state
#[derive(Debug, Clone, Deserialize)]
pub struct AccountState {
    /// Balance
    pub balance: HexU256,
    /// Code
    #[serde(default)]
    pub code: HexBytes,
    /// Nonce
    pub nonce: HexU64,
    /// Storage
    #[serde(default)]
    pub storage: BTreeMap<HexH256, HexU256>,
}
