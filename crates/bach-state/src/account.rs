//! Account model and its trie encodings

use crate::trie::secure_trie_root;
use bach_crypto::{keccak256, H256, U256, EMPTY_CODE_HASH, EMPTY_ROOT_HASH};
use rlp::RlpStream;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single account: balance, nonce, code and non-zero storage slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Transaction count (or contract creation count)
    pub nonce: u64,
    /// Balance in wei
    pub balance: U256,
    /// Contract bytecode, shared between copies of the account
    pub code: Arc<Vec<u8>>,
    /// keccak256 of `code`
    pub code_hash: H256,
    /// Storage slots; zero values are never stored
    pub storage: BTreeMap<H256, U256>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            code: Arc::new(Vec::new()),
            code_hash: EMPTY_CODE_HASH,
            storage: BTreeMap::new(),
        }
    }
}

impl Account {
    /// Create an account with the given fields, hashing the code
    pub fn new(nonce: u64, balance: U256, code: Vec<u8>) -> Self {
        let code_hash = if code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak256(&code)
        };
        Self {
            nonce,
            balance,
            code: Arc::new(code),
            code_hash,
            storage: BTreeMap::new(),
        }
    }

    /// EIP-161 emptiness: no nonce, no balance, no code
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }

    /// Root of the account's storage trie
    pub fn storage_root(&self) -> H256 {
        secure_trie_root(
            self.storage
                .iter()
                .map(|(slot, value)| (slot.as_bytes().to_vec(), rlp::encode(value).to_vec())),
        )
    }

    /// Consensus encoding: rlp([nonce, balance, storageRoot, codeHash])
    pub fn rlp_bytes(&self) -> Vec<u8> {
        self.encode(self.storage_root(), false)
    }

    /// Snapshot encoding: empty root and empty code hash are elided
    pub fn slim_rlp_bytes(&self) -> Vec<u8> {
        self.encode(self.storage_root(), true)
    }

    fn encode(&self, root: H256, slim: bool) -> Vec<u8> {
        let mut stream = RlpStream::new_list(4);
        stream.append(&self.nonce);
        stream.append(&self.balance);
        if slim && root == EMPTY_ROOT_HASH {
            stream.append_empty_data();
        } else {
            stream.append(&root);
        }
        if slim && self.code_hash == EMPTY_CODE_HASH {
            stream.append_empty_data();
        } else {
            stream.append(&self.code_hash);
        }
        stream.out().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_account_is_empty() {
        let account = Account::default();
        assert!(account.is_empty());
        assert_eq!(account.storage_root(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_code_makes_account_non_empty() {
        let account = Account::new(0, U256::zero(), vec![0x00]);
        assert!(!account.is_empty());
        assert_eq!(account.code_hash, keccak256(&[0x00]));
    }

    #[test]
    fn test_slim_encoding_is_shorter() {
        let account = Account::new(1, U256::from(10), Vec::new());
        assert!(account.slim_rlp_bytes().len() < account.rlp_bytes().len());
    }
}
