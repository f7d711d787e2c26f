//! Incremental snapshot tree
//!
//! A flat base ("disk") layer holds every account and slot keyed by hash.
//! Each commit stacks a diff layer keyed by its state root on top of its
//! parent. `journal` serializes the chain of diff layers ending at a root.

use crate::error::SnapshotError;
use crate::statedb::StateDb;
use bach_crypto::{keccak256, H256};
use rlp::RlpStream;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Version tag written at the head of every journal
pub const JOURNAL_VERSION: u64 = 0;

/// Changes of one commit, keyed by account hash and slot hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// Accounts deleted by the commit
    pub destructs: BTreeSet<H256>,
    /// Slim-encoded accounts written by the commit
    pub accounts: BTreeMap<H256, Vec<u8>>,
    /// Slot writes per account; an empty value is a deletion
    pub storage: BTreeMap<H256, BTreeMap<H256, Vec<u8>>>,
}

#[derive(Debug, Clone)]
struct DiffLayer {
    parent: H256,
    diff: StateDiff,
}

/// Snapshot tree over one base layer
#[derive(Debug, Clone)]
pub struct SnapshotTree {
    disk_root: H256,
    disk_accounts: BTreeMap<H256, Vec<u8>>,
    disk_storage: BTreeMap<H256, BTreeMap<H256, Vec<u8>>>,
    layers: HashMap<H256, DiffLayer>,
}

impl SnapshotTree {
    /// Generate the base layer from the current content of `state`
    pub fn generate(root: H256, state: &StateDb) -> Self {
        let mut disk_accounts = BTreeMap::new();
        let mut disk_storage = BTreeMap::new();
        for (address, account) in state.accounts() {
            let hash = keccak256(address.as_bytes());
            disk_accounts.insert(hash, account.slim_rlp_bytes());
            if !account.storage.is_empty() {
                let slots = account
                    .storage
                    .iter()
                    .map(|(slot, value)| (keccak256(slot.as_bytes()), rlp::encode(value).to_vec()))
                    .collect();
                disk_storage.insert(hash, slots);
            }
        }
        tracing::debug!(?root, accounts = disk_accounts.len(), "Generated snapshot base layer");
        Self {
            disk_root: root,
            disk_accounts,
            disk_storage,
            layers: HashMap::new(),
        }
    }

    /// Root of the base layer
    pub fn disk_root(&self) -> H256 {
        self.disk_root
    }

    /// Whether a layer exists for `root`
    pub fn contains(&self, root: &H256) -> bool {
        *root == self.disk_root || self.layers.contains_key(root)
    }

    /// Number of diff layers above the base
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Stack a diff layer for `root` on top of `parent`
    pub fn update(&mut self, root: H256, parent: H256, diff: StateDiff) -> Result<(), SnapshotError> {
        if root == parent {
            return Err(SnapshotError::Cycle);
        }
        if !self.contains(&parent) {
            return Err(SnapshotError::MissingParent(parent));
        }
        self.layers.insert(root, DiffLayer { parent, diff });
        Ok(())
    }

    /// Slim account blob visible at `root`
    pub fn account(&self, root: H256, account_hash: &H256) -> Result<Option<Vec<u8>>, SnapshotError> {
        for (_, layer) in self.chain(root)? {
            if let Some(blob) = layer.diff.accounts.get(account_hash) {
                return Ok(Some(blob.clone()));
            }
            if layer.diff.destructs.contains(account_hash) {
                return Ok(None);
            }
        }
        Ok(self.disk_accounts.get(account_hash).cloned())
    }

    /// Storage value visible at `root`
    pub fn storage(
        &self,
        root: H256,
        account_hash: &H256,
        slot_hash: &H256,
    ) -> Result<Option<Vec<u8>>, SnapshotError> {
        for (_, layer) in self.chain(root)? {
            if let Some(value) = layer
                .diff
                .storage
                .get(account_hash)
                .and_then(|slots| slots.get(slot_hash))
            {
                return Ok((!value.is_empty()).then(|| value.clone()));
            }
            if layer.diff.destructs.contains(account_hash) {
                return Ok(None);
            }
        }
        Ok(self
            .disk_storage
            .get(account_hash)
            .and_then(|slots| slots.get(slot_hash))
            .cloned())
    }

    /// Serialize the diff layers from the base up to `root`
    pub fn journal(&self, root: H256) -> Result<Vec<u8>, SnapshotError> {
        let chain = self.chain(root)?;

        let mut stream = RlpStream::new_list(3);
        stream.append(&JOURNAL_VERSION);
        stream.append(&self.disk_root);
        stream.begin_list(chain.len());
        for (layer_root, layer) in chain.iter().rev() {
            let diff = &layer.diff;
            stream.begin_list(4);
            stream.append(layer_root);
            let destructs: Vec<H256> = diff.destructs.iter().copied().collect();
            stream.append_list::<H256, H256>(&destructs);
            stream.begin_list(diff.accounts.len());
            for (hash, blob) in &diff.accounts {
                stream.begin_list(2);
                stream.append(hash);
                stream.append(blob);
            }
            stream.begin_list(diff.storage.len());
            for (hash, slots) in &diff.storage {
                stream.begin_list(2);
                stream.append(hash);
                stream.begin_list(slots.len());
                for (slot, value) in slots {
                    stream.begin_list(2);
                    stream.append(slot);
                    stream.append(value);
                }
            }
        }
        tracing::debug!(?root, layers = chain.len(), "Journalled snapshot diff layers");
        Ok(stream.out().to_vec())
    }

    /// Diff layers from `root` down to (excluding) the base, top first
    fn chain(&self, root: H256) -> Result<Vec<(H256, &DiffLayer)>, SnapshotError> {
        let mut chain = Vec::new();
        let mut current = root;
        while current != self.disk_root {
            let layer = self
                .layers
                .get(&current)
                .ok_or(SnapshotError::Missing(current))?;
            chain.push((current, layer));
            current = layer.parent;
        }
        Ok(chain)
    }
}
