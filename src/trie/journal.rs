//! Commit journals
//!
//! A journal is what one commit produced: the nodes to write, the nodes the
//! commit superseded, and the root anchor. Node keys carry their version, so
//! re-applying a journal rewrites identical bytes under identical keys and is
//! safe to retry after a failed batch.

use crate::model::Hash;
use crate::store::{KvStore, WriteBatch};
use crate::trie::NodeKey;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitJournal {
    root_hash: Hash,
    root_key: Option<NodeKey>,
    /// Encoded nodes to persist, in node key order
    dirty: Vec<(NodeKey, Vec<u8>)>,
    /// Nodes no longer reachable from the new root
    prune: BTreeSet<NodeKey>,
}

impl CommitJournal {
    pub(crate) fn new(
        root_hash: Hash,
        root_key: Option<NodeKey>,
        dirty: Vec<(NodeKey, Vec<u8>)>,
        prune: BTreeSet<NodeKey>,
    ) -> Self {
        CommitJournal {
            root_hash,
            root_key,
            dirty,
            prune,
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    /// Key of the committed root, `None` for an empty trie
    pub fn root_key(&self) -> Option<&NodeKey> {
        self.root_key.as_ref()
    }

    pub fn dirty(&self) -> &[(NodeKey, Vec<u8>)] {
        &self.dirty
    }

    pub fn prune(&self) -> &BTreeSet<NodeKey> {
        &self.prune
    }

    /// The full batch for this commit: node puts, the root anchor and,
    /// if `include_prune`, deletes for every superseded node.
    pub fn write_batch(&self, include_prune: bool) -> WriteBatch {
        let mut batch = if include_prune {
            self.prune_batch()
        } else {
            WriteBatch::new()
        };
        for (key, bytes) in &self.dirty {
            batch.put(key.encode(), bytes.clone());
        }
        if let Some(root_key) = &self.root_key {
            batch.put(self.root_hash.as_bytes().to_vec(), root_key.encode());
        }
        batch
    }

    /// Deletes for every superseded node
    pub fn prune_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for key in &self.prune {
            batch.delete(key.encode());
        }
        batch
    }

    /// Physically delete the superseded nodes. The caller decides when no
    /// retained version still needs them.
    pub fn apply_prune(&self, store: &dyn KvStore) -> Result<usize> {
        let count = self.prune.len();
        if count > 0 {
            store.write_batch(self.prune_batch())?;
        }
        debug!(root = %self.root_hash, pruned = count, "applied prune set");
        Ok(count)
    }
}
