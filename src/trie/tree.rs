//! Versioned merkle trie
//!
//! Every update rewrites the nodes on the path from the root to the touched
//! leaf, tagging them with the update's version. Nodes off that path are
//! referenced by key and never copied, so each committed version stays
//! readable through its own root.

use super::journal::CommitJournal;
use super::node::{Child, InternalNode, LeafNode, Node, MAX_KEY_LEN, MAX_VALUE_LEN};
use super::node_key::{NodeKey, MAX_PREFIX_LEN};
use crate::model::{Hash, Nibbles, Version};
use crate::store::{KvStore, NodeCache};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Counts of work pending for the next commit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub dirty: usize,
    pub prune: usize,
}

/// A single-writer handle onto one tree in a key-value store
pub struct MerkleTrie {
    store: Arc<dyn KvStore>,
    node_cache: Option<Arc<dyn NodeCache>>,
    /// Tree prefix shared by every node key of this trie
    prefix: Vec<u8>,
    root: Option<NodeKey>,
    /// Nodes written since the last commit
    dirty: BTreeMap<NodeKey, Node>,
    /// Committed nodes read while updating
    cache: HashMap<NodeKey, Node>,
    /// Committed nodes superseded since the last commit
    prune: BTreeSet<NodeKey>,
    /// Set once committed; the handle must be reloaded
    stale: bool,
}

/// Writes and supersessions produced by one update, applied only on success
#[derive(Default)]
struct Changes {
    dirty: BTreeMap<NodeKey, Node>,
    retired: Vec<NodeKey>,
}

impl Changes {
    fn record(&mut self, key: NodeKey, node: Node) {
        self.dirty.insert(key, node);
    }

    fn retire(&mut self, key: NodeKey) {
        // A node written and superseded within one update never existed
        if self.dirty.remove(&key).is_none() {
            self.retired.push(key);
        }
    }
}

/// What a delete did to a subtree
enum Removal {
    Removed,
    /// The subtree now has this node as its root
    Replaced(Node),
}

impl MerkleTrie {
    /// Create an empty trie with no tree prefix
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        MerkleTrie {
            store,
            node_cache: None,
            prefix: Vec::new(),
            root: None,
            dirty: BTreeMap::new(),
            cache: HashMap::new(),
            prune: BTreeSet::new(),
            stale: false,
        }
    }

    /// Open the trie whose root hash is `root_hash`
    ///
    /// The placeholder hash opens an empty trie. Any other hash must have a
    /// root anchor in the store, otherwise this fails with `NotFound`.
    pub fn load(store: Arc<dyn KvStore>, root_hash: Hash) -> Result<Self> {
        let mut trie = MerkleTrie::new(store);
        if root_hash.is_placeholder() {
            return Ok(trie);
        }

        let root_key = read_anchor(trie.store.as_ref(), &root_hash)?;
        let root = trie.fetch(&root_key)?;
        if root.hash() != root_hash {
            return Err(Error::Corruption(format!(
                "root anchor {} points at a node hashing to {}",
                root_hash,
                root.hash()
            )));
        }

        debug!(root = %root_hash, key = ?root_key, "loaded trie");
        trie.prefix = root_key.prefix().to_vec();
        trie.root = Some(root_key);
        Ok(trie)
    }

    /// Set the tree prefix of a trie that has no root yet
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(Error::InvalidKey(format!(
                "tree prefix of {} bytes exceeds {}",
                prefix.len(),
                MAX_PREFIX_LEN
            )));
        }
        if self.root.is_some() && prefix != self.prefix {
            return Err(Error::InvalidKey(
                "cannot change the prefix of a non-empty trie".into(),
            ));
        }
        self.prefix = prefix;
        Ok(self)
    }

    /// Consult `cache` before the store when loading nodes
    pub fn with_node_cache(mut self, cache: Arc<dyn NodeCache>) -> Self {
        self.node_cache = Some(cache);
        self
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn root_key(&self) -> Option<&NodeKey> {
        self.root.as_ref()
    }

    /// Hash of the current in-memory root
    pub fn root_hash(&self) -> Result<Hash> {
        self.ensure_live()?;
        match &self.root {
            Some(key) => Ok(self.fetch(key)?.hash()),
            None => Ok(Hash::PLACEHOLDER),
        }
    }

    pub fn pending(&self) -> PendingStats {
        PendingStats {
            dirty: self.dirty.len(),
            prune: self.prune.len(),
        }
    }

    /// Look up the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_live()?;
        if key.is_empty() {
            return Ok(None);
        }
        let nibbles = Nibbles::from_key(key);
        let mut current = match &self.root {
            Some(root) => root.clone(),
            None => return Ok(None),
        };

        let mut depth = 0;
        loop {
            match self.fetch(&current)? {
                Node::Leaf(leaf) => {
                    return Ok((leaf.key() == &nibbles).then(|| leaf.value().to_vec()));
                }
                Node::Internal(internal) => {
                    let child = nibbles
                        .at(depth)
                        .and_then(|nibble| internal.child(nibble).map(|c| (nibble, c.version)));
                    match child {
                        Some((nibble, version)) => current = current.child(version, nibble),
                        None => return Ok(None),
                    }
                    depth += 1;
                }
            }
        }
    }

    /// Set `key` to `value` at `version`. An empty value deletes the key.
    pub fn update(&mut self, version: Version, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if key.is_empty() {
            return Err(Error::InvalidKey("empty key".into()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "key of {} bytes exceeds {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::InvalidValue(format!(
                "value of {} bytes exceeds {}",
                value.len(),
                MAX_VALUE_LEN
            )));
        }
        let nibbles = Nibbles::from_key(key);
        trace!(version, key = %hex::encode(key), delete = value.is_empty(), "update");

        if value.is_empty() {
            self.delete(version, &nibbles)
        } else {
            self.insert(version, &nibbles, value)
        }
    }

    /// Persist dirty nodes and the root anchor, returning the root hash
    pub fn commit(&mut self) -> Result<Hash> {
        self.commit_with_journal().map(|(hash, _)| hash)
    }

    /// Like [`commit`](Self::commit), also returning the dirty and prune sets
    ///
    /// Prune-set deletes are not applied; call
    /// [`CommitJournal::apply_prune`] once no retained version needs them.
    /// On error nothing is cleared and the commit can be retried.
    pub fn commit_with_journal(&mut self) -> Result<(Hash, CommitJournal)> {
        self.ensure_live()?;
        let root_hash = self.root_hash()?;

        let dirty: Vec<(NodeKey, Vec<u8>)> = self
            .dirty
            .iter()
            .map(|(key, node)| (key.clone(), node.encode()))
            .collect();
        let journal = CommitJournal::new(root_hash, self.root.clone(), dirty, self.prune.clone());
        self.store.write_batch(journal.write_batch(false))?;

        if let Some(cache) = &self.node_cache {
            let evicts: Vec<NodeKey> = self.prune.iter().cloned().collect();
            let mut by_version: BTreeMap<Version, Vec<(NodeKey, Node)>> = BTreeMap::new();
            for (key, node) in &self.dirty {
                by_version
                    .entry(key.version())
                    .or_default()
                    .push((key.clone(), node.clone()));
            }
            if by_version.is_empty() {
                cache.update(0, Vec::new(), &evicts);
            }
            for (i, (version, inserts)) in by_version.into_iter().enumerate() {
                let evicts: &[NodeKey] = if i == 0 { &evicts } else { &[] };
                cache.update(version, inserts, evicts);
            }
        }

        debug!(
            root = %root_hash,
            dirty = journal.dirty().len(),
            prune = journal.prune().len(),
            "committed trie"
        );

        self.dirty.clear();
        self.cache.clear();
        self.prune.clear();
        self.root = None;
        self.stale = true;
        Ok((root_hash, journal))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.stale {
            Err(Error::StaleHandle)
        } else {
            Ok(())
        }
    }

    fn key_at(&self, version: Version, path: Nibbles) -> Result<NodeKey> {
        NodeKey::new(version, self.prefix.clone(), path)
    }

    /// Read a node without touching the handle's cache
    pub(crate) fn fetch(&self, key: &NodeKey) -> Result<Node> {
        if let Some(node) = self.dirty.get(key).or_else(|| self.cache.get(key)) {
            return Ok(node.clone());
        }
        if let Some(node) = self
            .node_cache
            .as_ref()
            .and_then(|cache| cache.get(key.version(), key))
        {
            return Ok(node);
        }
        read_node(self.store.as_ref(), key)
    }

    /// Read a node, remembering committed nodes for the rest of the version
    fn load_node(&mut self, key: &NodeKey) -> Result<Node> {
        let node = self.fetch(key)?;
        if !self.dirty.contains_key(key) {
            self.cache.insert(key.clone(), node.clone());
        }
        Ok(node)
    }

    fn apply(&mut self, changes: Changes) {
        for key in changes.retired {
            if self.dirty.remove(&key).is_none() {
                self.cache.remove(&key);
                self.prune.insert(key);
            }
        }
        for (key, node) in changes.dirty {
            self.prune.remove(&key);
            self.dirty.insert(key, node);
        }
    }

    fn insert(&mut self, version: Version, key: &Nibbles, value: &[u8]) -> Result<()> {
        let mut changes = Changes::default();
        let mut path: Vec<(NodeKey, InternalNode, u8)> = Vec::new();
        let mut current = self.root.clone();
        let mut depth = 0;

        // Walk down to the slot the key belongs in
        let mut child = loop {
            let node_key = self.key_at(version, key.prefix(depth))?;
            let existing = match current.take() {
                Some(existing) => existing,
                None => {
                    let leaf = Node::Leaf(LeafNode::new(key.clone(), value.to_vec()));
                    changes.record(node_key, leaf.clone());
                    break leaf;
                }
            };

            match self.load_node(&existing)? {
                Node::Internal(internal) => {
                    let nibble = key.at(depth).ok_or_else(|| {
                        Error::InvalidKey(format!("key {:?} is a prefix of stored keys", key))
                    })?;
                    current = internal
                        .child(nibble)
                        .map(|child| existing.child(child.version, nibble));
                    path.push((existing, internal, nibble));
                    depth += 1;
                }
                Node::Leaf(leaf) => {
                    changes.retire(existing);
                    let incoming = LeafNode::new(key.clone(), value.to_vec());
                    if leaf.key() == key {
                        let node = Node::Leaf(incoming);
                        changes.record(node_key, node.clone());
                        break node;
                    }
                    break self.split(&mut changes, version, leaf, incoming, depth)?;
                }
            }
        };

        // Rewrite every internal node on the way back up
        while let Some((existing, mut internal, nibble)) = path.pop() {
            internal.set_child(nibble, Child::new(child.hash(), version, child.is_leaf()));
            changes.retire(existing);
            let node = Node::Internal(internal);
            changes.record(self.key_at(version, key.prefix(path.len()))?, node.clone());
            child = node;
        }

        let root_key = self.key_at(version, Nibbles::new())?;
        self.apply(changes);
        self.root = Some(root_key);
        Ok(())
    }

    /// Push two leaves apart, one internal node per shared nibble
    fn split(
        &self,
        changes: &mut Changes,
        version: Version,
        existing: LeafNode,
        incoming: LeafNode,
        depth: usize,
    ) -> Result<Node> {
        let fork = existing.key().common_prefix_len(incoming.key());
        let (ours, theirs) = match (existing.key().at(fork), incoming.key().at(fork)) {
            (Some(ours), Some(theirs)) => (ours, theirs),
            _ => {
                return Err(Error::InvalidKey(format!(
                    "keys {:?} and {:?} are prefixes of one another",
                    existing.key(),
                    incoming.key()
                )))
            }
        };

        let path = incoming.key().clone();
        let mut internal = InternalNode::new();
        for (nibble, leaf) in [(ours, existing), (theirs, incoming)] {
            let leaf_key = self.key_at(version, leaf.key().prefix(fork + 1))?;
            internal.set_child(nibble, Child::new(leaf.hash(), version, true));
            changes.record(leaf_key, Node::Leaf(leaf));
        }
        let mut node = Node::Internal(internal);
        changes.record(self.key_at(version, path.prefix(fork))?, node.clone());

        // Single-child chain over the shared run, bottom-up
        for level in (depth..fork).rev() {
            let mut chain = InternalNode::new();
            let nibble = path.at(level).ok_or_else(|| {
                Error::InvalidKey(format!("key {:?} ends inside a shared run", path))
            })?;
            chain.set_child(nibble, Child::new(node.hash(), version, false));
            node = Node::Internal(chain);
            changes.record(self.key_at(version, path.prefix(level))?, node.clone());
        }
        Ok(node)
    }

    fn delete(&mut self, version: Version, key: &Nibbles) -> Result<()> {
        let mut current = match self.root.clone() {
            Some(root) => root,
            None => return Ok(()),
        };

        let mut changes = Changes::default();
        let mut path: Vec<(NodeKey, InternalNode, u8)> = Vec::new();

        // Walk down to the leaf; a miss anywhere leaves the trie unchanged
        loop {
            let internal = match self.load_node(&current)? {
                Node::Leaf(leaf) if leaf.key() == key => {
                    changes.retire(current);
                    break;
                }
                Node::Leaf(_) => return Ok(()),
                Node::Internal(internal) => internal,
            };
            let child = key
                .at(path.len())
                .and_then(|nibble| internal.child(nibble).map(|c| (nibble, c.version)));
            let (nibble, child_version) = match child {
                Some(found) => found,
                None => return Ok(()),
            };
            let child_key = current.child(child_version, nibble);
            path.push((current, internal, nibble));
            current = child_key;
        }

        let mut removal = Removal::Removed;
        while let Some((current, mut internal, nibble)) = path.pop() {
            let depth = path.len();
            let replaced = match removal {
                Removal::Removed => {
                    internal.remove_child(nibble);
                    None
                }
                Removal::Replaced(node) => {
                    internal.set_child(nibble, Child::new(node.hash(), version, node.is_leaf()));
                    Some(node)
                }
            };

            changes.retire(current.clone());
            if internal.child_count() == 0 {
                removal = Removal::Removed;
                continue;
            }

            let node_key = self.key_at(version, key.prefix(depth))?;
            if let Some((only, only_child)) = internal.only_leaf_child().map(|(n, c)| (n, *c)) {
                // Compact: the surviving leaf moves up to this node's position
                let (leaf_key, leaf) = match replaced {
                    Some(node) if only == nibble => (current.child(version, nibble), node),
                    _ => {
                        let leaf_key = current.child(only_child.version, only);
                        let node = self.load_node(&leaf_key)?;
                        (leaf_key, node)
                    }
                };
                if !leaf.is_leaf() {
                    return Err(Error::CorruptNode(format!(
                        "child {:?} is flagged as a leaf but is internal",
                        leaf_key
                    )));
                }
                changes.retire(leaf_key);
                changes.record(node_key, leaf.clone());
                removal = Removal::Replaced(leaf);
                continue;
            }

            let node = Node::Internal(internal);
            changes.record(node_key, node.clone());
            removal = Removal::Replaced(node);
        }

        self.apply(changes);
        self.root = match removal {
            Removal::Removed => None,
            Removal::Replaced(_) => Some(self.key_at(version, Nibbles::new())?),
        };
        Ok(())
    }
}

/// Resolve a root hash to its root node key
pub(crate) fn read_anchor(store: &dyn KvStore, root_hash: &Hash) -> Result<NodeKey> {
    let bytes = store
        .get(root_hash.as_bytes())?
        .ok_or_else(|| Error::NotFound(format!("root anchor {}", root_hash)))?;
    NodeKey::decode(&bytes)
}

/// Read and decode a node straight from the store
pub(crate) fn read_node(store: &dyn KvStore, key: &NodeKey) -> Result<Node> {
    let bytes = store
        .get(&key.encode())?
        .ok_or_else(|| Error::NotFound(format!("node {:?}", key)))?;
    Node::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, LruNodeCache, MemoryStore};
    use tempfile::tempdir;

    const KEYS: [&[u8]; 4] = [b"0001", b"bbf7", b"0003", b"bb17"];
    const VALUES: [&[u8]; 4] = [b"v1", b"v2", b"v3", b"v4"];

    fn memory() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn populated(store: Arc<MemoryStore>) -> MerkleTrie {
        let mut trie = MerkleTrie::new(store);
        for (key, value) in KEYS.iter().zip(VALUES) {
            trie.update(0, key, value).unwrap();
        }
        trie
    }

    #[test]
    fn test_insert_get() {
        let trie = populated(memory());
        for (key, value) in KEYS.iter().zip(VALUES) {
            assert_eq!(trie.get(key).unwrap(), Some(value.to_vec()));
        }
        assert_eq!(trie.get(b"0002").unwrap(), None);
        assert_eq!(trie.get(b"00").unwrap(), None);
        assert_eq!(trie.get(b"").unwrap(), None);
    }

    #[test]
    fn test_empty_trie() {
        let mut trie = MerkleTrie::new(memory());
        assert_eq!(trie.get(b"key").unwrap(), None);
        assert_eq!(trie.root_hash().unwrap(), Hash::PLACEHOLDER);
        trie.update(0, b"missing", b"").unwrap();
        assert_eq!(trie.commit().unwrap(), Hash::PLACEHOLDER);
    }

    #[test]
    fn test_delete_leaves_others() {
        let mut trie = populated(memory());
        trie.update(0, b"0001", b"").unwrap();
        assert_eq!(trie.get(b"0001").unwrap(), None);
        for (key, value) in KEYS.iter().zip(VALUES).skip(1) {
            assert_eq!(trie.get(key).unwrap(), Some(value.to_vec()));
        }
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut trie = populated(memory());
        let before = trie.root_hash().unwrap();
        let pending = trie.pending();
        trie.update(0, b"0002", b"").unwrap();
        trie.update(0, b"zzzz", b"").unwrap();
        trie.update(0, b"00", b"").unwrap();
        assert_eq!(trie.root_hash().unwrap(), before);
        assert_eq!(trie.pending(), pending);
    }

    #[test]
    fn test_split_depth_matches_shared_prefix() {
        let store = memory();
        let mut trie = MerkleTrie::new(store.clone());
        trie.update(0, b"0001", b"a").unwrap();
        trie.update(0, b"0003", b"b").unwrap();
        // 7 shared nibbles: 7 single-child internals, one fork, two leaves
        assert_eq!(trie.pending().dirty, 10);
        trie.commit().unwrap();
        // plus the root anchor
        assert_eq!(store.len(), 11);
    }

    #[test]
    fn test_compaction_to_single_leaf() {
        let mut single = MerkleTrie::new(memory());
        single.update(0, b"0003", b"b").unwrap();
        let single_root = single.root_hash().unwrap();

        let mut trie = MerkleTrie::new(memory());
        trie.update(0, b"0001", b"a").unwrap();
        trie.update(0, b"0003", b"b").unwrap();
        trie.update(0, b"0001", b"").unwrap();

        assert_eq!(trie.root_hash().unwrap(), single_root);
        assert_eq!(trie.pending().dirty, 1);
        assert_eq!(trie.root_key().unwrap().path().len(), 0);
    }

    #[test]
    fn test_delete_everything_gives_placeholder() {
        let mut trie = populated(memory());
        for key in KEYS {
            trie.update(0, key, b"").unwrap();
        }
        assert_eq!(trie.root_hash().unwrap(), Hash::PLACEHOLDER);
        assert_eq!(trie.pending().dirty, 0);
    }

    #[test]
    fn test_update_in_place() {
        let mut trie = populated(memory());
        trie.update(0, b"bbf7", b"changed").unwrap();
        assert_eq!(trie.get(b"bbf7").unwrap(), Some(b"changed".to_vec()));
        assert_eq!(trie.get(b"bb17").unwrap(), Some(b"v4".to_vec()));
    }

    #[test]
    fn test_prefix_keys_rejected() {
        let mut trie = MerkleTrie::new(memory());
        trie.update(0, b"abc", b"1").unwrap();
        assert!(matches!(
            trie.update(0, b"ab", b"2"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            trie.update(0, b"abcd", b"2"),
            Err(Error::InvalidKey(_))
        ));
        // A failed update leaves the trie as it was
        assert_eq!(trie.get(b"abc").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.pending().dirty, 1);
        assert!(matches!(trie.update(0, b"", b"x"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_long_shared_prefix() {
        let mut a = vec![0u8; MAX_KEY_LEN];
        let mut b = a.clone();
        a[MAX_KEY_LEN - 1] = 1;
        b[MAX_KEY_LEN - 1] = 2;

        let mut trie = MerkleTrie::new(memory());
        trie.update(0, &a, b"x").unwrap();
        trie.update(0, &b, b"y").unwrap();
        // One internal per shared nibble, then the fork and two leaves
        let shared = 2 * MAX_KEY_LEN - 1;
        assert_eq!(trie.pending().dirty, shared + 3);
        assert_eq!(trie.get(&a).unwrap(), Some(b"x".to_vec()));
        assert_eq!(trie.get(&b).unwrap(), Some(b"y".to_vec()));

        // Deleting one compacts the whole chain back into a single leaf
        trie.update(0, &a, b"").unwrap();
        assert_eq!(trie.pending().dirty, 1);
        assert_eq!(trie.get(&b).unwrap(), Some(b"y".to_vec()));

        let mut single = MerkleTrie::new(memory());
        single.update(0, &b, b"y").unwrap();
        assert_eq!(trie.root_hash().unwrap(), single.root_hash().unwrap());
    }

    #[test]
    fn test_oversized_entries_rejected() {
        let mut trie = populated(memory());
        let before = trie.root_hash().unwrap();

        let long_key = vec![1u8; MAX_KEY_LEN + 1];
        assert!(matches!(
            trie.update(0, &long_key, b"v"),
            Err(Error::InvalidKey(_))
        ));
        let big_value = vec![7u8; MAX_VALUE_LEN + 1];
        assert!(matches!(
            trie.update(0, b"0001", &big_value),
            Err(Error::InvalidValue(_))
        ));
        assert_eq!(trie.root_hash().unwrap(), before);
    }

    #[test]
    fn test_commit_and_load() {
        let store = memory();
        let mut trie = populated(store.clone());
        let root = trie.commit().unwrap();

        assert!(matches!(trie.get(b"0001"), Err(Error::StaleHandle)));
        assert!(matches!(trie.update(1, b"0001", b"x"), Err(Error::StaleHandle)));

        let loaded = MerkleTrie::load(store, root).unwrap();
        assert_eq!(loaded.root_hash().unwrap(), root);
        for (key, value) in KEYS.iter().zip(VALUES) {
            assert_eq!(loaded.get(key).unwrap(), Some(value.to_vec()));
        }
    }

    #[test]
    fn test_load_unknown_root() {
        let result = MerkleTrie::load(memory(), Hash::digest(b"nope"));
        assert!(matches!(result, Err(Error::NotFound(_))));

        let empty = MerkleTrie::load(memory(), Hash::PLACEHOLDER).unwrap();
        assert_eq!(empty.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_journal_prune_set() {
        let store = memory();
        let mut trie = populated(store.clone());
        let (v0, journal) = trie.commit_with_journal().unwrap();
        assert!(journal.prune().is_empty());
        assert_eq!(journal.root_hash(), v0);

        let mut trie = MerkleTrie::load(store.clone(), v0).unwrap();
        trie.update(1, b"0001", b"v1'").unwrap();
        let (v1, journal) = trie.commit_with_journal().unwrap();

        // Every v0 node on the path to 0001 is superseded, and only those
        assert!(!journal.prune().is_empty());
        assert!(journal.prune().iter().all(|k| k.version() == 0));
        assert!(journal
            .dirty()
            .iter()
            .all(|(k, _)| k.version() == 1 && !journal.prune().contains(k)));

        // Until pruned, the old version remains readable
        let old = MerkleTrie::load(store.clone(), v0).unwrap();
        assert_eq!(old.get(b"0001").unwrap(), Some(b"v1".to_vec()));

        journal.apply_prune(store.as_ref()).unwrap();
        let new = MerkleTrie::load(store.clone(), v1).unwrap();
        let expected: [&[u8]; 4] = [b"v1'", b"v2", b"v3", b"v4"];
        for (key, value) in KEYS.iter().zip(expected) {
            assert_eq!(new.get(key).unwrap(), Some(value.to_vec()));
        }
        // The v0 root itself was pruned
        assert!(matches!(
            MerkleTrie::load(store, v0),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_superseded_dirty_nodes_are_not_pruned() {
        let mut trie = MerkleTrie::new(memory());
        trie.update(0, b"aa", b"1").unwrap();
        trie.update(0, b"ab", b"2").unwrap();
        trie.update(0, b"ab", b"").unwrap();
        // Nothing was ever committed, so nothing is prunable
        assert_eq!(trie.pending().prune, 0);
        assert_eq!(trie.pending().dirty, 1);
    }

    #[test]
    fn test_with_prefix_separates_trees() {
        let store = memory();
        let mut a = MerkleTrie::new(store.clone()).with_prefix(b"a".to_vec()).unwrap();
        a.update(0, b"key", b"from-a").unwrap();
        let root_a = a.commit().unwrap();

        let mut b = MerkleTrie::new(store.clone()).with_prefix(b"b".to_vec()).unwrap();
        b.update(0, b"key", b"from-b").unwrap();
        let root_b = b.commit().unwrap();

        let a = MerkleTrie::load(store.clone(), root_a).unwrap();
        assert_eq!(a.prefix(), b"a");
        assert_eq!(a.get(b"key").unwrap(), Some(b"from-a".to_vec()));
        let b = MerkleTrie::load(store, root_b).unwrap();
        assert_eq!(b.get(b"key").unwrap(), Some(b"from-b".to_vec()));

        assert!(MerkleTrie::new(memory()).with_prefix(vec![0u8; 256]).is_err());
    }

    #[test]
    fn test_node_cache_is_populated_and_evicted() {
        let store = memory();
        let cache = Arc::new(LruNodeCache::with_capacity(128));
        let mut trie = populated(store.clone()).with_node_cache(cache.clone());
        let (root, journal) = trie.commit_with_journal().unwrap();
        assert_eq!(cache.len(), journal.dirty().len());

        let mut trie = MerkleTrie::load(store, root)
            .unwrap()
            .with_node_cache(cache.clone());
        trie.update(1, b"0003", b"").unwrap();
        let (_, journal) = trie.commit_with_journal().unwrap();
        for key in journal.prune() {
            assert!(cache.get(key.version(), key).is_none());
        }
    }

    #[test]
    fn test_file_store_backing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.jmt");

        let root = {
            let store = Arc::new(FileStore::create(&path).unwrap());
            let mut trie = MerkleTrie::new(store);
            for (key, value) in KEYS.iter().zip(VALUES) {
                trie.update(0, key, value).unwrap();
            }
            trie.commit().unwrap()
        };

        let store = Arc::new(FileStore::open(&path).unwrap());
        let trie = MerkleTrie::load(store, root).unwrap();
        assert_eq!(trie.get(b"bb17").unwrap(), Some(b"v4".to_vec()));
    }

    #[test]
    fn test_corrupt_node_aborts_read() {
        let store = memory();
        let mut trie = populated(store.clone());
        let root = trie.commit().unwrap();

        let trie = MerkleTrie::load(store.clone(), root).unwrap();
        let root_key = trie.root_key().unwrap().clone();
        let child = match trie.fetch(&root_key).unwrap() {
            Node::Internal(internal) => {
                let (nibble, child) = internal.children().next().unwrap();
                root_key.child(child.version, nibble)
            }
            Node::Leaf(_) => panic!("expected an internal root"),
        };
        store.put(&child.encode(), b"garbage").unwrap();

        assert!(matches!(trie.get(b"0001"), Err(Error::CorruptNode(_))));
    }
}
