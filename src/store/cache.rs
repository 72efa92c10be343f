//! Shared decoded-node cache
//!
//! The cache is an optimization only. A miss always falls back to the store,
//! and nothing decides correctness based on what the cache holds.

use crate::model::Version;
use crate::trie::{Node, NodeKey};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A cache of decoded nodes, shareable across trie handles and iterators
pub trait NodeCache: Send + Sync {
    /// Look up the node written at `version` under `key`
    fn get(&self, version: Version, key: &NodeKey) -> Option<Node>;

    /// Insert nodes committed at `version` and evict superseded keys
    fn update(&self, version: Version, inserts: Vec<(NodeKey, Node)>, evicts: &[NodeKey]);
}

/// LRU node cache
pub struct LruNodeCache {
    cache: Mutex<LruCache<(Version, NodeKey), Node>>,
}

impl LruNodeCache {
    /// Default capacity
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Create a cache holding at most `capacity` nodes (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruNodeCache {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl NodeCache for LruNodeCache {
    fn get(&self, version: Version, key: &NodeKey) -> Option<Node> {
        // LruCache::get needs &mut to bump recency
        self.cache.lock().get(&(version, key.clone())).cloned()
    }

    fn update(&self, version: Version, inserts: Vec<(NodeKey, Node)>, evicts: &[NodeKey]) {
        let mut cache = self.cache.lock();
        for key in evicts {
            cache.pop(&(key.version(), key.clone()));
        }
        for (key, node) in inserts {
            cache.put((version, key), node);
        }
    }
}
