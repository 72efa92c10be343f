//! # jmt_db
//!
//! A versioned, authenticated key-value trie.
//!
//! jmt_db maps byte keys to byte values and gives every committed version a
//! cryptographic root hash. Old versions stay readable by their root hash until
//! the caller prunes the nodes they no longer need, and any value can be proven
//! against a root hash with an inclusion proof.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Internal nodes branch 16 ways on one key nibble; leaves hold a
//!   full key and value
//! - **Node keys**: Nodes are stored under (version, tree prefix, path)
//! - **Commits**: Flush one version's dirty nodes and record its root anchor
//! - **Journals**: Report which nodes a commit wrote and which it superseded
//! - **Iterators**: Walk a historical root on a worker thread, for export
//!
//! ## Example
//!
//! ```ignore
//! use jmt_db::{MerkleTrie, MemoryStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut trie = MerkleTrie::new(store.clone());
//! trie.update(0, b"key", b"value")?;
//! let root = trie.commit()?;
//!
//! let trie = MerkleTrie::load(store, root)?;
//! let proof = trie.prove(b"key")?;
//! assert!(jmt_db::verify_proof(&root, Some(&proof))?);
//! ```

pub mod config;
pub mod model;
pub mod store;
pub mod trie;

mod error;

pub use config::{Config, IteratorConfig};
pub use error::{Error, Result};
pub use model::{Hash, Nibbles, Version};
pub use store::{FileStore, KvStore, LruNodeCache, MemoryStore, NodeCache, WriteBatch};
pub use trie::{
    replicate, verify_proof, CommitJournal, IterHandle, IterItem, IterOptions, IterOutcome,
    MerkleTrie, NodeIterator, NodeKey, Proof,
};

/// Store file format version
pub const VERSION: u32 = 1;

/// Magic bytes for store file identification
pub const MAGIC: &[u8; 8] = b"JMT_KVDB";
