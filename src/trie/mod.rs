//! Versioned merkle trie over nibble paths
//!
//! This implements a 16-ary authenticated trie where:
//! - Each node's hash is derived from its content only, never its location
//! - Every update rewrites the root-to-leaf path under a new version
//! - Unchanged subtrees are shared by key across versions
//! - Superseded nodes are reported per commit so callers can prune them

mod iter;
mod journal;
mod node;
mod node_key;
mod proof;
mod tree;

pub use iter::{replicate, IterHandle, IterItem, IterOptions, IterOutcome, NodeIterator};
pub use journal::CommitJournal;
pub use node::{Child, InternalNode, LeafNode, Node, CHILDREN, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use node_key::{NodeKey, MAX_PREFIX_LEN};
pub use proof::{verify_proof, Proof};
pub use tree::{MerkleTrie, PendingStats};
