//! Trie node types and their binary encoding
//!
//! A node is either an [`InternalNode`] with sixteen optional child slots, one
//! per nibble, or a [`LeafNode`] holding a full key and its value. There is no
//! extension node: a run of shared nibbles is a chain of single-child internal
//! nodes.
//!
//! Hashes depend only on logical content. A leaf hashes its key and value, an
//! internal node hashes its children's hashes. Neither the version a node was
//! written at nor the path it lives under is hashed.

use crate::model::{Hash, Nibbles, Version};
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Radix of every internal node
pub const CHILDREN: usize = 16;

/// Largest encoded node accepted by [`Node::decode`]
pub const MAX_NODE_SIZE: u64 = 64 * 1024 * 1024;

/// Longest value a leaf may hold so that its encoding stays under
/// [`MAX_NODE_SIZE`] for any key up to `MAX_KEY_LEN` bytes
pub const MAX_VALUE_LEN: usize = MAX_NODE_SIZE as usize - 2 * MAX_KEY_LEN - 64;

/// Longest key accepted by an update. Node keys carry their full path, so
/// the bytes spent on one key's node keys grow with the square of its length.
pub const MAX_KEY_LEN: usize = 4096;

const LEAF_DOMAIN: &[u8] = b"JMT::LeafNode";
const INTERNAL_DOMAIN: &[u8] = b"JMT::InternalNode";

fn encoder() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Stored bytes are untrusted, so decoding is bounded
fn decoder() -> impl Options {
    encoder().with_limit(MAX_NODE_SIZE)
}

/// Descriptor of a present child slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    /// Content hash of the subtree rooted at the child
    pub hash: Hash,
    /// Version at which the child node was written
    pub version: Version,
    /// Whether the child is a leaf, so compaction can be decided without a read
    pub leaf: bool,
}

impl Child {
    pub fn new(hash: Hash, version: Version, leaf: bool) -> Self {
        Child {
            hash,
            version,
            leaf,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    children: [Option<Child>; CHILDREN],
}

impl InternalNode {
    /// An internal node with no children. Only valid as a building block.
    pub fn new() -> Self {
        InternalNode {
            children: [None; CHILDREN],
        }
    }

    pub fn child(&self, nibble: u8) -> Option<&Child> {
        self.children.get(nibble as usize).and_then(|c| c.as_ref())
    }

    pub fn set_child(&mut self, nibble: u8, child: Child) {
        self.children[nibble as usize] = Some(child);
    }

    pub fn remove_child(&mut self, nibble: u8) -> Option<Child> {
        self.children[nibble as usize].take()
    }

    /// Present children with their nibble, in nibble order
    pub fn children(&self) -> impl Iterator<Item = (u8, &Child)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u8, c)))
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }

    /// The sole child if this node has exactly one, and it is a leaf
    pub fn only_leaf_child(&self) -> Option<(u8, &Child)> {
        let mut children = self.children();
        match (children.next(), children.next()) {
            (Some((nibble, child)), None) if child.leaf => Some((nibble, child)),
            _ => None,
        }
    }

    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(INTERNAL_DOMAIN);
        for slot in &self.children {
            let hash = slot.map(|c| c.hash).unwrap_or(Hash::PLACEHOLDER);
            hasher.update(hash.as_bytes());
        }
        Hash::from_bytes(*hasher.finalize().as_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    key: Nibbles,
    value: Vec<u8>,
    hash: Hash,
}

impl LeafNode {
    pub fn new(key: Nibbles, value: Vec<u8>) -> Self {
        let mut leaf = LeafNode {
            key,
            value,
            hash: Hash::ZERO,
        };
        leaf.hash = leaf.compute_hash();
        leaf
    }

    pub fn key(&self) -> &Nibbles {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Hash over key and value with the cached hash field zeroed
    fn compute_hash(&self) -> Hash {
        let unhashed = LeafNode {
            key: self.key.clone(),
            value: self.value.clone(),
            hash: Hash::ZERO,
        };
        let data = encoder()
            .serialize(&unhashed)
            .expect("leaf serialization should not fail");
        Hash::digest_many(&[LEAF_DOMAIN, &data])
    }
}

/// A node in the trie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// Content hash of this node
    pub fn hash(&self) -> Hash {
        match self {
            Node::Internal(internal) => internal.hash(),
            Node::Leaf(leaf) => leaf.hash(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Binary encoding as stored under the node's `NodeKey`
    pub fn encode(&self) -> Vec<u8> {
        encoder()
            .serialize(self)
            .expect("node serialization should not fail")
    }

    /// Decode and validate a stored node
    pub fn decode(bytes: &[u8]) -> Result<Node> {
        let node: Node = decoder()
            .deserialize(bytes)
            .map_err(|e| Error::CorruptNode(e.to_string()))?;

        match &node {
            Node::Internal(internal) => {
                if internal.child_count() == 0 {
                    return Err(Error::CorruptNode("internal node without children".into()));
                }
            }
            Node::Leaf(leaf) => {
                if Nibbles::from_nibbles(leaf.key.as_slice().to_vec()).is_none() {
                    return Err(Error::CorruptNode("leaf key holds a non-nibble".into()));
                }
                if leaf.compute_hash() != leaf.hash {
                    return Err(Error::CorruptNode(format!(
                        "leaf hash mismatch for key {:?}",
                        leaf.key
                    )));
                }
            }
        }

        Ok(node)
    }
}

impl From<LeafNode> for Node {
    fn from(leaf: LeafNode) -> Self {
        Node::Leaf(leaf)
    }
}

impl From<InternalNode> for Node {
    fn from(internal: InternalNode) -> Self {
        Node::Internal(internal)
    }
}
