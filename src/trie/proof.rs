//! Merkle inclusion proofs
//!
//! A proof is the encoded nodes on the path from the root to a key's leaf,
//! root first. Verification needs only the root hash: each internal node must
//! hash to what its parent recorded, and the leaf rebuilt from the proof's key
//! and value must hash to what the last internal node recorded.

use super::node::{LeafNode, Node};
use super::tree::MerkleTrie;
use crate::model::{Hash, Nibbles};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// The proven key, absent when the key was not found
    pub key: Option<Vec<u8>>,
    /// The proven value, absent when the key was not found
    pub value: Option<Vec<u8>>,
    /// Encoded nodes from root to leaf
    pub nodes: Vec<Vec<u8>>,
}

impl Proof {
    /// Whether the proof claims membership. A proof without a key proves
    /// nothing, including absence.
    pub fn is_conclusive(&self) -> bool {
        self.key.is_some() && self.value.is_some()
    }
}

impl MerkleTrie {
    /// Build an inclusion proof for `key`
    ///
    /// An empty trie gives an empty proof. A missing key gives the nodes
    /// visited before the path ran out, with no key or value.
    pub fn prove(&self, key: &[u8]) -> Result<Proof> {
        let mut proof = Proof::default();
        let mut current = match self.root_key() {
            Some(root) => root.clone(),
            None => {
                self.root_hash()?;
                return Ok(proof);
            }
        };
        let nibbles = Nibbles::from_key(key);

        let mut depth = 0;
        loop {
            let node = self.fetch(&current)?;
            proof.nodes.push(node.encode());
            match node {
                Node::Leaf(leaf) => {
                    if !key.is_empty() && leaf.key() == &nibbles {
                        proof.key = Some(key.to_vec());
                        proof.value = Some(leaf.value().to_vec());
                    }
                    return Ok(proof);
                }
                Node::Internal(internal) => {
                    let child = nibbles
                        .at(depth)
                        .and_then(|nibble| internal.child(nibble).map(|c| (nibble, c.version)));
                    match child {
                        Some((nibble, version)) => current = current.child(version, nibble),
                        None => return Ok(proof),
                    }
                    depth += 1;
                }
            }
        }
    }
}

/// Check `proof` against `root_hash`
///
/// Malformed input (no proof, or no key or value) is `BadProof`. A well-formed
/// proof that does not check out is `Ok(false)`.
pub fn verify_proof(root_hash: &Hash, proof: Option<&Proof>) -> Result<bool> {
    let proof = proof.ok_or_else(|| Error::BadProof("no proof supplied".into()))?;
    let key = match &proof.key {
        Some(key) if !key.is_empty() => key,
        _ => return Err(Error::BadProof("proof carries no key".into())),
    };
    let value = proof
        .value
        .as_ref()
        .ok_or_else(|| Error::BadProof("proof carries no value".into()))?;

    let nibbles = Nibbles::from_key(key);
    let mut expected = *root_hash;

    for (depth, entry) in proof.nodes.iter().enumerate() {
        let node = match Node::decode(entry) {
            Ok(node) => node,
            Err(e) => {
                debug!(depth, error = %e, "proof entry does not decode");
                return Ok(false);
            }
        };

        match node {
            Node::Internal(internal) => {
                if internal.hash() != expected {
                    return Ok(false);
                }
                match nibbles.at(depth).and_then(|nibble| internal.child(nibble)) {
                    Some(child) => expected = child.hash,
                    None => return Ok(false),
                }
            }
            Node::Leaf(_) => {
                if depth + 1 != proof.nodes.len() {
                    return Ok(false);
                }
                let rebuilt = LeafNode::new(nibbles.clone(), value.clone());
                return Ok(rebuilt.hash() == expected);
            }
        }
    }

    // Ran out of entries before reaching a leaf
    Ok(false)
}
