//! Physical addresses of trie nodes
//!
//! Encoding layout:
//! ```text
//! [version: 8 bytes, big-endian]
//! [prefix length: 1 byte]
//! [prefix bytes]
//! [path: one byte per nibble]
//! ```
//!
//! Byte-wise comparison of two encodings orders keys by version, then prefix
//! (length first), then path. The `Ord` impl below matches that order exactly.

use crate::model::{Nibbles, Version};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Longest tree prefix that fits the one-byte length field
pub const MAX_PREFIX_LEN: usize = u8::MAX as usize;

/// Where a node lives in the key-value store
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNodeKey")]
pub struct NodeKey {
    version: Version,
    prefix: Vec<u8>,
    path: Nibbles,
}

/// Serialized shape of a [`NodeKey`], checked before it becomes one
#[derive(Deserialize)]
struct RawNodeKey {
    version: Version,
    prefix: Vec<u8>,
    path: Vec<u8>,
}

impl TryFrom<RawNodeKey> for NodeKey {
    type Error = Error;

    fn try_from(raw: RawNodeKey) -> Result<Self> {
        let path = Nibbles::from_nibbles(raw.path)
            .ok_or_else(|| Error::InvalidKey("node key path holds a non-nibble".into()))?;
        NodeKey::new(raw.version, raw.prefix, path)
    }
}

impl NodeKey {
    /// Create a node key. Prefixes longer than [`MAX_PREFIX_LEN`] are rejected.
    pub fn new(version: Version, prefix: impl Into<Vec<u8>>, path: Nibbles) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(Error::InvalidKey(format!(
                "tree prefix of {} bytes exceeds {}",
                prefix.len(),
                MAX_PREFIX_LEN
            )));
        }
        Ok(NodeKey {
            version,
            prefix,
            path,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn path(&self) -> &Nibbles {
        &self.path
    }

    /// Key of a node in the same tree at another version and path
    pub fn sibling(&self, version: Version, path: Nibbles) -> NodeKey {
        NodeKey {
            version,
            prefix: self.prefix.clone(),
            path,
        }
    }

    /// Key of the child under `nibble`, written at `version`
    pub fn child(&self, version: Version, nibble: u8) -> NodeKey {
        self.sibling(version, self.path.child(nibble))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.prefix.len() + self.path.len());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.prefix.len() as u8);
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(self.path.as_slice());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 9 {
            return Err(Error::CorruptNode(format!(
                "node key of {} bytes is too short",
                bytes.len()
            )));
        }
        let (version_bytes, rest) = bytes.split_at(8);
        let version = u64::from_be_bytes(
            version_bytes
                .try_into()
                .map_err(|_| Error::CorruptNode("node key version".into()))?,
        );
        let prefix_len = rest[0] as usize;
        let rest = &rest[1..];
        if rest.len() < prefix_len {
            return Err(Error::CorruptNode(format!(
                "node key prefix length {} overruns {} bytes",
                prefix_len,
                rest.len()
            )));
        }
        let (prefix, path) = rest.split_at(prefix_len);
        let path = Nibbles::from_nibbles(path.to_vec())
            .ok_or_else(|| Error::CorruptNode("node key path holds a non-nibble".into()))?;

        Ok(NodeKey {
            version,
            prefix: prefix.to_vec(),
            path,
        })
    }
}

impl Ord for NodeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.prefix.len().cmp(&other.prefix.len()))
            .then_with(|| self.prefix.cmp(&other.prefix))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for NodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeKey(v{}, {}, {:?})",
            self.version,
            hex::encode(&self.prefix),
            self.path
        )
    }
}
