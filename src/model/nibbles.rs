//! Nibble paths
//!
//! Keys are walked four bits at a time. A `Nibbles` value stores one nibble
//! per byte so that byte-wise comparison of two paths is also nibble-wise
//! comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sequence of 4-bit values, each stored in the low half of a byte
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nibbles(Vec<u8>);

impl Nibbles {
    /// An empty path (the root position)
    pub fn new() -> Self {
        Nibbles(Vec::new())
    }

    /// Expand key bytes into nibbles, high half first
    pub fn from_key(key: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(key.len() * 2);
        for byte in key {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        Nibbles(nibbles)
    }

    /// Build from raw nibble values, rejecting anything above 0x0f
    pub fn from_nibbles(nibbles: Vec<u8>) -> Option<Self> {
        if nibbles.iter().all(|n| *n < 16) {
            Some(Nibbles(nibbles))
        } else {
            None
        }
    }

    /// Pack back into key bytes. Returns `None` for an odd-length path.
    pub fn to_key(&self) -> Option<Vec<u8>> {
        if self.0.len() % 2 != 0 {
            return None;
        }
        Some(
            self.0
                .chunks_exact(2)
                .map(|pair| (pair[0] << 4) | pair[1])
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Nibble at `index`, if the path is long enough
    pub fn at(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// The first `len` nibbles
    pub fn prefix(&self, len: usize) -> Nibbles {
        Nibbles(self.0[..len.min(self.0.len())].to_vec())
    }

    /// A copy of this path extended by one nibble
    pub fn child(&self, nibble: u8) -> Nibbles {
        debug_assert!(nibble < 16);
        let mut path = self.0.clone();
        path.push(nibble);
        Nibbles(path)
    }

    /// Number of leading nibbles shared with `other`
    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nibbles(")?;
        for n in &self.0 {
            write!(f, "{:x}", n)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_key_splits_high_then_low() {
        let n = Nibbles::from_key(&[0xab, 0x01]);
        assert_eq!(n.as_slice(), &[0xa, 0xb, 0x0, 0x1]);
        assert_eq!(n.to_key().unwrap(), vec![0xab, 0x01]);
    }

    #[test]
    fn test_prefix_and_child() {
        let n = Nibbles::from_key(b"0");
        assert_eq!(n.prefix(1).as_slice(), &[3]);
        assert_eq!(n.prefix(1).child(0), n);
        assert!(n.prefix(1).to_key().is_none());
    }

    #[test]
    fn test_common_prefix_len() {
        let a = Nibbles::from_key(b"bbf7");
        let b = Nibbles::from_key(b"bb17");
        // "bb" shares 4 nibbles, then '1' (0x31) vs 'f' (0x66) differ immediately
        assert_eq!(a.common_prefix_len(&b), 4);
    }

    #[test]
    fn test_from_nibbles_rejects_wide_values() {
        assert!(Nibbles::from_nibbles(vec![1, 2, 16]).is_none());
        assert!(Nibbles::from_nibbles(vec![1, 15]).is_some());
    }
}
