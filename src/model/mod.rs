//! Core data model types for jmt_db

mod hash;
mod nibbles;

pub use hash::{Hash, HASH_LEN};
pub use nibbles::Nibbles;

/// The version a node was written at
pub type Version = u64;
