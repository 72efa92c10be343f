//! Error types for jmt_db

use thiserror::Error;

/// Result type alias for jmt_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jmt_db operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A root anchor or a node the trie expected to exist is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored bytes do not decode to a known node shape
    #[error("Corrupt node: {0}")]
    CorruptNode(String),

    /// Proof input is malformed (missing key or value)
    #[error("Bad proof: {0}")]
    BadProof(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The handle was committed and must be reloaded before further use
    #[error("Trie handle was committed; reload it from the new root hash")]
    StaleHandle,

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),

    /// A traversal stopped before visiting every node
    #[error("Iteration incomplete: {0}")]
    IterationIncomplete(String),
}
