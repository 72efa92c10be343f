//! Key-value storage boundary
//!
//! The trie needs very little from its backing store: point reads and an
//! atomically applied batch of puts and deletes. Two implementations ship with
//! the crate, an in-memory [`MemoryStore`] and a single-file [`FileStore`].
//! A [`NodeCache`] can sit in front of the store to skip decoding hot nodes.

mod batch;
mod cache;
mod file_store;
mod memory;

pub use batch::{BatchOp, WriteBatch};
pub use cache::{LruNodeCache, NodeCache};
pub use file_store::FileStore;
pub use memory::MemoryStore;

use crate::Result;

/// Storage contract consumed by the trie and the iterator
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every operation in `batch`, all or nothing
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }
}
