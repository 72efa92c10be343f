//! Concurrent full-trie iterator
//!
//! A [`NodeIterator`] walks every node reachable from one committed root on a
//! worker thread. Nodes come out on a bounded queue, so a slow consumer holds
//! the worker back instead of letting the queue grow. The worker reports exactly
//! one [`IterOutcome`] on a separate status channel and then closes both
//! channels.
//!
//! Consumers must read the item queue and the status channel together (for
//! example with `crossbeam_channel::select!`). Waiting on the status channel
//! alone leaves the worker blocked on a full queue. [`IterHandle::drain`] does
//! this for callers that just want everything.

use super::node::Node;
use super::node_key::NodeKey;
use super::tree::{read_anchor, read_node};
use crate::model::Hash;
use crate::store::{KvStore, NodeCache, WriteBatch};
use crate::{Error, Result};
use crossbeam_channel::{
    after, bounded, never, select, select_biased, Receiver, Sender, TryRecvError,
};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Puts per write batch when replicating into another store
const EXPORT_BATCH_SIZE: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterOptions {
    /// Capacity of the item queue
    pub queue_capacity: usize,
    /// How long one emission may wait on a full queue. `None` waits forever.
    pub emit_timeout: Option<Duration>,
    /// Emit only leaves, as key/value pairs
    pub leaves_only: bool,
}

impl Default for IterOptions {
    fn default() -> Self {
        IterOptions {
            queue_capacity: 256,
            emit_timeout: Some(Duration::from_secs(30)),
            leaves_only: false,
        }
    }
}

/// One emitted element
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterItem {
    Node { key: NodeKey, node: Node },
    Leaf { key: Vec<u8>, value: Vec<u8> },
}

/// How a traversal ended
#[derive(Debug)]
pub enum IterOutcome {
    /// Every reachable node was emitted
    Completed,
    /// Stopped by the caller, or the caller went away
    Interrupted,
    /// An emission waited longer than the configured timeout
    TimedOut,
    /// A node could not be loaded or decoded
    Failed(Error),
}

impl IterOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IterOutcome::Completed)
    }
}

impl fmt::Display for IterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterOutcome::Completed => write!(f, "completed"),
            IterOutcome::Interrupted => write!(f, "interrupted"),
            IterOutcome::TimedOut => write!(f, "timed out"),
            IterOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// A traversal that has located its root but not started
pub struct NodeIterator {
    store: Arc<dyn KvStore>,
    node_cache: Option<Arc<dyn NodeCache>>,
    root_hash: Hash,
    root: Option<NodeKey>,
    options: IterOptions,
}

impl NodeIterator {
    /// Locate the root of `root_hash`. Fails with `NotFound` if no anchor
    /// exists. The placeholder hash gives a traversal with nothing to emit.
    pub fn new(store: Arc<dyn KvStore>, root_hash: Hash, options: IterOptions) -> Result<Self> {
        let root = if root_hash.is_placeholder() {
            None
        } else {
            Some(read_anchor(store.as_ref(), &root_hash)?)
        };
        Ok(NodeIterator {
            store,
            node_cache: None,
            root_hash,
            root,
            options,
        })
    }

    pub fn with_node_cache(mut self, cache: Arc<dyn NodeCache>) -> Self {
        self.node_cache = Some(cache);
        self
    }

    pub fn root_key(&self) -> Option<&NodeKey> {
        self.root.as_ref()
    }

    /// Spawn the worker
    pub fn start(self) -> Result<IterHandle> {
        let (item_tx, item_rx) = bounded(self.options.queue_capacity.max(1));
        let (status_tx, status_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);

        debug!(root = %self.root_hash, options = ?self.options, "starting trie iterator");
        let worker = Worker {
            store: self.store,
            node_cache: self.node_cache,
            options: self.options,
            items: item_tx,
            stop: stop_rx,
        };
        let root = self.root;
        let root_hash = self.root_hash;
        let handle = thread::Builder::new()
            .name(format!("jmt-iter-{}", root_hash.short()))
            .spawn(move || {
                let outcome = worker.run(root);
                match &outcome {
                    IterOutcome::Failed(e) => warn!(root = %root_hash, error = %e, "trie iterator failed"),
                    other => debug!(root = %root_hash, outcome = %other, "trie iterator finished"),
                }
                // Capacity one and sent once, never blocks
                let _ = status_tx.send(outcome);
            })?;

        Ok(IterHandle {
            items: item_rx,
            status: status_rx,
            stop: stop_tx,
            worker: Some(handle),
        })
    }
}

struct Worker {
    store: Arc<dyn KvStore>,
    node_cache: Option<Arc<dyn NodeCache>>,
    options: IterOptions,
    items: Sender<IterItem>,
    stop: Receiver<()>,
}

enum Emit {
    Sent,
    Stopped(IterOutcome),
}

impl Worker {
    fn run(&self, root: Option<NodeKey>) -> IterOutcome {
        // Max-heap: highest NodeKey first, which fixes the emission order
        let mut worklist: BinaryHeap<NodeKey> = root.into_iter().collect();

        while let Some(key) = worklist.pop() {
            match self.stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return IterOutcome::Interrupted,
            }

            let node = match self.load(&key) {
                Ok(node) => node,
                Err(e) => return IterOutcome::Failed(e),
            };
            if let Node::Internal(internal) = &node {
                for (nibble, child) in internal.children() {
                    worklist.push(key.child(child.version, nibble));
                }
            }

            let item = match (node, self.options.leaves_only) {
                (Node::Internal(_), true) => continue,
                (Node::Leaf(leaf), true) => match leaf.key().to_key() {
                    Some(bytes) => IterItem::Leaf {
                        key: bytes,
                        value: leaf.value().to_vec(),
                    },
                    None => {
                        return IterOutcome::Failed(Error::CorruptNode(format!(
                            "leaf at {:?} has an odd-length key",
                            key
                        )))
                    }
                },
                (node, false) => IterItem::Node { key, node },
            };

            if let Emit::Stopped(outcome) = self.emit(item) {
                return outcome;
            }
        }

        IterOutcome::Completed
    }

    fn load(&self, key: &NodeKey) -> Result<Node> {
        if let Some(node) = self
            .node_cache
            .as_ref()
            .and_then(|cache| cache.get(key.version(), key))
        {
            trace!(key = ?key, "iterator cache hit");
            return Ok(node);
        }
        read_node(self.store.as_ref(), key)
    }

    /// Hand one item to the consumer. The timer restarts for every item.
    fn emit(&self, item: IterItem) -> Emit {
        let timer = match self.options.emit_timeout {
            Some(timeout) => after(timeout),
            None => never(),
        };
        select_biased! {
            recv(self.stop) -> _ => Emit::Stopped(IterOutcome::Interrupted),
            send(self.items, item) -> sent => match sent {
                Ok(()) => Emit::Sent,
                // Consumer dropped the queue
                Err(_) => Emit::Stopped(IterOutcome::Interrupted),
            },
            recv(timer) -> _ => Emit::Stopped(IterOutcome::TimedOut),
        }
    }
}

/// A running traversal
///
/// Dropping the handle stops the worker and waits for it to exit.
pub struct IterHandle {
    items: Receiver<IterItem>,
    status: Receiver<IterOutcome>,
    stop: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl IterHandle {
    /// Emitted items. Disconnects once the worker has exited.
    pub fn items(&self) -> &Receiver<IterItem> {
        &self.items
    }

    /// Receives the single terminal outcome
    pub fn status(&self) -> &Receiver<IterOutcome> {
        &self.status
    }

    /// Ask the worker to stop at its next emission. Items already queued stay
    /// readable. Calling this more than once has no further effect.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    /// Collect every item and the outcome
    pub fn drain(self) -> (Vec<IterItem>, IterOutcome) {
        let mut items = Vec::new();
        let mut outcome = None;
        let mut items_open = true;
        // Stands in for a channel that has already closed or reported
        let idle_items = never();
        let idle_status = never();

        while items_open || outcome.is_none() {
            let item_rx = if items_open { &self.items } else { &idle_items };
            let status_rx = if outcome.is_none() { &self.status } else { &idle_status };
            select! {
                recv(item_rx) -> msg => match msg {
                    Ok(item) => items.push(item),
                    Err(_) => items_open = false,
                },
                recv(status_rx) -> msg => {
                    outcome = Some(msg.unwrap_or_else(|_| {
                        IterOutcome::Failed(Error::IterationIncomplete(
                            "worker exited without reporting".into(),
                        ))
                    }));
                },
            }
        }

        let outcome = outcome.unwrap_or(IterOutcome::Interrupted);
        (items, outcome)
    }
}

impl Drop for IterHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("trie iterator worker panicked");
            }
        }
    }
}

/// Copy every node reachable from `root_hash` into `dest`, then its anchor
///
/// The anchor is written only after a completed traversal, so `dest` never
/// holds a root it cannot serve. Returns the number of nodes copied.
pub fn replicate(
    source: Arc<dyn KvStore>,
    root_hash: Hash,
    dest: &dyn KvStore,
    options: IterOptions,
) -> Result<usize> {
    let options = IterOptions {
        leaves_only: false,
        ..options
    };
    let iterator = NodeIterator::new(source, root_hash, options)?;
    let root_key = iterator.root_key().cloned();
    let handle = iterator.start()?;

    let mut copied = 0;
    let mut batch = WriteBatch::new();
    for item in handle.items().iter() {
        if let IterItem::Node { key, node } = item {
            batch.put(key.encode(), node.encode());
            copied += 1;
        }
        if batch.len() >= EXPORT_BATCH_SIZE {
            dest.write_batch(std::mem::take(&mut batch))?;
        }
    }

    let outcome = handle.status().recv().unwrap_or_else(|_| {
        IterOutcome::Failed(Error::IterationIncomplete(
            "worker exited without reporting".into(),
        ))
    });
    match outcome {
        IterOutcome::Completed => {}
        IterOutcome::Failed(e) => return Err(e),
        other => {
            return Err(Error::IterationIncomplete(format!(
                "export of {} {}",
                root_hash, other
            )))
        }
    }

    if let Some(root_key) = root_key {
        batch.put(root_hash.as_bytes().to_vec(), root_key.encode());
    }
    if !batch.is_empty() {
        dest.write_batch(batch)?;
    }
    debug!(root = %root_hash, nodes = copied, "replicated trie");
    Ok(copied)
}
