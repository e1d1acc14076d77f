//! External anchoring: periodic publication of `(height, block_hash)` pairs
//! to an independently-secured ledger as tamper evidence.
//!
//! The publication channel is pluggable. A received anchor conflicting with
//! local canonical history is the one condition that suspends the node.

use std::sync::Arc;

use parking_lot::Mutex;

use doin_consensus_core::errors::sync::{SyncError, SyncResult};
use doin_hashes::Hash;

use doin_core::info;

/// Sink for anchor publication. Implementations wrap whatever external ledger
/// the operator trusts.
pub trait AnchorSink: Send + Sync {
    fn publish(&self, height: u64, block_hash: Hash, timestamp: u64);
}

/// In-memory sink used by simulation and tests.
#[derive(Default)]
pub struct MemoryAnchorSink {
    published: Mutex<Vec<(u64, Hash, u64)>>,
}

impl MemoryAnchorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(u64, Hash, u64)> {
        self.published.lock().clone()
    }
}

impl AnchorSink for MemoryAnchorSink {
    fn publish(&self, height: u64, block_hash: Hash, timestamp: u64) {
        self.published.lock().push((height, block_hash, timestamp));
    }
}

pub struct AnchorManager {
    interval_blocks: u64,
    sink: Arc<dyn AnchorSink>,
    last_published_height: Option<u64>,
}

impl AnchorManager {
    pub fn new(interval_blocks: u64, sink: Arc<dyn AnchorSink>) -> Self {
        Self { interval_blocks, sink, last_published_height: None }
    }

    /// Publishes the tip when the configured interval elapsed since the last
    /// published height.
    pub fn maybe_publish(&mut self, height: u64, block_hash: Hash, timestamp: u64) {
        if self.interval_blocks == 0 {
            return;
        }
        let due = match self.last_published_height {
            None => height >= self.interval_blocks,
            Some(last) => height >= last + self.interval_blocks,
        };
        if due {
            info!("anchoring ({}, {})", height, block_hash);
            self.sink.publish(height, block_hash, timestamp);
            self.last_published_height = Some(height);
        }
    }

    /// Checks a received anchor against local canonical history. `local` is
    /// the canonical hash at the anchor height, if this node has one.
    pub fn verify_received(&self, height: u64, anchored: Hash, local: Option<Hash>) -> SyncResult<()> {
        match local {
            Some(hash) if hash != anchored => Err(SyncError::AnchorDivergence(height, anchored, hash)),
            _ => Ok(()),
        }
    }
}
