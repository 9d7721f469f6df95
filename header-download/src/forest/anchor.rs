use std::cmp::Ordering;

use alloy_primitives::B256;

use crate::types::PeerId;

/// The missing parent of one or more subtrees.
#[derive(Debug, Clone)]
pub struct Anchor {
    /// Hash this anchor waits for; also its key in the forest.
    pub(crate) parent_hash: B256,
    /// Height of the lowest attached header.
    pub(crate) block_height: u64,
    /// Earliest time, in seconds, at which the parent may be requested again.
    pub(crate) timestamp: u64,
    pub(crate) timeouts: u32,
    /// Roots of the subtrees waiting on this anchor.
    pub(crate) tips: Vec<B256>,
    /// Peer whose segment created the anchor.
    pub(crate) peer: PeerId,
    /// Distinguishes re-created anchors with the same key in the retry queue.
    pub(crate) id: u64,
}

impl Anchor {
    pub fn parent_hash(&self) -> &B256 {
        &self.parent_hash
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn tips(&self) -> &[B256] {
        &self.tips
    }

    pub(crate) fn queue_entry(&self) -> AnchorQueueEntry {
        AnchorQueueEntry {
            timestamp: self.timestamp,
            id: self.id,
            parent_hash: self.parent_hash,
        }
    }
}

/// Retry queue entry. Entries whose anchor is gone or has moved on are stale and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnchorQueueEntry {
    pub(crate) timestamp: u64,
    pub(crate) id: u64,
    pub(crate) parent_hash: B256,
}

// Reversed so that `BinaryHeap` pops the earliest timestamp first
impl Ord for AnchorQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.id.cmp(&self.id))
            .then_with(|| other.parent_hash.cmp(&self.parent_hash))
    }
}

impl PartialOrd for AnchorQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
