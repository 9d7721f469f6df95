//! The anchor/tip forest.
//!
//! Headers accepted from peers become [`Tip`]s keyed by their hash. A subtree whose
//! lowest header has an unknown parent hangs off an [`Anchor`] keyed by that missing
//! parent hash. Subtrees whose root's parent is a persisted tip are connected to
//! stored history and drain into storage through the insert queue.
//!
//! The forest keeps three queues, all with lazy deletion: entries are validated
//! against the maps when popped and silently dropped when stale.
//! - anchor retry queue, earliest retry time first;
//! - insert queue of tips whose parent is persisted, lowest height first;
//! - persisted queue used to evict the lowest persisted tips from memory.

mod anchor;
mod attach;
mod insert;
mod preverify;
mod requests;
mod segments;
mod tip;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt::Write as _;

use alloy_primitives::B256;

use crate::chain::HardTips;
use crate::config::DownloadConfig;
use crate::error::HardTipsError;
use crate::types::{ForestStats, Header, PeerId};

pub use anchor::Anchor;
pub use attach::ProcessOutcome;
pub use insert::InsertReport;
pub use tip::Tip;

use anchor::AnchorQueueEntry;

/// In-memory header download state.
#[derive(Debug)]
pub struct HeaderDownload {
    config: DownloadConfig,
    anchors: HashMap<B256, Anchor>,
    tips: HashMap<B256, Tip>,
    anchor_queue: BinaryHeap<AnchorQueueEntry>,
    insert_queue: BinaryHeap<Reverse<(u64, B256)>>,
    persisted_queue: BinaryHeap<Reverse<(u64, B256)>>,
    persisted_tips: usize,
    bad_headers: HashSet<B256>,
    hard_tips: HardTips,
    pending_hard_tips: HashSet<B256>,
    highest_in_db: u64,
    top_seen_height: u64,
    next_anchor_id: u64,
}

impl HeaderDownload {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            anchors: HashMap::new(),
            tips: HashMap::new(),
            anchor_queue: BinaryHeap::new(),
            insert_queue: BinaryHeap::new(),
            persisted_queue: BinaryHeap::new(),
            persisted_tips: 0,
            bad_headers: HashSet::new(),
            hard_tips: HardTips::default(),
            pending_hard_tips: HashSet::new(),
            highest_in_db: 0,
            top_seen_height: 0,
            next_anchor_id: 0,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Load the compiled-in hard tips of the configured network.
    pub fn set_hard_coded_tips(&mut self) -> Result<(), HardTipsError> {
        let tips = HardTips::for_network(self.config.network)?;
        tracing::info!(
            "[{}] loaded {} hard-coded tips for {}, max height {}",
            self.config.log_prefix,
            tips.len(),
            self.config.network,
            tips.max_height()
        );
        self.install_hard_tips(tips);
        Ok(())
    }

    /// Replace the hard tips with the given headers.
    pub fn set_hard_tips(&mut self, headers: impl IntoIterator<Item = Header>) {
        self.install_hard_tips(HardTips::from_headers(headers));
    }

    fn install_hard_tips(&mut self, tips: HardTips) {
        self.pending_hard_tips = tips.hashes().copied().collect();
        self.hard_tips = tips;
    }

    /// Headers at or below this height are inserted only once preverified.
    pub fn max_hard_tip_height(&self) -> u64 {
        self.hard_tips.max_height()
    }

    pub fn is_hard_tip(&self, hash: &B256) -> bool {
        self.hard_tips.contains(hash)
    }

    /// Height of the highest header known to be in storage.
    pub fn progress(&self) -> u64 {
        self.highest_in_db
    }

    pub fn highest_in_db(&self) -> u64 {
        self.highest_in_db
    }

    pub fn top_seen_height(&self) -> u64 {
        self.top_seen_height
    }

    /// Raise the top seen height, e.g. from a peer's status message.
    pub fn update_top_seen_height(&mut self, height: u64) {
        self.top_seen_height = self.top_seen_height.max(height);
    }

    pub fn has_tip(&self, hash: &B256) -> bool {
        self.tips.contains_key(hash)
    }

    pub fn tip(&self, hash: &B256) -> Option<&Tip> {
        self.tips.get(hash)
    }

    /// Anchor waiting for the header with hash `parent_hash`.
    pub fn anchor(&self, parent_hash: &B256) -> Option<&Anchor> {
        self.anchors.get(parent_hash)
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn tip_count(&self) -> usize {
        self.tips.len()
    }

    /// Tips not yet written to storage.
    pub fn in_flight_tips(&self) -> usize {
        self.tips.len() - self.persisted_tips
    }

    pub fn mark_bad_header(&mut self, hash: B256) {
        self.bad_headers.insert(hash);
    }

    pub fn is_bad_header(&self, hash: &B256) -> bool {
        self.bad_headers.contains(hash)
    }

    pub fn stats(&self) -> ForestStats {
        ForestStats {
            anchors: self.anchors.len(),
            tips: self.tips.len(),
            in_flight_tips: self.in_flight_tips(),
            persisted_tips: self.persisted_tips,
            pending_hard_tips: self.pending_hard_tips.len(),
            highest_in_db: self.highest_in_db,
            top_seen_height: self.top_seen_height,
        }
    }

    /// One line per anchor, lowest first: covered height range, tip count and timeouts.
    pub fn anchor_state(&self) -> String {
        let mut anchors: Vec<&Anchor> = self.anchors.values().collect();
        anchors.sort_by_key(|anchor| (anchor.block_height, anchor.parent_hash));

        let mut out = String::new();
        for anchor in anchors {
            let (count, top) = self.subtree_extent(&anchor.tips);
            let _ = writeln!(
                out,
                "{}-{} anchor {} tips={} timeouts={}",
                anchor.block_height, top, anchor.parent_hash, count, anchor.timeouts
            );
        }
        out
    }

    /// Number of tips reachable from `roots` and the highest height among them.
    fn subtree_extent(&self, roots: &[B256]) -> (usize, u64) {
        let mut stack = roots.to_vec();
        let mut count = 0;
        let mut top = 0;
        while let Some(hash) = stack.pop() {
            if let Some(tip) = self.tips.get(&hash) {
                count += 1;
                top = top.max(tip.height());
                stack.extend_from_slice(&tip.next);
            }
        }
        (count, top)
    }

    /// Register an anchor waiting for `parent_hash` unless one already exists.
    ///
    /// Returns `true` when a new anchor was created.
    fn register_anchor(&mut self, parent_hash: B256, block_height: u64, peer: PeerId) -> bool {
        if self.anchors.contains_key(&parent_hash) {
            return false;
        }
        let anchor = Anchor {
            parent_hash,
            block_height,
            timestamp: 0,
            timeouts: 0,
            tips: Vec::new(),
            peer,
            id: self.next_anchor_id,
        };
        self.next_anchor_id += 1;
        self.anchor_queue.push(anchor.queue_entry());
        self.anchors.insert(parent_hash, anchor);
        true
    }

    /// Remove the anchor keyed by `parent_hash` together with every tip above it.
    fn invalidate_anchor(&mut self, parent_hash: &B256) -> usize {
        match self.anchors.remove(parent_hash) {
            Some(anchor) => self.remove_upwards(anchor.tips),
            None => 0,
        }
    }

    /// Delete the given tips and all their descendants. Returns the number removed.
    ///
    /// Callers detach the roots from their parent's `next` themselves.
    fn remove_upwards(&mut self, roots: impl IntoIterator<Item = B256>) -> usize {
        let mut stack: Vec<B256> = roots.into_iter().collect();
        let mut removed = 0;
        while let Some(hash) = stack.pop() {
            if let Some(tip) = self.tips.remove(&hash) {
                if tip.persisted {
                    self.persisted_tips -= 1;
                }
                removed += 1;
                stack.extend(tip.next);
            }
        }
        removed
    }

    /// Queue a tip whose parent is persisted.
    fn queue_for_insert(&mut self, hash: B256) {
        if let Some(tip) = self.tips.get(&hash) {
            self.insert_queue.push(Reverse((tip.height(), hash)));
        }
    }
}
