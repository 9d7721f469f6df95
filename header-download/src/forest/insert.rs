use std::cmp::Reverse;

use alloy_primitives::B256;
use tokio_util::sync::CancellationToken;

use super::{HeaderDownload, Tip};
use crate::chain::HeaderInserter;
use crate::error::{InsertResult, StorageError, StorageResult};
use crate::storage::{HEADERS_STAGE, HeaderStorage};
use crate::types::{Penalty, PenaltyItem, RawHeader};
use crate::verify::SealVerifier;

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Headers written to storage.
    pub inserted: usize,
    /// Tips dropped because a seal check failed, descendants included.
    pub rejected: usize,
    /// Peers that delivered headers with invalid seals.
    pub penalties: Vec<PenaltyItem>,
    /// Stopped at a tip that must be preverified first.
    pub deferred: bool,
    /// Stopped because the flush was cancelled.
    pub cancelled: bool,
}

impl HeaderDownload {
    /// Write every ready tip to storage, lowest first.
    ///
    /// A tip at or below the hard tip height is only written once preverified. Above it,
    /// tips that are not preverified must pass `verifier`; a failing tip is dropped with
    /// its whole subtree. Cancellation is checked between headers, so the header being
    /// written always completes.
    ///
    /// # Errors
    ///
    /// Storage failures and missing parents abort the flush. Headers already written
    /// stay written and are accounted for.
    pub async fn insert_headers<S: HeaderStorage + ?Sized>(
        &mut self,
        inserter: &mut HeaderInserter,
        storage: &mut S,
        verifier: &dyn SealVerifier,
        cancel: &CancellationToken,
    ) -> InsertResult<InsertReport> {
        let mut report = InsertReport::default();
        let drained = self.drain_insert_queue(inserter, storage, verifier, cancel, &mut report).await;

        self.highest_in_db = self.highest_in_db.max(inserter.highest());
        let fixed = inserter.fix_canonical_chain(storage).await;
        let evicted = self.evict_persisted();
        drained?;
        fixed?;

        if report.inserted > 0 || report.rejected > 0 {
            tracing::info!(
                "[{}] inserted {} headers, rejected {}, highest in db {}, evicted {} persisted tips",
                self.config.log_prefix,
                report.inserted,
                report.rejected,
                self.highest_in_db,
                evicted
            );
        }
        Ok(report)
    }

    async fn drain_insert_queue<S: HeaderStorage + ?Sized>(
        &mut self,
        inserter: &mut HeaderInserter,
        storage: &mut S,
        verifier: &dyn SealVerifier,
        cancel: &CancellationToken,
        report: &mut InsertReport,
    ) -> InsertResult<()> {
        while let Some(Reverse((height, hash))) = self.insert_queue.pop() {
            if cancel.is_cancelled() {
                self.insert_queue.push(Reverse((height, hash)));
                report.cancelled = true;
                break;
            }
            let Some(tip) = self.tips.get(&hash) else {
                continue;
            };
            if tip.persisted {
                continue;
            }

            if !tip.preverified {
                if height <= self.max_hard_tip_height() {
                    self.insert_queue.push(Reverse((height, hash)));
                    report.deferred = true;
                    break;
                }
                if let Err(e) = verifier.verify_seal(tip.header.hashed.header()) {
                    let peer = tip.peer;
                    let parent = *tip.parent_hash();
                    tracing::warn!("[{}] rejected header {} at {}: {}", self.config.log_prefix, hash, height, e);
                    if let Some(parent) = self.tips.get_mut(&parent) {
                        parent.next.retain(|child| *child != hash);
                    }
                    report.rejected += self.remove_upwards([hash]);
                    report.penalties.push(PenaltyItem {
                        peer,
                        penalty: Penalty::InvalidSeal,
                    });
                    continue;
                }
            }

            if let Err(e) = inserter.feed_header(storage, &tip.header).await {
                // Left queued so the next flush retries it
                self.insert_queue.push(Reverse((height, hash)));
                return Err(e);
            }

            let children = match self.tips.get_mut(&hash) {
                Some(tip) => {
                    tip.persisted = true;
                    tip.next.clone()
                }
                None => continue,
            };
            self.persisted_tips += 1;
            self.persisted_queue.push(Reverse((height, hash)));
            for child in children {
                self.queue_for_insert(child);
            }
            report.inserted += 1;
        }
        Ok(())
    }

    /// Drop the lowest persisted tips from memory until at most `persisted_tip_limit` remain.
    fn evict_persisted(&mut self) -> usize {
        let mut evicted = 0;
        while self.persisted_tips > self.config.persisted_tip_limit {
            let Some(Reverse((_, hash))) = self.persisted_queue.pop() else {
                break;
            };
            if self.tips.get(&hash).is_some_and(|tip| tip.persisted) {
                self.tips.remove(&hash);
                self.persisted_tips -= 1;
                evicted += 1;
            }
        }
        evicted
    }

    /// Rebuild the persisted part of the forest from storage.
    ///
    /// Persisted tips in memory are dropped and replaced by up to `persisted_tip_limit`
    /// canonical headers ending at the saved header progress. In-flight tips whose parent
    /// is among them are queued for insertion again.
    pub async fn recover_from_db<S: HeaderStorage + ?Sized>(&mut self, storage: &S) -> StorageResult<()> {
        self.tips.retain(|_, tip| !tip.persisted);
        self.persisted_queue.clear();
        self.persisted_tips = 0;

        let progress = storage.get_progress(HEADERS_STAGE).await?;
        let mut height = progress;
        let mut child: Option<B256> = None;
        let mut recovered = Vec::new();
        while recovered.len() < self.config.persisted_tip_limit {
            let Some(hash) = storage.read_canonical_hash(height).await? else {
                break;
            };
            let header = storage.read_header(&hash, height).await?.ok_or_else(|| {
                StorageError::InconsistentState(format!("canonical header {} at {} missing", hash, height))
            })?;

            let mut tip = Tip::new(RawHeader::from_header(header)?, [0u8; 64]);
            tip.persisted = true;
            tip.next.extend(child);
            self.tips.insert(hash, tip);
            self.persisted_tips += 1;
            self.persisted_queue.push(Reverse((height, hash)));
            recovered.push(hash);
            child = Some(hash);

            if height == 0 {
                break;
            }
            height -= 1;
        }

        let reattached: Vec<(B256, B256)> = self
            .tips
            .iter()
            .filter(|(_, tip)| !tip.persisted)
            .filter(|(_, tip)| self.tips.get(tip.parent_hash()).is_some_and(|parent| parent.persisted))
            .map(|(hash, tip)| (*tip.parent_hash(), *hash))
            .collect();
        for (parent, hash) in reattached {
            if let Some(parent) = self.tips.get_mut(&parent) {
                if !parent.next.contains(&hash) {
                    parent.next.push(hash);
                }
            }
            self.queue_for_insert(hash);
        }

        self.highest_in_db = progress;
        tracing::info!(
            "[{}] recovered {} persisted tips, highest in db {}",
            self.config.log_prefix,
            recovered.len(),
            progress
        );
        Ok(())
    }
}
