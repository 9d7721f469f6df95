//! Shared handle to the forest and the loops that drive it.
//!
//! `HeaderSync` owns the forest behind a single reader/writer lock. Anything that
//! mutates it, including `request_more_headers` which moves anchor retry times, takes
//! the write lock for the whole operation. Splitting batches and read-only queries take
//! the read lock, so several transport tasks can split batches concurrently and then
//! serialize on attachment.

pub mod driver;
pub mod events;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::chain::HeaderInserter;
use crate::config::DownloadConfig;
use crate::error::{ConfigError, HardTipsError, InsertResult, StorageResult, StructuralError};
use crate::forest::{HeaderDownload, InsertReport, ProcessOutcome};
use crate::storage::HeaderStorage;
use crate::types::{ChainSegment, ForestStats, Header, HeaderRequest, PeerId, Penalty, PenaltyItem, RawHeader};
use crate::verify::SealVerifier;

pub use driver::{spawn_insert_loop, spawn_request_loop};
pub use events::{EventBus, EventError, EventReceiver, HeaderEvent};

/// Result of handing one peer response to [`HeaderSync::handle_headers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleReport {
    /// Set when the batch was rejected as a whole.
    pub penalty: Option<PenaltyItem>,
    /// Outcome per segment that was attached or skipped.
    pub outcomes: Vec<ProcessOutcome>,
    /// Segments dropped on a structural error.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct HeaderSync {
    config: DownloadConfig,
    forest: Arc<RwLock<HeaderDownload>>,
}

impl HeaderSync {
    pub fn new(config: DownloadConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            forest: Arc::new(RwLock::new(HeaderDownload::new(config.clone()))),
            config,
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// The lock-protected forest.
    pub fn forest(&self) -> &Arc<RwLock<HeaderDownload>> {
        &self.forest
    }

    pub async fn split_into_segments(&self, headers: Vec<RawHeader>) -> Result<Vec<ChainSegment>, Penalty> {
        self.forest.read().await.split_into_segments(headers)
    }

    pub async fn process_segment(
        &self,
        segment: &ChainSegment,
        new_block: bool,
        peer: PeerId,
    ) -> Result<ProcessOutcome, StructuralError> {
        self.forest.write().await.process_segment(segment, new_block, peer)
    }

    /// Split a peer response into segments and attach each of them.
    ///
    /// A structural error drops only its own segment.
    pub async fn handle_headers(&self, headers: Vec<RawHeader>, new_block: bool, peer: PeerId) -> HandleReport {
        let mut report = HandleReport::default();
        let segments = match self.split_into_segments(headers).await {
            Ok(segments) => segments,
            Err(penalty) => {
                tracing::debug!("[{}] rejected header batch: {}", self.config.log_prefix, penalty);
                report.penalty = Some(PenaltyItem {
                    peer,
                    penalty,
                });
                return report;
            }
        };

        let mut forest = self.forest.write().await;
        for segment in &segments {
            match forest.process_segment(segment, new_block, peer) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!("[{}] dropped segment: {}", self.config.log_prefix, e);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub async fn insert_headers<S: HeaderStorage + ?Sized>(
        &self,
        inserter: &mut HeaderInserter,
        storage: &mut S,
        verifier: &dyn SealVerifier,
        cancel: &CancellationToken,
    ) -> InsertResult<InsertReport> {
        self.forest.write().await.insert_headers(inserter, storage, verifier, cancel).await
    }

    pub async fn set_hard_coded_tips(&self) -> Result<(), HardTipsError> {
        self.forest.write().await.set_hard_coded_tips()
    }

    pub async fn set_hard_tips(&self, headers: Vec<Header>) {
        self.forest.write().await.set_hard_tips(headers);
    }

    pub async fn recover_from_db<S: HeaderStorage + ?Sized>(&self, storage: &S) -> StorageResult<()> {
        self.forest.write().await.recover_from_db(storage).await
    }

    pub async fn request_more_headers(
        &self,
        now: u64,
        timeout: Duration,
    ) -> (Option<HeaderRequest>, Vec<PenaltyItem>) {
        self.forest.write().await.request_more_headers(now, timeout)
    }

    pub async fn request_skeleton(&self) -> Option<HeaderRequest> {
        self.forest.read().await.request_skeleton()
    }

    pub async fn progress(&self) -> u64 {
        self.forest.read().await.progress()
    }

    pub async fn has_tip(&self, hash: &B256) -> bool {
        self.forest.read().await.has_tip(hash)
    }

    pub async fn top_seen_height(&self) -> u64 {
        self.forest.read().await.top_seen_height()
    }

    pub async fn update_top_seen_height(&self, height: u64) {
        self.forest.write().await.update_top_seen_height(height);
    }

    pub async fn mark_bad_header(&self, hash: B256) {
        self.forest.write().await.mark_bad_header(hash);
    }

    pub async fn stats(&self) -> ForestStats {
        self.forest.read().await.stats()
    }

    pub async fn anchor_state(&self) -> String {
        self.forest.read().await.anchor_state()
    }
}
