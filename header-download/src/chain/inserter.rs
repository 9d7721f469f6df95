//! Feeds ready headers into storage one at a time and keeps track of the canonical
//! chain while doing so.
//!
//! A `HeaderInserter` lives for a single flush. Headers must arrive in non-decreasing
//! height order. Each header gets its total difficulty computed from its parent's. When
//! that exceeds the best total difficulty seen so far the header becomes the new head,
//! and the fork point against the stored canonical chain lowers the unwind point that
//! later stages have to roll back to.

use std::collections::HashMap;

use alloy_primitives::{B256, U256};

use crate::error::{InsertError, InsertResult, StorageError};
use crate::storage::{HEADERS_STAGE, HeaderStorage};
use crate::types::RawHeader;

#[derive(Debug)]
pub struct HeaderInserter {
    log_prefix: String,
    prev_hash: B256,
    prev_height: u64,
    local_td: U256,
    header_progress: u64,
    unwind_point: u64,
    unwind: bool,
    new_canonical: bool,
    highest: u64,
    highest_hash: B256,
    // Canonical hashes decided during this flush, not yet in storage. Forking points are
    // measured against these rather than the stored index, which can only lower them.
    canonical_overlay: HashMap<u64, B256>,
}

impl HeaderInserter {
    pub fn new(log_prefix: impl Into<String>, local_td: U256, header_progress: u64) -> Self {
        Self {
            log_prefix: log_prefix.into(),
            prev_hash: B256::ZERO,
            prev_height: 0,
            local_td,
            header_progress,
            unwind_point: header_progress,
            unwind: false,
            new_canonical: false,
            highest: 0,
            highest_hash: B256::ZERO,
            canonical_overlay: HashMap::new(),
        }
    }

    /// Start a flush from the head recorded in storage.
    pub async fn from_storage<S: HeaderStorage + ?Sized>(
        log_prefix: impl Into<String>,
        storage: &S,
    ) -> InsertResult<Self> {
        let progress = storage.get_progress(HEADERS_STAGE).await?;
        let head = match storage.read_canonical_hash(progress).await? {
            Some(hash) => hash,
            None => storage.read_head_header_hash().await?.ok_or_else(|| {
                StorageError::NotFound(format!("canonical hash at progress {}", progress))
            })?,
        };
        let local_td = storage.read_total_difficulty(&head, progress).await?.ok_or(
            InsertError::MissingTotalDifficulty {
                hash: head,
                height: progress,
            },
        )?;
        Ok(Self::new(log_prefix, local_td, progress))
    }

    /// Write one header, updating the canonical head when it is the heaviest seen.
    ///
    /// Returns the header's total difficulty, or `None` when it was skipped as already stored.
    pub async fn feed_header<S: HeaderStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        header: &RawHeader,
    ) -> InsertResult<Option<U256>> {
        let hash = *header.hash();
        let height = header.number();
        if hash == self.prev_hash {
            return Ok(None);
        }
        if height < self.prev_height {
            return Err(InsertError::Unsorted {
                height,
                prev_height: self.prev_height,
            });
        }
        if height == 0 {
            return Err(InsertError::Genesis);
        }
        if storage.read_header(&hash, height).await?.is_some() {
            tracing::trace!("[{}] header {} at {} already stored", self.log_prefix, hash, height);
            return Ok(None);
        }

        let parent_hash = *header.parent_hash();
        let parent = storage.read_header(&parent_hash, height - 1).await?.ok_or(
            InsertError::MissingParent {
                hash: parent_hash,
                height: height - 1,
            },
        )?;
        let parent_td = storage.read_total_difficulty(&parent_hash, height - 1).await?.ok_or(
            InsertError::MissingTotalDifficulty {
                hash: parent_hash,
                height: height - 1,
            },
        )?;
        let td = parent_td + header.hashed.header().difficulty;

        if td > self.local_td {
            let forking_point = self.forking_point(storage, height, parent_hash, parent.parent_hash).await?;
            self.new_canonical = true;
            self.highest = height;
            self.highest_hash = hash;
            self.header_progress = height;
            self.canonical_overlay.insert(height, hash);
            storage.write_head_header_hash(hash).await?;
            storage.save_progress(HEADERS_STAGE, height).await?;
            if forking_point < self.unwind_point {
                tracing::info!(
                    "[{}] new canonical head {} at {} forks at {}",
                    self.log_prefix,
                    hash,
                    height,
                    forking_point
                );
                self.unwind_point = forking_point;
                self.unwind = true;
            }
            self.local_td = td;
        }

        storage.write_total_difficulty(hash, height, td).await?;
        storage.write_header(height, hash, &header.raw).await?;
        self.prev_hash = hash;
        self.prev_height = height;
        Ok(Some(td))
    }

    async fn canonical_hash<S: HeaderStorage + ?Sized>(
        &self,
        storage: &S,
        height: u64,
    ) -> InsertResult<Option<B256>> {
        if let Some(hash) = self.canonical_overlay.get(&height) {
            return Ok(Some(*hash));
        }
        Ok(storage.read_canonical_hash(height).await?)
    }

    /// Highest height shared by the canonical chain and the ancestry of a header at `height`.
    async fn forking_point<S: HeaderStorage + ?Sized>(
        &self,
        storage: &S,
        height: u64,
        parent_hash: B256,
        grandparent_hash: B256,
    ) -> InsertResult<u64> {
        if self.canonical_hash(storage, height - 1).await? == Some(parent_hash) {
            return Ok(height - 1);
        }

        let mut ancestor_hash = grandparent_hash;
        let mut ancestor_height = height.checked_sub(2).ok_or(InsertError::NoCommonAncestor {
            height,
        })?;
        loop {
            if self.canonical_hash(storage, ancestor_height).await? == Some(ancestor_hash) {
                return Ok(ancestor_height);
            }
            if ancestor_height == 0 {
                return Err(InsertError::NoCommonAncestor {
                    height,
                });
            }
            let ancestor = storage.read_header(&ancestor_hash, ancestor_height).await?.ok_or(
                InsertError::MissingParent {
                    hash: ancestor_hash,
                    height: ancestor_height,
                },
            )?;
            ancestor_hash = ancestor.parent_hash;
            ancestor_height -= 1;
        }
    }

    /// Rewrite the canonical index from the new head down to where it already agrees,
    /// then drop canonical entries above the head.
    pub async fn fix_canonical_chain<S: HeaderStorage + ?Sized>(&self, storage: &mut S) -> InsertResult<()> {
        if !self.new_canonical || self.highest == 0 {
            return Ok(());
        }

        let mut hash = self.highest_hash;
        let mut height = self.highest;
        let mut rewritten = 0u64;
        while storage.read_canonical_hash(height).await? != Some(hash) {
            storage.write_canonical_hash(height, hash).await?;
            rewritten += 1;
            if height == 0 {
                break;
            }
            let header = storage.read_header(&hash, height).await?.ok_or(InsertError::MissingParent {
                hash,
                height,
            })?;
            hash = header.parent_hash;
            height -= 1;
        }
        storage.truncate_canonical_hashes(self.highest + 1).await?;

        tracing::debug!(
            "[{}] canonical chain fixed up to {} ({} entries rewritten)",
            self.log_prefix,
            self.highest,
            rewritten
        );
        Ok(())
    }

    /// Whether any fed header became the new canonical head.
    pub fn best_header_changed(&self) -> bool {
        self.new_canonical
    }

    /// Whether stored canonical history has to be unwound.
    pub fn unwind(&self) -> bool {
        self.unwind
    }

    pub fn unwind_point(&self) -> u64 {
        self.unwind_point
    }

    /// Height of the latest canonical head decided by this inserter.
    pub fn highest(&self) -> u64 {
        self.highest
    }

    pub fn highest_hash(&self) -> B256 {
        self.highest_hash
    }

    pub fn header_progress(&self) -> u64 {
        self.header_progress
    }

    pub fn local_td(&self) -> U256 {
        self.local_td
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::storage::MemoryHeaderStorage;
    use crate::test_utils::{HeaderChainBuilder, genesis};

    async fn fixture() -> (MemoryHeaderStorage, HeaderInserter, RawHeader) {
        let genesis = RawHeader::from_header(genesis()).unwrap();
        let storage = MemoryHeaderStorage::with_genesis(genesis.hashed.header().clone()).unwrap();
        let inserter = HeaderInserter::from_storage("Headers", &storage).await.unwrap();
        (storage, inserter, genesis)
    }

    #[tokio::test]
    async fn test_extends_canonical_chain() {
        let (mut storage, mut inserter, genesis) = fixture().await;
        let chain = HeaderChainBuilder::on(&genesis).difficulty(2).build(3);

        for header in &chain {
            assert!(inserter.feed_header(&mut storage, header).await.unwrap().is_some());
        }

        assert!(inserter.best_header_changed());
        assert!(!inserter.unwind());
        assert_eq!(inserter.highest(), 3);
        assert_eq!(inserter.local_td(), U256::from(7));
        assert_eq!(storage.read_head_header_hash().await.unwrap(), Some(*chain[2].hash()));
        assert_eq!(storage.get_progress(HEADERS_STAGE).await.unwrap(), 3);

        inserter.fix_canonical_chain(&mut storage).await.unwrap();
        assert_eq!(storage.canonical_chain().len(), 4);
        assert_eq!(storage.read_canonical_hash(2).await.unwrap(), Some(*chain[1].hash()));
    }

    #[tokio::test]
    async fn test_heavier_fork_sets_unwind_point() {
        let (mut storage, mut inserter, genesis) = fixture().await;
        let main = HeaderChainBuilder::on(&genesis).build(4);
        for header in &main {
            inserter.feed_header(&mut storage, header).await.unwrap();
        }
        inserter.fix_canonical_chain(&mut storage).await.unwrap();

        let mut inserter = HeaderInserter::from_storage("Headers", &storage).await.unwrap();
        assert_eq!(inserter.unwind_point(), 4);
        let fork = HeaderChainBuilder::on(&main[0]).difficulty(5).salt(1).build(2);
        for header in &fork {
            inserter.feed_header(&mut storage, header).await.unwrap();
        }

        assert!(inserter.unwind());
        assert_eq!(inserter.unwind_point(), 1);
        assert_eq!(inserter.highest(), 3);

        inserter.fix_canonical_chain(&mut storage).await.unwrap();
        let canonical = storage.canonical_chain();
        assert_eq!(canonical.len(), 4);
        assert_eq!(canonical[1].1, *main[0].hash());
        assert_eq!(canonical[2].1, *fork[0].hash());
        assert_eq!(canonical[3].1, *fork[1].hash());
    }

    #[tokio::test]
    async fn test_lighter_fork_is_stored_but_not_canonical() {
        let (mut storage, mut inserter, genesis) = fixture().await;
        let main = HeaderChainBuilder::on(&genesis).difficulty(10).build(2);
        let side = HeaderChainBuilder::on(&genesis).salt(7).build(1);

        inserter.feed_header(&mut storage, &main[0]).await.unwrap();
        inserter.feed_header(&mut storage, &side[0]).await.unwrap();
        inserter.feed_header(&mut storage, &main[1]).await.unwrap();

        assert!(storage.contains_header(side[0].hash(), 1));
        assert_eq!(inserter.highest_hash(), *main[1].hash());
        assert!(!inserter.unwind());
    }

    #[tokio::test]
    async fn test_skips_duplicates_and_stored_headers() {
        let (mut storage, mut inserter, genesis) = fixture().await;
        let chain = HeaderChainBuilder::on(&genesis).build(1);

        assert!(inserter.feed_header(&mut storage, &chain[0]).await.unwrap().is_some());
        assert_eq!(inserter.feed_header(&mut storage, &chain[0]).await.unwrap(), None);

        let mut fresh = HeaderInserter::new("Headers", U256::ZERO, 0);
        assert_eq!(fresh.feed_header(&mut storage, &chain[0]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_unsorted_and_orphans() {
        let (mut storage, mut inserter, genesis) = fixture().await;
        let chain = HeaderChainBuilder::on(&genesis).build(3);

        inserter.feed_header(&mut storage, &chain[0]).await.unwrap();
        inserter.feed_header(&mut storage, &chain[1]).await.unwrap();
        let low = HeaderChainBuilder::on(&genesis).salt(3).build(1);
        assert_matches!(
            inserter.feed_header(&mut storage, &low[0]).await,
            Err(InsertError::Unsorted { height: 1, prev_height: 2 })
        );

        let orphan = HeaderChainBuilder::new(B256::repeat_byte(9), 5).build(1);
        assert_matches!(
            inserter.feed_header(&mut storage, &orphan[0]).await,
            Err(InsertError::MissingParent { height: 5, .. })
        );
    }
}
