//! In-memory storage implementation.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{B256, U256};
use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::storage::{HEADERS_STAGE, HeaderStorage};
use crate::types::{Header, RawHeader};

/// In-memory header store.
#[derive(Debug, Default)]
pub struct MemoryHeaderStorage {
    headers: HashMap<(u64, B256), Vec<u8>>,
    canonical: BTreeMap<u64, B256>,
    total_difficulty: HashMap<(u64, B256), U256>,
    head: Option<B256>,
    progress: HashMap<String, u64>,
}

impl MemoryHeaderStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding only `genesis` as the canonical head.
    ///
    /// The genesis total difficulty is its own difficulty.
    pub fn with_genesis(genesis: Header) -> StorageResult<Self> {
        if genesis.number != 0 {
            return Err(StorageError::InconsistentState(format!(
                "genesis must be at height 0, got {}",
                genesis.number
            )));
        }
        let genesis = RawHeader::from_header(genesis)?;
        let hash = *genesis.hash();

        let mut storage = Self::new();
        storage.headers.insert((0, hash), genesis.raw);
        storage.canonical.insert(0, hash);
        storage.total_difficulty.insert((0, hash), genesis.hashed.header().difficulty);
        storage.head = Some(hash);
        storage.progress.insert(HEADERS_STAGE.to_string(), 0);
        Ok(storage)
    }

    /// Canonical hashes in ascending height order.
    pub fn canonical_chain(&self) -> Vec<(u64, B256)> {
        self.canonical.iter().map(|(height, hash)| (*height, *hash)).collect()
    }

    pub fn contains_header(&self, hash: &B256, height: u64) -> bool {
        self.headers.contains_key(&(height, *hash))
    }
}

#[async_trait]
impl HeaderStorage for MemoryHeaderStorage {
    async fn read_header(&self, hash: &B256, height: u64) -> StorageResult<Option<Header>> {
        self.headers.get(&(height, *hash)).map(|raw| Header::decode(raw)).transpose()
    }

    async fn read_canonical_hash(&self, height: u64) -> StorageResult<Option<B256>> {
        Ok(self.canonical.get(&height).copied())
    }

    async fn write_canonical_hash(&mut self, height: u64, hash: B256) -> StorageResult<()> {
        self.canonical.insert(height, hash);
        Ok(())
    }

    async fn truncate_canonical_hashes(&mut self, from: u64) -> StorageResult<()> {
        self.canonical.split_off(&from);
        Ok(())
    }

    async fn read_head_header_hash(&self) -> StorageResult<Option<B256>> {
        Ok(self.head)
    }

    async fn write_head_header_hash(&mut self, hash: B256) -> StorageResult<()> {
        self.head = Some(hash);
        Ok(())
    }

    async fn read_total_difficulty(&self, hash: &B256, height: u64) -> StorageResult<Option<U256>> {
        Ok(self.total_difficulty.get(&(height, *hash)).copied())
    }

    async fn write_total_difficulty(&mut self, hash: B256, height: u64, td: U256) -> StorageResult<()> {
        self.total_difficulty.insert((height, hash), td);
        Ok(())
    }

    async fn write_header(&mut self, height: u64, hash: B256, raw: &[u8]) -> StorageResult<()> {
        self.headers.insert((height, hash), raw.to_vec());
        Ok(())
    }

    async fn save_progress(&mut self, stage: &str, height: u64) -> StorageResult<()> {
        self.progress.insert(stage.to_string(), height);
        Ok(())
    }

    async fn get_progress(&self, stage: &str) -> StorageResult<u64> {
        Ok(self.progress.get(stage).copied().unwrap_or(0))
    }
}
