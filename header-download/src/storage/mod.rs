//! Storage contract consumed by the inserter and by recovery.

pub mod memory;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::Header;

pub use memory::MemoryHeaderStorage;

/// Stage name under which header progress is saved.
pub const HEADERS_STAGE: &str = "Headers";

/// Durable header store.
///
/// Reads return `Ok(None)` for absent data. Implementations must not retry internally;
/// a failed write aborts the flush that issued it.
#[async_trait]
pub trait HeaderStorage: Send + Sync {
    /// Header with the given hash at the given height.
    async fn read_header(&self, hash: &B256, height: u64) -> StorageResult<Option<Header>>;

    /// Canonical hash at `height`.
    async fn read_canonical_hash(&self, height: u64) -> StorageResult<Option<B256>>;

    async fn write_canonical_hash(&mut self, height: u64, hash: B256) -> StorageResult<()>;

    /// Drop every canonical hash at `from` and above.
    async fn truncate_canonical_hashes(&mut self, from: u64) -> StorageResult<()>;

    async fn read_head_header_hash(&self) -> StorageResult<Option<B256>>;

    async fn write_head_header_hash(&mut self, hash: B256) -> StorageResult<()>;

    async fn read_total_difficulty(&self, hash: &B256, height: u64) -> StorageResult<Option<U256>>;

    async fn write_total_difficulty(&mut self, hash: B256, height: u64, td: U256) -> StorageResult<()>;

    /// Store the raw header bytes as received, without re-encoding.
    async fn write_header(&mut self, height: u64, hash: B256, raw: &[u8]) -> StorageResult<()>;

    async fn save_progress(&mut self, stage: &str, height: u64) -> StorageResult<()>;

    /// Saved progress of `stage`, zero when never saved.
    async fn get_progress(&self, stage: &str) -> StorageResult<u64>;
}
