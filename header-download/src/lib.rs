//! Proof-of-work header downloader.
//!
//! Peers answer header requests with batches that arrive out of order, overlap, fork,
//! and sometimes lie. This crate reconciles them into one canonical chain:
//!
//! - Batches are split into contiguous segments and attached to an in-memory forest
//!   of tips, with anchors marking the places where ancestors are still missing.
//! - The scheduler asks peers for the parents of anchors and for skeleton samples of
//!   the gap between storage and the highest height seen.
//! - Tips whose parent is stored are verified and written through a
//!   [`HeaderStorage`], which tracks total difficulty and rewrites canonical history
//!   when a heavier chain appears.
//! - Hard-coded tips let trusted history skip seal verification.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use header_download::{
//!     DownloadConfig, EventBus, HeaderSync, MemoryHeaderStorage, spawn_insert_loop,
//!     spawn_request_loop,
//! };
//! use header_download::verify::AcceptAll;
//! use tokio::sync::Mutex;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sync = HeaderSync::new(DownloadConfig::mainnet())?;
//!     sync.set_hard_coded_tips().await?;
//!
//!     let storage = MemoryHeaderStorage::new();
//!     sync.recover_from_db(&storage).await?;
//!
//!     let bus = EventBus::default();
//!     let cancel = CancellationToken::new();
//!     let requests = spawn_request_loop(sync.clone(), bus.clone(), cancel.clone());
//!     let inserts = spawn_insert_loop(
//!         sync.clone(),
//!         Arc::new(Mutex::new(storage)),
//!         Arc::new(AcceptAll),
//!         bus.clone(),
//!         cancel.clone(),
//!     );
//!
//!     // Feed peer responses with `sync.handle_headers(..)` and forward
//!     // `bus.subscribe()` events to the transport.
//!
//!     cancel.cancel();
//!     requests.await?;
//!     inserts.await??;
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod chain;
pub mod config;
pub mod error;
pub mod forest;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod types;
pub mod verify;

// Re-export main types for convenience
pub use chain::{HardTips, HeaderInserter};
pub use config::{DownloadConfig, Network};
pub use error::{
    ConfigError, HardTipsError, HeaderDownloadError, InsertError, InsertResult, LoggingError,
    LoggingResult, Result, SealError, StorageError, StorageResult, StructuralError,
};
pub use forest::{Anchor, HeaderDownload, InsertReport, ProcessOutcome, Tip};
pub use logging::{LogFileConfig, LoggingConfig, LoggingGuard, init_console_logging, init_logging};
pub use storage::{HeaderStorage, MemoryHeaderStorage};
pub use sync::{
    EventBus, EventError, EventReceiver, HandleReport, HeaderEvent, HeaderSync, spawn_insert_loop,
    spawn_request_loop,
};
pub use tracing::level_filters::LevelFilter;
pub use types::{
    ChainSegment, ForestStats, HashedHeader, Header, HeaderRequest, PeerId, Penalty, PenaltyItem,
    RawHeader,
};
pub use verify::SealVerifier;

/// Current version of the header-download library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
