//! End-to-end header sync against the in-memory store.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use alloy_primitives::{B256, U256};
use header_download::storage::HEADERS_STAGE;
use header_download::test_utils::{HeaderChainBuilder, genesis};
use header_download::verify::{AcceptAll, SealVerifier};
use header_download::{
    DownloadConfig, EventBus, HeaderEvent, HeaderInserter, HeaderStorage, HeaderSync, InsertError,
    MemoryHeaderStorage, Penalty, ProcessOutcome, SealError, spawn_request_loop,
};
use tokio_util::sync::CancellationToken;

use common::{PEER, genesis_raw};

struct RejectHeights(HashSet<u64>);

impl SealVerifier for RejectHeights {
    fn verify_seal(&self, header: &header_download::Header) -> Result<(), SealError> {
        if self.0.contains(&header.number) {
            return Err(SealError(format!("bad seal at {}", header.number)));
        }
        Ok(())
    }
}

async fn setup(config: DownloadConfig) -> (HeaderSync, MemoryHeaderStorage) {
    let storage = MemoryHeaderStorage::with_genesis(genesis()).unwrap();
    let sync = HeaderSync::new(config).unwrap();
    sync.recover_from_db(&storage).await.unwrap();
    (sync, storage)
}

async fn flush(sync: &HeaderSync, storage: &mut MemoryHeaderStorage, verifier: &dyn SealVerifier) -> HeaderInserter {
    let mut inserter = HeaderInserter::from_storage("Headers", &*storage).await.unwrap();
    sync.insert_headers(&mut inserter, storage, verifier, &CancellationToken::new()).await.unwrap();
    inserter
}

#[tokio::test]
async fn test_out_of_order_batches_reach_storage() {
    let (sync, mut storage) = setup(DownloadConfig::regtest()).await;
    let headers = HeaderChainBuilder::on(&genesis_raw()).build(30);

    // Upper half first: nothing connects to storage yet
    let report = sync.handle_headers(headers[15..].to_vec(), true, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::NewAnchor]);
    assert_eq!(sync.top_seen_height().await, 30);
    flush(&sync, &mut storage, &AcceptAll).await;
    assert_eq!(storage.canonical_chain().len(), 1);

    let report = sync.handle_headers(headers[..15].to_vec(), false, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::Connected]);
    let inserter = flush(&sync, &mut storage, &AcceptAll).await;

    assert!(!inserter.unwind());
    assert_eq!(sync.progress().await, 30);
    assert_eq!(storage.get_progress(HEADERS_STAGE).await.unwrap(), 30);
    let canonical = storage.canonical_chain();
    assert_eq!(canonical.len(), 31);
    assert_eq!(canonical[30], (30, *headers[29].hash()));
    assert_eq!(sync.stats().await.anchors, 0);
}

#[tokio::test]
async fn test_heavier_fork_unwinds_canonical_chain() {
    let (sync, mut storage) = setup(DownloadConfig::regtest()).await;
    let main = HeaderChainBuilder::on_header(&genesis()).build(6);
    sync.handle_headers(main.clone(), false, PEER).await;
    flush(&sync, &mut storage, &AcceptAll).await;

    let fork = HeaderChainBuilder::on(&main[2]).difficulty(10).salt(3).build(2);
    let report = sync.handle_headers(fork.clone(), false, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::ExtendedUp]);
    let inserter = flush(&sync, &mut storage, &AcceptAll).await;

    assert!(inserter.unwind());
    assert_eq!(inserter.unwind_point(), 3);
    let canonical = storage.canonical_chain();
    assert_eq!(canonical.len(), 6);
    assert_eq!(canonical[3].1, *main[2].hash());
    assert_eq!(canonical[4].1, *fork[0].hash());
    assert_eq!(canonical[5].1, *fork[1].hash());
    assert_eq!(
        storage.read_total_difficulty(fork[1].hash(), 5).await.unwrap(),
        Some(U256::from(1 + 3 + 20))
    );
    // The lighter branch stays stored
    assert!(storage.contains_header(main[5].hash(), 6));
}

#[tokio::test]
async fn test_fork_anchor_inside_connected_segment_reaches_storage() {
    let (sync, mut storage) = setup(DownloadConfig::regtest()).await;
    let headers = HeaderChainBuilder::on(&genesis_raw()).build(8);
    let fork = HeaderChainBuilder::on(&headers[1]).salt(7).build(1);

    // The fork waits for header 2, the upper run for header 5
    let report = sync.handle_headers(fork.clone(), false, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::NewAnchor]);
    let report = sync.handle_headers(headers[5..].to_vec(), false, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::NewAnchor]);
    let report = sync.handle_headers(headers[..5].to_vec(), false, PEER).await;
    assert_eq!(report.outcomes, vec![ProcessOutcome::Connected]);
    assert_eq!(sync.stats().await.anchors, 0);

    let report = {
        let mut inserter = HeaderInserter::from_storage("Headers", &storage).await.unwrap();
        sync.insert_headers(&mut inserter, &mut storage, &AcceptAll, &CancellationToken::new()).await.unwrap()
    };

    assert_eq!(report.inserted, 9);
    assert_eq!(sync.progress().await, 8);
    assert_eq!(storage.canonical_chain().len(), 9);
    assert!(storage.contains_header(fork[0].hash(), 3));
}

#[tokio::test]
async fn test_rejected_seal_drops_subtree_and_penalizes() {
    let (sync, mut storage) = setup(DownloadConfig::regtest()).await;
    let headers = HeaderChainBuilder::on(&genesis_raw()).build(5);
    sync.handle_headers(headers.clone(), false, PEER).await;

    let mut inserter = HeaderInserter::from_storage("Headers", &storage).await.unwrap();
    let report = sync
        .insert_headers(&mut inserter, &mut storage, &RejectHeights(HashSet::from([3])), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.penalties.len(), 1);
    assert_eq!(report.penalties[0].penalty, Penalty::InvalidSeal);
    assert_eq!(sync.progress().await, 2);
    for header in &headers[2..] {
        assert!(!sync.has_tip(header.hash()).await);
    }
}

#[tokio::test]
async fn test_recover_after_restart() {
    let (sync, mut storage) = setup(DownloadConfig::regtest().with_persisted_tip_limit(4)).await;
    let headers = HeaderChainBuilder::on(&genesis_raw()).build(10);
    sync.handle_headers(headers.clone(), false, PEER).await;
    flush(&sync, &mut storage, &AcceptAll).await;

    let restarted = HeaderSync::new(DownloadConfig::regtest().with_persisted_tip_limit(4)).unwrap();
    restarted.recover_from_db(&storage).await.unwrap();

    assert_eq!(restarted.progress().await, 10);
    let stats = restarted.stats().await;
    assert_eq!(stats.persisted_tips, 4);
    assert_eq!(stats.in_flight_tips, 0);
    assert!(restarted.has_tip(headers[9].hash()).await);
    assert!(!restarted.has_tip(headers[5].hash()).await);

    // New headers extend the recovered head
    let more = HeaderChainBuilder::on(&headers[9]).build(3);
    assert_eq!(restarted.handle_headers(more, false, PEER).await.outcomes, vec![ProcessOutcome::ExtendedUp]);
    flush(&restarted, &mut storage, &AcceptAll).await;
    assert_eq!(storage.get_progress(HEADERS_STAGE).await.unwrap(), 13);
}

#[tokio::test]
async fn test_missing_parent_aborts_flush() {
    let (sync, mut storage) = setup(DownloadConfig::regtest()).await;
    let headers = HeaderChainBuilder::on(&genesis_raw()).build(3);
    sync.handle_headers(headers, false, PEER).await;

    // A store that lost genesis cannot accept its children
    let mut empty = MemoryHeaderStorage::new();
    let mut inserter = HeaderInserter::new("Headers", U256::from(1), 0);
    let result = sync.insert_headers(&mut inserter, &mut empty, &AcceptAll, &CancellationToken::new()).await;

    assert!(matches!(result, Err(InsertError::MissingParent { height: 0, .. })));
    assert_eq!(sync.progress().await, 0);

    // The failed header stays queued for the next flush
    flush(&sync, &mut storage, &AcceptAll).await;
    assert_eq!(storage.canonical_chain().len(), 4);
}

#[tokio::test]
async fn test_request_loop_asks_for_anchor_parent() {
    let config = DownloadConfig::regtest().with_intervals(Duration::from_millis(5), Duration::from_millis(5));
    let (sync, _storage) = setup(config).await;
    let orphan_parent = B256::repeat_byte(0x5a);
    let headers = HeaderChainBuilder::new(orphan_parent, 40).build(2);
    sync.handle_headers(headers, false, PEER).await;

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let cancel = CancellationToken::new();
    let handle = spawn_request_loop(sync.clone(), bus, cancel.clone());

    let event = rx.recv().await.unwrap();
    cancel.cancel();
    handle.await.unwrap();

    match event {
        HeaderEvent::Request(request) => {
            assert_eq!(request.hash, Some(orphan_parent));
            assert_eq!(request.number, 40);
            assert!(request.reverse);
        }
        other => panic!("unexpected event {}", other.description()),
    }
}
