//! Periodic loops around a [`HeaderSync`].
//!
//! The request loop polls the scheduler and emits [`HeaderEvent::Request`] for the
//! transport to send. The insert loop flushes ready tips into storage. Both stop when
//! their cancellation token fires.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::{EventBus, HeaderEvent, HeaderSync};
use crate::chain::HeaderInserter;
use crate::error::InsertResult;
use crate::storage::HeaderStorage;
use crate::verify::SealVerifier;

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Spawn the loop that turns due anchors and skeleton gaps into requests.
pub fn spawn_request_loop(
    sync: HeaderSync,
    bus: EventBus<HeaderEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sync.config().request_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("[{}] request loop stopped", sync.config().log_prefix);
                    break;
                }
                _ = ticker.tick() => request_round(&sync, &bus, unix_now()).await,
            }
        }
    })
}

/// One scheduler round: every due anchor, then at most one skeleton request.
pub(crate) async fn request_round(sync: &HeaderSync, bus: &EventBus<HeaderEvent>, now: u64) {
    let timeout = sync.config().request_timeout;
    // Each anchor is due at most once per round unless the timeout is zero
    for _ in 0..sync.config().anchor_limit {
        let (request, penalties) = sync.request_more_headers(now, timeout).await;
        for penalty in penalties {
            bus.emit(HeaderEvent::Penalize(penalty));
        }
        match request {
            Some(request) => {
                tracing::trace!("[{}] requesting {}", sync.config().log_prefix, request);
                bus.emit(HeaderEvent::Request(request));
            }
            None => break,
        }
    }

    if let Some(request) = sync.request_skeleton().await {
        tracing::trace!("[{}] skeleton {}", sync.config().log_prefix, request);
        bus.emit(HeaderEvent::Request(request));
    }
}

/// Spawn the loop that flushes ready tips into `storage`.
///
/// The task ends with the first insert error; a cancelled flush still writes the header
/// in progress.
pub fn spawn_insert_loop<S>(
    sync: HeaderSync,
    storage: Arc<Mutex<S>>,
    verifier: Arc<dyn SealVerifier>,
    bus: EventBus<HeaderEvent>,
    cancel: CancellationToken,
) -> JoinHandle<InsertResult<()>>
where
    S: HeaderStorage + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(sync.config().insert_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("[{}] insert loop stopped", sync.config().log_prefix);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let mut storage = storage.lock().await;
                    if let Err(e) = insert_round(&sync, &mut *storage, verifier.as_ref(), &bus, &cancel).await {
                        tracing::error!("[{}] insert loop failed: {}", sync.config().log_prefix, e);
                        return Err(e);
                    }
                }
            }
        }
    })
}

/// One flush through a fresh inserter, with its outcome broadcast.
pub(crate) async fn insert_round<S: HeaderStorage + ?Sized>(
    sync: &HeaderSync,
    storage: &mut S,
    verifier: &dyn SealVerifier,
    bus: &EventBus<HeaderEvent>,
    cancel: &CancellationToken,
) -> InsertResult<()> {
    let mut inserter = HeaderInserter::from_storage(sync.config().log_prefix.clone(), &*storage).await?;
    let report = sync.insert_headers(&mut inserter, storage, verifier, cancel).await?;

    for penalty in report.penalties {
        bus.emit(HeaderEvent::Penalize(penalty));
    }
    if report.inserted > 0 {
        bus.emit(HeaderEvent::HeadersInserted {
            inserted: report.inserted,
            highest_in_db: sync.progress().await,
        });
    }
    if inserter.unwind() {
        bus.emit(HeaderEvent::Unwind {
            unwind_point: inserter.unwind_point(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::B256;

    use super::*;
    use crate::config::DownloadConfig;
    use crate::storage::MemoryHeaderStorage;
    use crate::test_utils::{HeaderChainBuilder, genesis};
    use crate::types::{Penalty, RawHeader};
    use crate::verify::AcceptAll;

    const PEER: [u8; 64] = [6u8; 64];

    #[tokio::test]
    async fn test_request_round_emits_requests() {
        let sync = HeaderSync::new(DownloadConfig::regtest()).unwrap();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let a = HeaderChainBuilder::new(B256::repeat_byte(1), 10).build(1);
        let b = HeaderChainBuilder::new(B256::repeat_byte(2), 40).build(1);
        sync.handle_headers(a.into_iter().chain(b).collect(), false, PEER).await;

        request_round(&sync, &bus, 100).await;

        let mut requested = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                HeaderEvent::Request(request) => requested.push(request.number),
                other => panic!("unexpected event {:?}", other),
            }
        }
        requested.sort();
        assert_eq!(requested, vec![10, 40]);
    }

    #[tokio::test]
    async fn test_request_round_penalizes_abandoned_anchor() {
        let sync = HeaderSync::new(DownloadConfig::regtest().with_max_timeouts(1)).unwrap();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let chain = HeaderChainBuilder::new(B256::repeat_byte(1), 10).build(2);
        sync.handle_headers(chain, false, PEER).await;

        request_round(&sync, &bus, 0).await;
        assert!(matches!(rx.recv().await.unwrap(), HeaderEvent::Request(_)));

        request_round(&sync, &bus, 60).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            HeaderEvent::Penalize(crate::types::PenaltyItem {
                peer: PEER,
                penalty: Penalty::AbandonedAnchor,
            })
        );
        assert_eq!(sync.stats().await.tips, 0);
    }

    #[tokio::test]
    async fn test_insert_loop_flushes_and_stops() {
        let genesis = RawHeader::from_header(genesis()).unwrap();
        let storage = MemoryHeaderStorage::with_genesis(genesis.hashed.header().clone()).unwrap();
        let config = DownloadConfig::regtest().with_intervals(Duration::from_millis(10), Duration::from_millis(10));
        let sync = HeaderSync::new(config).unwrap();
        sync.recover_from_db(&storage).await.unwrap();
        let chain = HeaderChainBuilder::on(&genesis).build(3);
        sync.handle_headers(chain, false, PEER).await;

        let storage = Arc::new(Mutex::new(storage));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();
        let handle = spawn_insert_loop(sync.clone(), storage.clone(), Arc::new(AcceptAll), bus, cancel.clone());

        assert_eq!(
            rx.recv().await.unwrap(),
            HeaderEvent::HeadersInserted {
                inserted: 3,
                highest_in_db: 3,
            }
        );
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(storage.lock().await.canonical_chain().len(), 4);
    }
}
