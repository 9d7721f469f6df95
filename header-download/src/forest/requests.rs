use std::time::Duration;

use super::HeaderDownload;
use crate::types::{HeaderRequest, Penalty, PenaltyItem};

/// Whole seconds until an anchor is due again, never zero.
fn retry_delay_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

impl HeaderDownload {
    /// Next backward request for the anchor that has waited longest, with `now` in seconds.
    ///
    /// An anchor that already timed out `max_timeouts` times is abandoned instead: it is
    /// removed along with its subtree and the peer that created it is penalised. Returns
    /// no request when no anchor is due yet.
    pub fn request_more_headers(
        &mut self,
        now: u64,
        timeout: Duration,
    ) -> (Option<HeaderRequest>, Vec<PenaltyItem>) {
        let mut penalties = Vec::new();
        while let Some(entry) = self.anchor_queue.peek().copied() {
            let live = self
                .anchors
                .get(&entry.parent_hash)
                .is_some_and(|anchor| anchor.id == entry.id && anchor.timestamp == entry.timestamp);
            if !live {
                self.anchor_queue.pop();
                continue;
            }
            if entry.timestamp > now {
                return (None, penalties);
            }
            self.anchor_queue.pop();

            let Some(anchor) = self.anchors.get_mut(&entry.parent_hash) else {
                continue;
            };
            if anchor.timeouts >= self.config.max_timeouts {
                let peer = anchor.peer;
                let height = anchor.block_height;
                let removed = self.invalidate_anchor(&entry.parent_hash);
                tracing::warn!(
                    "[{}] abandoned anchor at {} after {} timeouts, removed {} tips",
                    self.config.log_prefix,
                    height,
                    self.config.max_timeouts,
                    removed
                );
                penalties.push(PenaltyItem {
                    peer,
                    penalty: Penalty::AbandonedAnchor,
                });
                continue;
            }

            anchor.timeouts += 1;
            anchor.timestamp = now + retry_delay_secs(timeout);
            let request = HeaderRequest {
                hash: Some(anchor.parent_hash),
                number: anchor.block_height.saturating_sub(1),
                length: self.config.request_length,
                skip: 0,
                reverse: true,
            };
            let requeued = anchor.queue_entry();
            self.anchor_queue.push(requeued);
            return (Some(request), penalties);
        }
        (None, penalties)
    }

    /// Wide forward request probing the chain between storage and the top seen height.
    ///
    /// Only issued while the forest has few anchors.
    pub fn request_skeleton(&self) -> Option<HeaderRequest> {
        if self.anchors.len() > self.config.skeleton_anchor_threshold {
            return None;
        }
        let stride = self.config.skeleton_stride;
        let gap = self.top_seen_height.saturating_sub(self.highest_in_db);
        let length = (gap / stride).min(self.config.request_length);
        if length == 0 {
            return None;
        }
        Some(HeaderRequest {
            hash: None,
            number: self.highest_in_db + stride,
            length,
            skip: stride,
            reverse: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;

    use super::*;
    use crate::config::DownloadConfig;
    use crate::test_utils::HeaderChainBuilder;
    use crate::types::{ChainSegment, PeerId};

    const PEER: PeerId = [8u8; 64];
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_request_targets_anchor_parent() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        let chain = HeaderChainBuilder::new(B256::repeat_byte(6), 99).build(2);
        forest.process_segment(&ChainSegment::dummy(&chain), false, PEER).unwrap();

        let (request, penalties) = forest.request_more_headers(1000, TIMEOUT);

        assert!(penalties.is_empty());
        assert_eq!(
            request,
            Some(HeaderRequest {
                hash: Some(B256::repeat_byte(6)),
                number: 99,
                length: 192,
                skip: 0,
                reverse: true,
            })
        );
        // Not due again until the timeout passes
        assert_eq!(forest.request_more_headers(1004, TIMEOUT).0, None);
        assert!(forest.request_more_headers(1005, TIMEOUT).0.is_some());
    }

    #[test]
    fn test_sub_second_timeout_still_waits() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        let chain = HeaderChainBuilder::new(B256::repeat_byte(6), 99).build(3);
        forest.process_segment(&ChainSegment::dummy(&chain), false, PEER).unwrap();

        let mut requests = 0;
        for _ in 0..20 {
            let (request, penalties) = forest.request_more_headers(1000, Duration::from_millis(500));
            assert!(penalties.is_empty());
            requests += usize::from(request.is_some());
        }

        assert_eq!(requests, 1);
        assert_eq!(forest.anchor(&B256::repeat_byte(6)).unwrap().timeouts(), 1);
        assert_eq!(forest.tip_count(), 3);
        assert!(forest.request_more_headers(1001, Duration::from_millis(500)).0.is_some());
    }

    #[test]
    fn test_retry_delay_rounds_up() {
        assert_eq!(retry_delay_secs(Duration::ZERO), 1);
        assert_eq!(retry_delay_secs(Duration::from_millis(500)), 1);
        assert_eq!(retry_delay_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_delay_secs(Duration::from_secs(5)), 5);
    }

    #[test]
    fn test_no_anchors_no_request() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        assert_eq!(forest.request_more_headers(0, TIMEOUT), (None, Vec::new()));
    }

    #[test]
    fn test_moved_anchor_leaves_stale_entry() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        let chain = HeaderChainBuilder::new(B256::repeat_byte(6), 99).build(4);
        forest.process_segment(&ChainSegment::dummy(&chain[2..]), false, PEER).unwrap();
        forest.process_segment(&ChainSegment::dummy(&chain[..2]), false, PEER).unwrap();

        let (request, _) = forest.request_more_headers(0, TIMEOUT);
        assert_eq!(request.and_then(|r| r.hash), Some(B256::repeat_byte(6)));
        assert_eq!(forest.request_more_headers(0, TIMEOUT).0, None);
    }

    #[test]
    fn test_skeleton_needs_gap_and_few_anchors() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        assert_eq!(forest.request_skeleton(), None);

        forest.update_top_seen_height(192 * 3 + 10);
        assert_eq!(
            forest.request_skeleton(),
            Some(HeaderRequest {
                hash: None,
                number: 192,
                length: 3,
                skip: 192,
                reverse: false,
            })
        );

        for i in 0..5u8 {
            let chain = HeaderChainBuilder::new(B256::repeat_byte(i + 1), 100 * (i as u64 + 1)).build(1);
            forest.process_segment(&ChainSegment::dummy(&chain), false, PEER).unwrap();
        }
        assert_eq!(forest.request_skeleton(), None);
    }

    #[test]
    fn test_skeleton_length_is_capped() {
        let mut forest = HeaderDownload::new(DownloadConfig::regtest());
        forest.update_top_seen_height(192 * 1000);
        assert_eq!(forest.request_skeleton().map(|r| r.length), Some(192));
    }
}
