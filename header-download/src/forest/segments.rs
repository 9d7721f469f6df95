use std::cmp::Ordering;
use std::collections::HashMap;

use alloy_primitives::B256;

use super::HeaderDownload;
use crate::types::{ChainSegment, Penalty, RawHeader};

impl HeaderDownload {
    /// Split an unordered batch into maximal child-to-parent segments.
    ///
    /// The whole batch is rejected with a penalty when any header is known bad, any hash
    /// appears twice, or any header's height is not its parent's height plus one. A
    /// header with several children in the batch starts a new segment, so forks are
    /// never merged into one segment.
    pub fn split_into_segments(&self, mut headers: Vec<RawHeader>) -> Result<Vec<ChainSegment>, Penalty> {
        headers.sort_by(|a, b| match b.number().cmp(&a.number()) {
            Ordering::Equal => b.hash().cmp(a.hash()),
            other => other,
        });

        let mut heights: HashMap<B256, u64> = HashMap::with_capacity(headers.len());
        for header in &headers {
            if self.bad_headers.contains(header.hash()) {
                return Err(Penalty::BadBlock);
            }
            if heights.insert(*header.hash(), header.number()).is_some() {
                return Err(Penalty::DuplicateHeader);
            }
        }
        for header in &headers {
            if let Some(parent_height) = heights.get(header.parent_hash()) {
                if parent_height.checked_add(1) != Some(header.number()) {
                    return Err(Penalty::WrongChildBlockHeight);
                }
            }
        }

        let mut segments: Vec<ChainSegment> = Vec::new();
        // Keyed by parent hash: the segment its single child belongs to
        let mut segment_of_parent: HashMap<B256, usize> = HashMap::new();
        let mut children: HashMap<B256, usize> = HashMap::new();
        for header in headers {
            let hash = *header.hash();
            let index = match (children.get(&hash), segment_of_parent.get(&hash)) {
                (Some(1), Some(index)) => *index,
                _ => {
                    segments.push(ChainSegment::default());
                    segments.len() - 1
                }
            };
            let parent_hash = *header.parent_hash();
            segments[index].headers.push(header);
            segment_of_parent.insert(parent_hash, index);
            *children.entry(parent_hash).or_default() += 1;
        }

        Ok(segments)
    }
}
