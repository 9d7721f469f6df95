use alloy_primitives::B256;

use super::HeaderDownload;
use crate::error::StructuralError;
use crate::types::{ChainSegment, PeerId};

/// What `process_segment` did with a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Filled the gap between an existing tip and an anchor; the anchor is gone.
    Connected,
    /// Grew an anchored subtree into the past; the anchor moved down.
    ExtendedDown,
    /// Grew forward from an existing tip.
    ExtendedUp,
    /// Started a new subtree under a new or existing anchor.
    NewAnchor,
    /// Nothing new: the segment's first header is already a tip.
    Duplicate,
    /// Above the hard tips while storage has not reached them yet.
    Deferred,
}

/// Where the lowest header of a materialized run is hooked in.
#[derive(Debug, Clone, Copy)]
enum Attachment {
    Tip(B256),
    Anchor(B256),
}

impl HeaderDownload {
    /// Attach one segment to the forest.
    ///
    /// On error the segment is dropped and the forest is unchanged.
    pub fn process_segment(
        &mut self,
        segment: &ChainSegment,
        new_block: bool,
        peer: PeerId,
    ) -> Result<ProcessOutcome, StructuralError> {
        let Some(highest) = segment.highest() else {
            return Ok(ProcessOutcome::Duplicate);
        };
        if new_block {
            self.update_top_seen_height(highest.number());
        }

        let (found_anchor, start) = self.find_anchor(segment);
        let Some((found_tip, end)) = self.find_tip(segment, start) else {
            tracing::trace!("duplicate segment at {}", segment.headers[start].number());
            return Ok(ProcessOutcome::Duplicate);
        };

        let new_tips = end - start;
        let in_flight = self.in_flight_tips();
        if in_flight + new_tips > self.config.tip_limit {
            tracing::warn!(
                "[{}] dropping segment {}-{}: {} tips in flight, limit {}",
                self.config.log_prefix,
                segment.headers[end - 1].number(),
                segment.headers[start].number(),
                in_flight,
                self.config.tip_limit
            );
            return Err(StructuralError::TipLimitExceeded {
                in_flight,
                new: new_tips,
                limit: self.config.tip_limit,
            });
        }

        let lowest = segment.headers[end - 1].number();
        let max_hard_tip_height = self.max_hard_tip_height();
        if lowest > max_hard_tip_height && self.highest_in_db < max_hard_tip_height {
            tracing::debug!(
                "deferring segment from {}: storage at {} has not reached hard tips at {}",
                lowest,
                self.highest_in_db,
                max_hard_tip_height
            );
            return Ok(ProcessOutcome::Deferred);
        }

        let outcome = match (found_anchor, found_tip) {
            (true, true) => self.connect(segment, start, end, peer).map(|_| ProcessOutcome::Connected),
            (true, false) => self.extend_down(segment, start, end, peer).map(|_| ProcessOutcome::ExtendedDown),
            (false, true) => self.extend_up(segment, start, end, peer).map(|_| ProcessOutcome::ExtendedUp),
            (false, false) => self.new_anchor(segment, start, end, peer).map(|_| ProcessOutcome::NewAnchor),
        }?;
        tracing::trace!(
            "{:?} {}-{}, {} anchors, {} tips",
            outcome,
            lowest,
            segment.headers[start].number(),
            self.anchors.len(),
            self.tips.len()
        );
        Ok(outcome)
    }

    /// Index of the first header, from the child end, that an anchor waits for.
    fn find_anchor(&self, segment: &ChainSegment) -> (bool, usize) {
        segment
            .headers
            .iter()
            .position(|header| self.anchors.contains_key(header.hash()))
            .map_or((false, 0), |start| (true, start))
    }

    /// Exclusive end of the run starting at `start` whose lowest header's parent is a tip.
    ///
    /// `None` when the header at `start` is already a tip.
    fn find_tip(&self, segment: &ChainSegment, start: usize) -> Option<(bool, usize)> {
        if self.tips.contains_key(segment.headers[start].hash()) {
            return None;
        }
        let found = segment.headers[start..]
            .iter()
            .position(|header| self.tips.contains_key(header.parent_hash()))
            .map(|offset| start + offset + 1);
        Some(found.map_or((false, segment.len()), |end| (true, end)))
    }

    /// The tip `segment.headers[end - 1]` attaches to, checked for being open to new children.
    fn attachment_tip(&self, segment: &ChainSegment, end: usize) -> Result<(B256, bool), StructuralError> {
        let hash = *segment.headers[end - 1].parent_hash();
        let tip = self.tips.get(&hash).ok_or(StructuralError::AttachmentTipNotFound(hash))?;
        if tip.preverified && !tip.next.is_empty() {
            return Err(StructuralError::PreverifiedWithChildren {
                height: tip.height(),
            });
        }
        Ok((hash, tip.persisted))
    }

    fn anchor_preverified(&self, roots: &[B256]) -> bool {
        roots.iter().any(|hash| self.tips.get(hash).is_some_and(|tip| tip.preverified))
    }

    fn connect(
        &mut self,
        segment: &ChainSegment,
        start: usize,
        end: usize,
        peer: PeerId,
    ) -> Result<(), StructuralError> {
        let (attachment, attachment_persisted) = self.attachment_tip(segment, end)?;
        let top = *segment.headers[start].hash();
        let anchor = self.anchors.remove(&top).ok_or(StructuralError::AnchorNotFound(top))?;
        let anchor_preverified = self.anchor_preverified(&anchor.tips);

        self.materialize(segment, start, end, Attachment::Tip(attachment), peer);
        if self.adopt_children(&top, anchor.tips) && anchor_preverified {
            self.mark_preverified(&top);
        }
        if attachment_persisted {
            self.queue_for_insert(*segment.headers[end - 1].hash());
        }
        self.pending_hard_tips.remove(&top);
        tracing::debug!(
            "connected {}-{} to anchored subtree",
            segment.headers[end - 1].number(),
            segment.headers[start].number()
        );
        Ok(())
    }

    fn extend_down(
        &mut self,
        segment: &ChainSegment,
        start: usize,
        end: usize,
        peer: PeerId,
    ) -> Result<(), StructuralError> {
        let top = *segment.headers[start].hash();
        let lowest = &segment.headers[end - 1];
        if lowest.number() == 0 {
            return Err(StructuralError::GenesisSegment);
        }
        let old = self.anchors.remove(&top).ok_or(StructuralError::AnchorNotFound(top))?;
        let anchor_preverified = self.anchor_preverified(&old.tips);

        let new_key = *lowest.parent_hash();
        self.register_anchor(new_key, lowest.number(), old.peer);
        self.materialize(segment, start, end, Attachment::Anchor(new_key), peer);
        if self.adopt_children(&top, old.tips) && anchor_preverified {
            self.mark_preverified(&top);
        }
        tracing::debug!("anchor moved down from {} to {}", old.block_height, lowest.number());
        Ok(())
    }

    fn extend_up(
        &mut self,
        segment: &ChainSegment,
        start: usize,
        end: usize,
        peer: PeerId,
    ) -> Result<(), StructuralError> {
        let (attachment, attachment_persisted) = self.attachment_tip(segment, end)?;
        self.materialize(segment, start, end, Attachment::Tip(attachment), peer);
        if attachment_persisted {
            self.queue_for_insert(*segment.headers[end - 1].hash());
        }
        Ok(())
    }

    fn new_anchor(
        &mut self,
        segment: &ChainSegment,
        start: usize,
        end: usize,
        peer: PeerId,
    ) -> Result<(), StructuralError> {
        let lowest = &segment.headers[end - 1];
        if lowest.number() == 0 {
            return Err(StructuralError::GenesisSegment);
        }
        if lowest.number() < self.highest_in_db {
            return Err(StructuralError::AnchorTooFarInPast {
                height: lowest.number(),
                highest_in_db: self.highest_in_db,
            });
        }
        let key = *lowest.parent_hash();
        if !self.anchors.contains_key(&key) && self.anchors.len() >= self.config.anchor_limit {
            return Err(StructuralError::TooManyAnchors {
                count: self.anchors.len(),
                limit: self.config.anchor_limit,
            });
        }

        if !self.register_anchor(key, lowest.number(), peer) {
            tracing::trace!("reusing anchor at {}", lowest.number());
        }
        self.materialize(segment, start, end, Attachment::Anchor(key), peer);
        Ok(())
    }

    /// Hang an anchor's former roots under the tip that replaced it.
    ///
    /// Returns `false` when that tip was pruned meanwhile; the roots are removed with it.
    fn adopt_children(&mut self, parent: &B256, roots: Vec<B256>) -> bool {
        match self.tips.get_mut(parent) {
            Some(tip) => {
                tip.next.extend(roots);
                true
            }
            None => {
                self.remove_upwards(roots);
                false
            }
        }
    }

    /// Add `segment.headers[start..end]` as a chain of tips, lowest first, hooked under
    /// `attachment`. Hard tips met on the way are preverified.
    ///
    /// Any other anchor waiting for one of the new tips is dissolved and its roots hang
    /// under that tip.
    fn materialize(
        &mut self,
        segment: &ChainSegment,
        start: usize,
        end: usize,
        attachment: Attachment,
        peer: PeerId,
    ) {
        let mut prev: Option<B256> = None;
        let mut absorbed = Vec::new();
        for header in segment.headers[start..end].iter().rev() {
            let hash = *header.hash();
            self.tips.insert(hash, super::Tip::new(header.clone(), peer));
            if let Some(anchor) = self.anchors.remove(&hash) {
                absorbed.push((hash, anchor.tips));
            }

            let siblings = match (prev, attachment) {
                (Some(parent), _) | (None, Attachment::Tip(parent)) => {
                    self.tips.get_mut(&parent).map(|tip| &mut tip.next)
                }
                (None, Attachment::Anchor(key)) => self.anchors.get_mut(&key).map(|anchor| &mut anchor.tips),
            };
            if let Some(siblings) = siblings {
                siblings.push(hash);
            }

            if self.hard_tips.contains(&hash) {
                self.pending_hard_tips.remove(&hash);
                self.mark_preverified(&hash);
            }
            prev = Some(hash);
        }

        for (hash, roots) in absorbed {
            let preverified_root =
                roots.iter().copied().find(|root| self.tips.get(root).is_some_and(|tip| tip.preverified));
            if !self.adopt_children(&hash, roots) {
                continue;
            }
            tracing::debug!("absorbed anchor waiting for {}", hash);
            if let Some(root) = preverified_root {
                self.preverify_path(hash, Some(root));
            }
        }
    }
}
