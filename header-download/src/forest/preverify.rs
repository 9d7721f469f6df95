use alloy_primitives::B256;

use super::HeaderDownload;

impl HeaderDownload {
    /// Mark the tip and its ancestors as preverified, stopping at the first one that
    /// already is.
    ///
    /// Along the walk every sibling branch off the path is removed, so preverified
    /// history never forks. Calling it again on the same tip changes nothing.
    pub fn mark_preverified(&mut self, hash: &B256) {
        self.preverify_path(*hash, None);
    }

    /// Walk down from `current`, keeping only `keep` among its children.
    pub(super) fn preverify_path(&mut self, current: B256, keep: Option<B256>) {
        let mut prev = keep;
        let mut current = current;
        loop {
            let Some(tip) = self.tips.get_mut(&current) else {
                break;
            };
            if tip.preverified {
                break;
            }
            tip.preverified = true;

            let mut pruned = Vec::new();
            if let Some(keep) = prev {
                if tip.next.len() > 1 {
                    pruned = tip.next.iter().copied().filter(|child| *child != keep).collect();
                    tip.next = vec![keep];
                }
            }
            let parent = *tip.parent_hash();

            if !pruned.is_empty() {
                let removed = self.remove_upwards(pruned);
                tracing::debug!("pruned {} tips off preverified chain", removed);
            }
            prev = Some(current);
            current = parent;
        }
    }
}
