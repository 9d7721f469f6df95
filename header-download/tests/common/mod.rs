//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use header_download::test_utils::genesis;
use header_download::{HeaderDownload, PeerId, RawHeader};

pub const PEER: PeerId = [0xaa; 64];

pub fn genesis_raw() -> RawHeader {
    RawHeader::from_header(genesis()).expect("genesis encodes")
}

/// Every tip reachable from an anchor or a persisted tip, so none is orphaned.
pub fn assert_no_orphans(forest: &HeaderDownload, all: &[RawHeader]) {
    for header in all {
        let Some(tip) = forest.tip(header.hash()) else {
            continue;
        };
        let mut current = tip;
        let mut steps = 0usize;
        loop {
            if current.is_persisted() || forest.anchor(current.parent_hash()).is_some() {
                break;
            }
            current = forest
                .tip(current.parent_hash())
                .unwrap_or_else(|| panic!("tip at {} has no root", tip.height()));
            steps += 1;
            assert!(steps <= all.len(), "cycle above {}", tip.height());
        }
    }
}
