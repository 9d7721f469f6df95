//! Helpers for building header chains in tests.

use std::collections::HashSet;

use alloy_primitives::{B256, U256};

use crate::error::SealError;
use crate::types::{ChainSegment, Header, RawHeader};
use crate::verify::SealVerifier;

impl Header {
    pub fn dummy(parent_hash: B256, number: u64, difficulty: u64) -> Header {
        Header {
            parent_hash,
            number,
            difficulty: U256::from(difficulty),
            timestamp: 1_600_000_000 + number * 15,
            extra_data: Vec::new(),
        }
    }
}

impl RawHeader {
    pub fn dummy(parent_hash: B256, number: u64, difficulty: u64) -> RawHeader {
        RawHeader::from_header(Header::dummy(parent_hash, number, difficulty))
            .expect("dummy header encodes")
    }
}

impl ChainSegment {
    /// Segment from headers ordered parent to child.
    pub fn dummy(chain: &[RawHeader]) -> ChainSegment {
        ChainSegment {
            headers: chain.iter().rev().cloned().collect(),
        }
    }
}

/// Genesis header used by the in-memory fixtures.
pub fn genesis() -> Header {
    Header::dummy(B256::ZERO, 0, 1)
}

/// Builds linear runs of headers on top of a parent.
#[derive(Debug, Clone)]
pub struct HeaderChainBuilder {
    parent_hash: B256,
    parent_height: u64,
    difficulty: u64,
    salt: Option<u8>,
}

impl HeaderChainBuilder {
    /// Chain whose first header sits at `parent_height + 1` on top of `parent_hash`.
    pub fn new(parent_hash: B256, parent_height: u64) -> Self {
        Self {
            parent_hash,
            parent_height,
            difficulty: 1,
            salt: None,
        }
    }

    /// Chain continuing from `parent`.
    pub fn on(parent: &RawHeader) -> Self {
        Self::new(*parent.hash(), parent.number())
    }

    pub fn on_header(parent: &Header) -> Self {
        Self::new(parent.hash(), parent.number)
    }

    pub fn difficulty(mut self, difficulty: u64) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Distinguishes forks built on the same parent.
    pub fn salt(mut self, salt: u8) -> Self {
        self.salt = Some(salt);
        self
    }

    /// `count` headers ordered parent to child.
    pub fn build(&self, count: usize) -> Vec<RawHeader> {
        let mut chain = Vec::with_capacity(count);
        let mut parent_hash = self.parent_hash;
        for i in 1..=count as u64 {
            let mut header = Header::dummy(parent_hash, self.parent_height + i, self.difficulty);
            if let Some(salt) = self.salt {
                header.extra_data = vec![salt];
            }
            let raw = RawHeader::from_header(header).expect("dummy header encodes");
            parent_hash = *raw.hash();
            chain.push(raw);
        }
        chain
    }
}

/// Rejects the seal of every listed hash.
#[derive(Debug, Default, Clone)]
pub struct RejectHashes(pub HashSet<B256>);

impl SealVerifier for RejectHashes {
    fn verify_seal(&self, header: &Header) -> Result<(), SealError> {
        if self.0.contains(&header.hash()) {
            return Err(SealError(format!("rejected header at height {}", header.number)));
        }
        Ok(())
    }
}
