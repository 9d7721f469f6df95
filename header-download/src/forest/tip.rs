use alloy_primitives::B256;

use crate::types::{PeerId, RawHeader};

/// A header accepted into the forest.
#[derive(Debug, Clone)]
pub struct Tip {
    pub(crate) header: RawHeader,
    /// Children, more than one where competing branches fork.
    pub(crate) next: Vec<B256>,
    pub(crate) preverified: bool,
    pub(crate) persisted: bool,
    /// Peer that delivered the header.
    pub(crate) peer: PeerId,
}

impl Tip {
    pub(crate) fn new(header: RawHeader, peer: PeerId) -> Self {
        Self {
            header,
            next: Vec::new(),
            preverified: false,
            persisted: false,
            peer,
        }
    }

    pub fn header(&self) -> &RawHeader {
        &self.header
    }

    pub fn hash(&self) -> &B256 {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.number()
    }

    pub fn parent_hash(&self) -> &B256 {
        self.header.parent_hash()
    }

    pub fn children(&self) -> &[B256] {
        &self.next
    }

    pub fn is_preverified(&self) -> bool {
        self.preverified
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}
