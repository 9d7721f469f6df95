//! Common type definitions for the header downloader.

use std::fmt;

use alloy_primitives::{B256, Keccak256, U256};
use bincode::{Decode, Encode};
use thiserror::Error;

use crate::error::{StorageError, StorageResult};

/// Identifier of the peer that delivered a header batch.
pub type PeerId = [u8; 64];

/// Block header as seen by the downloader.
///
/// Only the fields the forest needs are decoded: the parent link, the height and
/// the difficulty that feeds total difficulty. Everything else a chain carries is
/// opaque to this crate and travels in `extra_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: B256,
    pub number: u64,
    pub difficulty: U256,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
}

/// Fixed-layout record used for the raw header bytes.
#[derive(Encode, Decode)]
struct HeaderRecord {
    parent_hash: [u8; 32],
    number: u64,
    difficulty: [u8; 32],
    timestamp: u64,
    extra_data: Vec<u8>,
}

impl Header {
    /// Keccak-256 over the identifying fields of the header.
    pub fn hash(&self) -> B256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.parent_hash);
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.difficulty.to_be_bytes::<32>());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(&self.extra_data);
        hasher.finalize()
    }

    /// Encode the header into the raw bytes kept in storage.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let record = HeaderRecord {
            parent_hash: self.parent_hash.0,
            number: self.number,
            difficulty: self.difficulty.to_be_bytes::<32>(),
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
        };
        bincode::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StorageError::Codec(e.to_string()))
    }

    /// Decode a header from its raw bytes.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let (record, read): (HeaderRecord, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StorageError::Codec(e.to_string()))?;
        if read != bytes.len() {
            return Err(StorageError::Codec(format!(
                "{} trailing bytes after header",
                bytes.len() - read
            )));
        }
        Ok(Self {
            parent_hash: B256::from(record.parent_hash),
            number: record.number,
            difficulty: U256::from_be_bytes(record.difficulty),
            timestamp: record.timestamp,
            extra_data: record.extra_data,
        })
    }
}

/// A header together with its cached hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedHeader {
    header: Header,
    hash: B256,
}

impl HashedHeader {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn hash(&self) -> &B256 {
        &self.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> &B256 {
        &self.header.parent_hash
    }

    pub fn into_header(self) -> Header {
        self.header
    }
}

impl From<Header> for HashedHeader {
    fn from(header: Header) -> Self {
        let hash = header.hash();
        Self {
            header,
            hash,
        }
    }
}

/// A hashed header paired with the raw bytes it arrived as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub hashed: HashedHeader,
    pub raw: Vec<u8>,
}

impl RawHeader {
    /// Build from a decoded header, producing its raw encoding.
    pub fn from_header(header: Header) -> StorageResult<Self> {
        let raw = header.encode()?;
        Ok(Self {
            hashed: HashedHeader::from(header),
            raw,
        })
    }

    /// Build from raw bytes received from a peer.
    pub fn decode(raw: Vec<u8>) -> StorageResult<Self> {
        let header = Header::decode(&raw)?;
        Ok(Self {
            hashed: HashedHeader::from(header),
            raw,
        })
    }

    pub fn hash(&self) -> &B256 {
        self.hashed.hash()
    }

    pub fn number(&self) -> u64 {
        self.hashed.number()
    }

    pub fn parent_hash(&self) -> &B256 {
        self.hashed.parent_hash()
    }
}

/// Contiguous run of headers ordered from child to parent.
///
/// `headers[i].parent_hash() == headers[i + 1].hash()` for every adjacent pair,
/// and the sequence is never empty once produced by the segmenter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSegment {
    pub headers: Vec<RawHeader>,
}

impl ChainSegment {
    /// Highest header of the segment.
    pub fn highest(&self) -> Option<&RawHeader> {
        self.headers.first()
    }

    /// Lowest header of the segment, whose parent is outside the segment.
    pub fn lowest(&self) -> Option<&RawHeader> {
        self.headers.last()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Range request handed to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRequest {
    /// Hash of the first requested header, when the request is anchored on a hash.
    pub hash: Option<B256>,
    /// Height of the first requested header.
    pub number: u64,
    pub length: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl fmt::Display for HeaderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hash) = self.hash {
            write!(f, "hash={} ", hash)?;
        }
        write!(
            f,
            "number={} length={} skip={} reverse={}",
            self.number, self.length, self.skip, self.reverse
        )
    }
}

/// Peer misbehaviour detected while handling its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Penalty {
    #[error("header is in the bad header set")]
    BadBlock,

    #[error("duplicate header in batch")]
    DuplicateHeader,

    #[error("child height is not parent height + 1")]
    WrongChildBlockHeight,

    #[error("invalid header seal")]
    InvalidSeal,

    #[error("anchor ancestors never delivered")]
    AbandonedAnchor,
}

/// Penalty attributed to a specific peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyItem {
    pub peer: PeerId,
    pub penalty: Penalty,
}

/// Snapshot of the forest counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForestStats {
    /// Number of registered anchors.
    pub anchors: usize,
    /// Number of tips in the hash index, persisted or not.
    pub tips: usize,
    /// Tips not yet written to storage.
    pub in_flight_tips: usize,
    /// Persisted tips still kept in memory.
    pub persisted_tips: usize,
    /// Hard-coded tips not yet seen in any segment.
    pub pending_hard_tips: usize,
    pub highest_in_db: u64,
    pub top_seen_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = Header::dummy(B256::ZERO, 7, 3);
        let bytes = header.encode().unwrap();
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn test_header_decode_rejects_trailing_bytes() {
        let mut bytes = Header::dummy(B256::ZERO, 1, 0).encode().unwrap();
        bytes.push(0);
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn test_hash_covers_extra_data() {
        let a = Header::dummy(B256::ZERO, 1, 0);
        let mut b = a.clone();
        b.extra_data = vec![1];
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_segment_ends() {
        let chain = crate::test_utils::HeaderChainBuilder::new(B256::ZERO, 10).build(3);
        let segment = ChainSegment {
            headers: chain.iter().rev().cloned().collect(),
        };
        assert_eq!(segment.highest().unwrap().number(), 13);
        assert_eq!(segment.lowest().unwrap().number(), 11);
        assert_eq!(segment.len(), 3);
    }

    #[test]
    fn test_request_display() {
        let request = HeaderRequest {
            hash: None,
            number: 100,
            length: 192,
            skip: 0,
            reverse: true,
        };
        assert_eq!(request.to_string(), "number=100 length=192 skip=0 reverse=true");
    }
}
