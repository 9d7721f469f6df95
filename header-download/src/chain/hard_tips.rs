//! Hard-coded tips are trusted headers compiled into the binary. A segment that leads
//! to one of them is preverified and skips seal verification.

use std::collections::HashSet;

use alloy_primitives::B256;

use crate::config::Network;
use crate::error::{HardTipsError, StorageResult};
use crate::types::Header;

// These files must exist in the hard_tips directory, even if they only hold comments.
const MAINNET_TIPS: &str = include_str!("../../hard_tips/mainnet.tips");
const TESTNET_TIPS: &str = include_str!("../../hard_tips/testnet.tips");

fn table(network: Network) -> &'static str {
    match network {
        Network::Mainnet => MAINNET_TIPS,
        Network::Testnet => TESTNET_TIPS,
        // Regtest chains are created locally and have nothing to trust
        Network::Regtest => "",
    }
}

/// Hashes of trusted headers and the highest of their heights.
#[derive(Debug, Clone, Default)]
pub struct HardTips {
    hashes: HashSet<B256>,
    max_height: u64,
}

impl HardTips {
    /// Load the compiled-in table for `network`.
    pub fn for_network(network: Network) -> Result<Self, HardTipsError> {
        Ok(Self::from_headers(decode_table(table(network))?))
    }

    pub fn from_headers(headers: impl IntoIterator<Item = Header>) -> Self {
        let mut tips = Self::default();
        for header in headers {
            tips.max_height = tips.max_height.max(header.number);
            tips.hashes.insert(header.hash());
        }
        tips
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.hashes.contains(hash)
    }

    /// Highest height among the tips, zero for an empty table.
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    pub fn hashes(&self) -> impl Iterator<Item = &B256> {
        self.hashes.iter()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Decode a table of hex encoded raw headers, one per line.
pub fn decode_table(table: &str) -> Result<Vec<Header>, HardTipsError> {
    table
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(index, line)| {
            let bytes = hex::decode(line).map_err(|e| HardTipsError::Hex {
                index,
                reason: e.to_string(),
            })?;
            Header::decode(&bytes).map_err(|source| HardTipsError::Decode {
                index,
                source,
            })
        })
        .collect()
}

/// Encode headers into the table format read by [`decode_table`].
pub fn encode_table(headers: &[Header]) -> StorageResult<String> {
    let mut table = String::new();
    for header in headers {
        table.push_str(&hex::encode(header.encode()?));
        table.push('\n');
    }
    Ok(table)
}
