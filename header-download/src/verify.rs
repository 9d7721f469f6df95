//! Seal verification seam.
//!
//! Proof-of-work or signature checks belong to the consensus engine of the host. The
//! downloader only asks whether a header that is not covered by a hard-coded tip has
//! a valid seal.

use alloy_primitives::U256;

use crate::error::SealError;
use crate::types::Header;

pub trait SealVerifier: Send + Sync {
    fn verify_seal(&self, header: &Header) -> Result<(), SealError>;
}

impl<F> SealVerifier for F
where
    F: Fn(&Header) -> Result<(), SealError> + Send + Sync,
{
    fn verify_seal(&self, header: &Header) -> Result<(), SealError> {
        self(header)
    }
}

/// Accepts every header.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl SealVerifier for AcceptAll {
    fn verify_seal(&self, _header: &Header) -> Result<(), SealError> {
        Ok(())
    }
}

/// Rejects headers whose difficulty is below a floor.
#[derive(Debug, Clone, Copy)]
pub struct MinimumDifficulty(pub U256);

impl SealVerifier for MinimumDifficulty {
    fn verify_seal(&self, header: &Header) -> Result<(), SealError> {
        if header.difficulty < self.0 {
            return Err(SealError(format!(
                "difficulty {} at height {} below minimum {}",
                header.difficulty, header.number, self.0
            )));
        }
        Ok(())
    }
}
