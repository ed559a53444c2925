mod fecf;
mod reed_solomon;

pub use fecf::*;
pub use reed_solomon::*;

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrity {
    /// Check passed.
    NoErrors,
    /// Check failed, data cannot be trusted.
    HasErrors,
    /// Data did not require correction.
    Ok,
    /// Data was successfully corrected.
    Corrected,
    Uncorrectable,
}

/// Check or correct the integrity of frame bytes.
pub trait IntegrityAlgorithm: Send + Sync {
    /// Returns the integrity status and the frame bytes with any check symbols removed.
    ///
    /// # Errors
    /// If the data cannot be handled by this algorithm, e.g., it is the wrong length.
    fn perform(&self, cadu_dat: &[u8]) -> Result<(Integrity, Vec<u8>)>;
}
