use std::sync::Arc;

use rayon::prelude::*;

use super::{Integrity, IntegrityAlgorithm};
use crate::rs::{from_dual_basis, to_dual_basis, ReedSolomon};
use crate::{Error, Result};

/// Deinterleave an interleaved RS codeblock into `interleave` codewords of `block_len`.
///
/// Ref: 130.1-G-2, Section 5.3
fn deinterleave(data: &[u8], interleave: usize, block_len: usize) -> Vec<Vec<u8>> {
    let mut zult = vec![vec![0u8; block_len]; interleave];
    for (j, b) in data.iter().enumerate() {
        zult[j % interleave][j / interleave] = *b;
    }
    zult
}

/// Reed-Solomon correction of an interleaved codeblock.
///
/// The codewords of a codeblock are corrected in parallel.
#[derive(Clone, Debug)]
pub struct ReedSolomonIntegrity {
    codec: Arc<ReedSolomon>,
    interleave: usize,
    dual_basis: bool,
}

impl ReedSolomonIntegrity {
    #[must_use]
    pub fn new(codec: Arc<ReedSolomon>, interleave: usize, dual_basis: bool) -> Self {
        Self {
            codec,
            interleave: interleave.max(1),
            dual_basis,
        }
    }

    /// CCSDS (255,223) with dual basis symbols.
    #[must_use]
    pub fn ccsds(interleave: usize) -> Self {
        Self::new(Arc::new(ReedSolomon::ccsds()), interleave, true)
    }

    /// Length of the codeblock handled by this algorithm.
    #[must_use]
    pub fn codeblock_len(&self) -> usize {
        self.codec.block_len() * self.interleave
    }

    /// Length of the codeblock once check symbols are removed.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.codec.data_len() * self.interleave
    }

    fn correct(&self, msg: &mut [u8]) -> Result<usize> {
        if self.dual_basis {
            from_dual_basis(msg);
        }
        let zult = self.codec.decode(msg, None);
        if self.dual_basis {
            to_dual_basis(msg);
        }
        zult
    }
}

impl IntegrityAlgorithm for ReedSolomonIntegrity {
    fn perform(&self, cadu_dat: &[u8]) -> Result<(Integrity, Vec<u8>)> {
        if cadu_dat.len() != self.codeblock_len() {
            return Err(Error::InvalidArgument(format!(
                "codeblock len={} cannot be corrected by this algorithm with interleave={}",
                cadu_dat.len(),
                self.interleave,
            )));
        }

        let mut messages = deinterleave(cadu_dat, self.interleave, self.codec.block_len());
        let zults: Vec<Result<usize>> = messages
            .par_iter_mut()
            .map(|msg| self.correct(msg))
            .collect();

        let mut num_corrected = 0;
        let mut uncorrectable = false;
        for zult in zults {
            match zult {
                Ok(num) => num_corrected += num,
                Err(Error::UncorrectableFec) => uncorrectable = true,
                Err(err) => return Err(err),
            }
        }

        let mut block = vec![0u8; self.data_len()];
        for (idx, msg) in messages.iter().enumerate() {
            for (j, b) in msg[..self.codec.data_len()].iter().enumerate() {
                block[idx + j * self.interleave] = *b;
            }
        }

        let status = if uncorrectable {
            Integrity::Uncorrectable
        } else if num_corrected == 0 {
            Integrity::Ok
        } else {
            Integrity::Corrected
        };
        Ok((status, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RS message, no pn
    const FIXTURE_MSG: &[u8; 255] = &[
        0x67, 0xc4, 0x6b, 0xa7, 0x3e, 0xbe, 0x4c, 0x33, 0x6c, 0xb2, 0x23, 0x3a, 0x74, 0x06, 0x2b,
        0x18, 0xab, 0xb8, 0x09, 0xe6, 0x7d, 0xaf, 0x5d, 0xe5, 0xdf, 0x76, 0x25, 0x3f, 0xb9, 0x14,
        0xee, 0xec, 0xd1, 0xa3, 0x39, 0x5f, 0x38, 0x68, 0xf0, 0x26, 0xa6, 0x8a, 0xcb, 0x09, 0xaf,
        0x4e, 0xf8, 0x93, 0xf7, 0x45, 0x4b, 0x0d, 0xa9, 0xb8, 0x74, 0x0e, 0xf3, 0xc7, 0xed, 0x6e,
        0xa3, 0x0f, 0xf6, 0x79, 0x94, 0x16, 0xe2, 0x7f, 0xad, 0x91, 0x91, 0x04, 0xac, 0xa4, 0xae,
        0xb4, 0x51, 0x76, 0x2f, 0x62, 0x03, 0x5e, 0xa1, 0xe5, 0x5c, 0x45, 0xf8, 0x1f, 0x7a, 0x7b,
        0xe8, 0x35, 0xd8, 0xcc, 0x51, 0x0e, 0xae, 0x3a, 0x2a, 0x64, 0x1d, 0x03, 0x10, 0xcd, 0x18,
        0xe6, 0x7f, 0xef, 0xba, 0xd9, 0xe8, 0x98, 0x47, 0x82, 0x9c, 0xa1, 0x58, 0x47, 0x25, 0xdf,
        0x41, 0xd2, 0x01, 0x62, 0x3c, 0x24, 0x88, 0x90, 0xe9, 0xd7, 0x38, 0x1b, 0xa0, 0xa2, 0xb4,
        0x23, 0xea, 0x7e, 0x58, 0x0d, 0xf4, 0x61, 0x24, 0x14, 0xb0, 0x41, 0x90, 0x0c, 0xb7, 0xbb,
        0x5c, 0x59, 0x1b, 0xc6, 0x69, 0x24, 0x0f, 0xb6, 0x0e, 0x14, 0xa1, 0xb1, 0x8e, 0x48, 0x0f,
        0x17, 0x1d, 0xfb, 0x0f, 0x38, 0x42, 0xe3, 0x24, 0x58, 0xab, 0x82, 0xa8, 0xfd, 0xdf, 0xac,
        0x68, 0x93, 0x3d, 0x0d, 0x8f, 0x50, 0x52, 0x44, 0x6c, 0xba, 0xd3, 0x51, 0x99, 0x9c, 0x3e,
        0xad, 0xd5, 0xa8, 0xd7, 0x9d, 0xc7, 0x7f, 0x9f, 0xc9, 0x2a, 0xac, 0xe5, 0xc2, 0xcd, 0x9a,
        0x9b, 0xfa, 0x2d, 0x72, 0xab, 0x6b, 0xa4, 0x6b, 0x8b, 0x7d, 0xfa, 0x6c, 0x83, 0x63, 0x77,
        0x9f, 0x4e, 0x9a, 0x20, 0x35, 0xd2, 0x91, 0xce, 0xf4, 0x21, 0x1a, 0x97, 0x3c, 0x1a, 0x15,
        0x9d, 0xfc, 0x98, 0xba, 0x72, 0x1b, 0x9a, 0xa2, 0xe9, 0xc9, 0x46, 0x68, 0xce, 0xad, 0x27,
    ];

    #[test]
    fn test_deinterleave() {
        let dat: Vec<u8> = vec![0, 1, 2, 3, 0, 1, 2, 3];
        let blocks = deinterleave(&dat, 4, 2);
        for (i, block) in blocks.iter().enumerate().take(4) {
            assert_eq!(block[0], u8::try_from(i).unwrap());
            assert_eq!(block[1], u8::try_from(i).unwrap());
        }
    }

    fn test_correct_codeblock(interleave: usize, blocksize: usize) {
        let mut cadu = vec![0u8; FIXTURE_MSG.len() * interleave];

        // Interleave the same message interleave number of times
        for j in 0..FIXTURE_MSG.len() {
            for i in 0..interleave {
                cadu[interleave * j + i] = FIXTURE_MSG[j];
            }
        }
        assert_eq!(cadu.len(), blocksize);

        let rs = ReedSolomonIntegrity::ccsds(interleave);
        let expected_block_len = if interleave == 4 { 892 } else { 1115 };

        let (status, block) = rs.perform(&cadu).unwrap();
        assert_eq!(
            status,
            Integrity::Ok,
            "expected source test data to not have errors, but it was not Ok"
        );
        assert_eq!(block.len(), expected_block_len);
        assert_eq!(&block[..interleave], &vec![FIXTURE_MSG[0]; interleave][..]);

        // Introduce an error by just adding one with wrap to a byte and make sure it's corrected
        cadu[100] = cadu[100].wrapping_add(1);
        let (status, corrected) = rs.perform(&cadu).unwrap();
        assert_eq!(
            status,
            Integrity::Corrected,
            "expected data to be corrected with introduced error, it was not"
        );
        assert_eq!(corrected, block);
    }

    #[test]
    fn test_correct_i4_1020_codeblock() {
        test_correct_codeblock(4, 1020);
    }

    #[test]
    fn test_correct_i5_1275_codeblock() {
        test_correct_codeblock(5, 1275);
    }

    #[test]
    fn test_uncorrectable_codeblock() {
        let mut cadu = FIXTURE_MSG.to_vec();
        for b in cadu.iter_mut().step_by(7).take(20) {
            *b ^= 0x55;
        }

        let (status, _) = ReedSolomonIntegrity::ccsds(1).perform(&cadu).unwrap();

        assert_eq!(status, Integrity::Uncorrectable);
    }

    #[test]
    fn test_wrong_codeblock_len() {
        let zult = ReedSolomonIntegrity::ccsds(4).perform(&[0u8; 1000]);
        assert!(matches!(zult, Err(Error::InvalidArgument(_))));
    }
}
