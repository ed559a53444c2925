use crc::{Crc, CRC_16_IBM_3740};

use super::{Integrity, IntegrityAlgorithm};
use crate::{Error, Result};

/// CRC-16-CCITT (poly 0x1021, init 0xffff), as used for the frame error control field and
/// packet error control.
pub const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Frame error control field check, i.e., a CRC-16 over all frame bytes in the last 2
/// bytes of the frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCrc16;

impl DefaultCrc16 {
    pub const LEN: usize = 2;
}

impl IntegrityAlgorithm for DefaultCrc16 {
    fn perform(&self, cadu_dat: &[u8]) -> Result<(Integrity, Vec<u8>)> {
        if cadu_dat.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: cadu_dat.len(),
                minimum: Self::LEN,
            });
        }
        let (dat, fecf) = cadu_dat.split_at(cadu_dat.len() - Self::LEN);
        let expected = u16::from_be_bytes([fecf[0], fecf[1]]);
        let status = if CRC_CCITT.checksum(dat) == expected {
            Integrity::NoErrors
        } else {
            Integrity::HasErrors
        };
        Ok((status, dat.to_vec()))
    }
}
