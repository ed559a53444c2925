use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use super::{
    first_header_pointer, DefaultCrc16, DownlinkTransferFrame, FrameDecoder, Integrity,
    IntegrityAlgorithm, Scid, Vcid,
};
use crate::rs::ReedSolomon;
use crate::{Error, Result};

/// AOS transfer frame (VCDU) primary header.
///
/// Ref: CCSDS 732.0-B-4, Section 4.1.2
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct VCDUHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub counter: u32,
    pub replay: bool,
    pub cycle: bool,
    pub counter_cycle: u8,
}

impl VCDUHeader {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;
    /// Frame header error control length in bytes, when present
    pub const FHEC_LEN: usize = 2;
    /// VCID indicating a fill frame
    pub const FILL: Vcid = 63;
    /// Number of distinct VCDU counter values
    pub const COUNTER_MODULUS: u32 = 1 << 24;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }

        let x = u16::from_be_bytes([dat[0], dat[1]]);
        Some(VCDUHeader {
            version: (dat[0] >> 6) & 0x3,
            scid: ((x >> 6) & 0xff),
            vcid: (x & 0x3f) as u8,
            counter: u32::from_be_bytes([0, dat[2], dat[3], dat[4]]),
            replay: (dat[5] >> 7) & 0x1 == 1,
            cycle: (dat[5] >> 6) & 0x1 == 1,
            counter_cycle: dat[5] & 0xf,
        })
    }
}

/// Frame header error control field codec.
///
/// The master channel id, virtual channel id and signaling field, the header bytes other
/// than the frame count, form six 4-bit symbols of a [ReedSolomon::aos_fhec] codeword
/// whose parity is the 2 byte FHEC following the header.
#[derive(Debug, Clone)]
pub struct FrameHeaderErrorControl {
    rs: ReedSolomon,
}

impl Default for FrameHeaderErrorControl {
    fn default() -> Self {
        Self {
            rs: ReedSolomon::aos_fhec(),
        }
    }
}

impl FrameHeaderErrorControl {
    /// Header byte offsets covered by the FHEC
    const PROTECTED: [usize; 3] = [0, 1, 5];

    fn check_len(dat: &[u8], minimum: usize) -> Result<()> {
        if dat.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum,
            });
        }
        Ok(())
    }

    fn symbols(bytes: impl IntoIterator<Item = u8>) -> Vec<u8> {
        bytes.into_iter().flat_map(|b| [b >> 4, b & 0xf]).collect()
    }

    /// Compute the FHEC for the VCDU header at the start of `header`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `header` is shorter than [VCDUHeader::LEN].
    pub fn compute(&self, header: &[u8]) -> Result<[u8; 2]> {
        Self::check_len(header, VCDUHeader::LEN)?;
        let data = Self::symbols(Self::PROTECTED.map(|i| header[i]));
        let mut parity = [0u8; 4];
        self.rs.encode(&data, &mut parity)?;
        Ok([(parity[0] << 4) | parity[1], (parity[2] << 4) | parity[3]])
    }

    /// Correct the protected fields of the VCDU header and FHEC at the start of `frame` in
    /// place, returning the number of corrected symbols.
    ///
    /// # Errors
    /// [Error::Framing] if the header is uncorrectable, or [Error::NotEnoughData] if
    /// `frame` is too short for a header with FHEC.
    pub fn correct(&self, frame: &mut [u8]) -> Result<usize> {
        let len = VCDUHeader::LEN + VCDUHeader::FHEC_LEN;
        Self::check_len(frame, len)?;
        let offsets: Vec<usize> = Self::PROTECTED
            .into_iter()
            .chain(VCDUHeader::LEN..len)
            .collect();
        let mut block = Self::symbols(offsets.iter().map(|i| frame[*i]));
        let corrected = match self.rs.decode(&mut block, None) {
            Ok(num) => num,
            Err(Error::UncorrectableFec) => {
                return Err(Error::Framing("uncorrectable AOS frame header".to_string()))
            }
            Err(err) => return Err(err),
        };
        if corrected > 0 {
            for (i, pair) in offsets.iter().zip(block.chunks(2)) {
                frame[*i] = (pair[0] << 4) | pair[1];
            }
        }
        Ok(corrected)
    }
}

/// Decoder for fixed length AOS transfer frames carrying M_PDUs.
#[derive(Debug, Clone, TypedBuilder)]
pub struct AosFrameDecoder {
    /// Frame length in bytes, including the FECF if present
    frame_length: usize,
    #[builder(default = 0)]
    insert_zone_length: usize,
    /// Frames carry a frame header error control field, which is verified and used to
    /// correct the header
    #[builder(
        default,
        setter(transform = |enabled: bool| enabled.then(FrameHeaderErrorControl::default))
    )]
    fhec: Option<FrameHeaderErrorControl>,
    /// Frames carry an operational control field
    #[builder(default = false)]
    ocf: bool,
    /// Frames carry a frame error control field
    #[builder(default = false)]
    fecf: bool,
}

impl AosFrameDecoder {
    /// M_PDU header length in bytes
    const MPDU_HEADER_LEN: usize = 2;
}

impl FrameDecoder for AosFrameDecoder {
    fn decode(&self, mut data: Vec<u8>, ert: i64) -> Result<DownlinkTransferFrame> {
        if data.len() != self.frame_length {
            return Err(Error::Framing(format!(
                "expected AOS frame of {} bytes; got {}",
                self.frame_length,
                data.len()
            )));
        }
        if let Some(ref fhec) = self.fhec {
            let corrected = fhec.correct(&mut data)?;
            if corrected > 0 {
                debug!(corrected = corrected, "corrected AOS frame header");
            }
        }
        let header = VCDUHeader::decode(&data).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: VCDUHeader::LEN,
        })?;

        let mut data_end = data.len();
        if self.fecf {
            let (status, _) = DefaultCrc16.perform(&data)?;
            if status != Integrity::NoErrors {
                return Err(Error::Framing(format!(
                    "FECF check failed for vcid {}",
                    header.vcid
                )));
            }
            data_end -= DefaultCrc16::LEN;
        }
        let mut ocf = None;
        if self.ocf {
            data_end = data_end
                .checked_sub(4)
                .ok_or(Error::Framing("frame too short for OCF".to_string()))?;
            ocf = Some(u32::from_be_bytes([
                data[data_end],
                data[data_end + 1],
                data[data_end + 2],
                data[data_end + 3],
            ]));
        }

        let mpdu_start = VCDUHeader::LEN
            + if self.fhec.is_some() { VCDUHeader::FHEC_LEN } else { 0 }
            + self.insert_zone_length;
        let data_start = mpdu_start + Self::MPDU_HEADER_LEN;
        if data_start >= data_end {
            return Err(Error::Framing(format!(
                "AOS frame data field is empty; start={data_start} end={data_end}"
            )));
        }

        let (first_header_pointer, idle) = if header.vcid == VCDUHeader::FILL {
            (None, true)
        } else {
            let fhp = u16::from_be_bytes([data[mpdu_start], data[mpdu_start + 1]]);
            first_header_pointer(fhp, data_start, data_end - data_start)?
        };

        Ok(DownlinkTransferFrame {
            scid: header.scid,
            vcid: header.vcid,
            vc_frame_seq: header.counter,
            vc_frame_seq_modulus: VCDUHeader::COUNTER_MODULUS,
            first_header_pointer,
            idle,
            data_start,
            data_end,
            data,
            earth_reception_time: ert,
            ocf,
        })
    }
}
