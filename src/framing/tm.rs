use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{
    first_header_pointer, DefaultCrc16, DownlinkTransferFrame, FrameDecoder, Integrity,
    IntegrityAlgorithm, Scid, Vcid,
};
use crate::{Error, Result};

/// TM transfer frame primary header.
///
/// Ref: CCSDS 132.0-B-3, Section 4.1.2
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TmFrameHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub ocf_flag: bool,
    pub mc_frame_count: u8,
    pub vc_frame_count: u8,
    pub secondary_header_flag: bool,
    pub sync_flag: bool,
    pub packet_order_flag: bool,
    pub segment_length_id: u8,
    pub first_header_pointer: u16,
}

impl TmFrameHeader {
    /// Header length in bytes
    pub const LEN: usize = 6;
    /// Number of distinct virtual channel frame counts
    pub const COUNTER_MODULUS: u32 = 256;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let status = u16::from_be_bytes([dat[4], dat[5]]);
        Some(TmFrameHeader {
            version: (x >> 14) as u8,
            scid: (x >> 4) & 0x3ff,
            vcid: ((x >> 1) & 0x7) as u8,
            ocf_flag: x & 0x1 == 1,
            mc_frame_count: dat[2],
            vc_frame_count: dat[3],
            secondary_header_flag: (status >> 15) & 0x1 == 1,
            sync_flag: (status >> 14) & 0x1 == 1,
            packet_order_flag: (status >> 13) & 0x1 == 1,
            segment_length_id: ((status >> 11) & 0x3) as u8,
            first_header_pointer: status & 0x7ff,
        })
    }
}

/// Decoder for fixed length TM transfer frames.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TmFrameDecoder {
    /// Frame length in bytes, including the FECF if present
    frame_length: usize,
    /// Frames carry a frame error control field
    #[builder(default = false)]
    fecf: bool,
}

impl FrameDecoder for TmFrameDecoder {
    fn decode(&self, data: Vec<u8>, ert: i64) -> Result<DownlinkTransferFrame> {
        if data.len() != self.frame_length {
            return Err(Error::Framing(format!(
                "expected TM frame of {} bytes; got {}",
                self.frame_length,
                data.len()
            )));
        }
        let header = TmFrameHeader::decode(&data).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: TmFrameHeader::LEN,
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
        if header.ocf_flag {
            data_end = data_end.checked_sub(4).ok_or(Error::Framing(
                "frame too short for OCF".to_string(),
            ))?;
            ocf = Some(u32::from_be_bytes([
                data[data_end],
                data[data_end + 1],
                data[data_end + 2],
                data[data_end + 3],
            ]));
        }

        let mut data_start = TmFrameHeader::LEN;
        if header.secondary_header_flag {
            let len = usize::from(data.get(data_start).copied().unwrap_or_default() & 0x3f) + 1;
            data_start += len;
        }
        if data_start >= data_end {
            return Err(Error::Framing(format!(
                "TM frame data field is empty; start={data_start} end={data_end}"
            )));
        }

        let (first_header_pointer, idle) =
            first_header_pointer(header.first_header_pointer, data_start, data_end - data_start)?;

        Ok(DownlinkTransferFrame {
            scid: header.scid,
            vcid: header.vcid,
            vc_frame_seq: u32::from(header.vc_frame_count),
            vc_frame_seq_modulus: TmFrameHeader::COUNTER_MODULUS,
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
