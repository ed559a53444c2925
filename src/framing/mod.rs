//! CCSDS transfer frame decoding and virtual channel packet extraction.
//!
//! Raw frame bytes are decoded into a [DownlinkTransferFrame] by a [FrameDecoder], either
//! [TmFrameDecoder] (CCSDS 132.0) or [AosFrameDecoder] (CCSDS 732.0). Frames are routed by
//! virtual channel to a [VcPacketHandler] which reassembles the space packets spanning the
//! frame data fields.
mod aos;
mod clcw;
mod integrity;
mod link;
mod packets;
mod pn;
mod tm;
mod vc;

pub use aos::*;
pub use clcw::*;
pub use integrity::*;
pub use link::*;
pub use packets::*;
pub use pn::*;
pub use tm::*;
pub use vc::*;

use crate::Result;

pub type Scid = u16;
pub type Vcid = u8;

/// A decoded downlink transfer frame, independent of the frame format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkTransferFrame {
    pub scid: Scid,
    pub vcid: Vcid,
    /// Virtual channel frame count
    pub vc_frame_seq: u32,
    /// Number of distinct `vc_frame_seq` values before the counter wraps
    pub vc_frame_seq_modulus: u32,
    /// Offset into `data` of the first packet header in this frame, if any
    pub first_header_pointer: Option<usize>,
    /// Frame carries only idle data
    pub idle: bool,
    /// Offset into `data` of the start of the packet zone
    pub data_start: usize,
    /// Offset into `data` of the end of the packet zone, exclusive
    pub data_end: usize,
    /// All frame bytes, including headers and trailers
    pub data: Vec<u8>,
    /// Earth reception time, milliseconds
    pub earth_reception_time: i64,
    /// Operational control field, if present
    pub ocf: Option<u32>,
}

impl DownlinkTransferFrame {
    /// The packet zone bytes.
    #[must_use]
    pub fn data_field(&self) -> &[u8] {
        &self.data[self.data_start..self.data_end]
    }

    /// The CLCW carried in the operational control field, if any.
    #[must_use]
    pub fn clcw(&self) -> Option<Clcw> {
        self.ocf.and_then(Clcw::decode)
    }

    /// Number of frames missing between the frame sequence `last` and this frame.
    #[must_use]
    pub fn missing_since(&self, last: u32) -> u32 {
        missing_frames(self.vc_frame_seq, last, self.vc_frame_seq_modulus)
    }
}

/// Decodes raw frame bytes into a [DownlinkTransferFrame].
pub trait FrameDecoder: Send + Sync {
    /// Decode `data`, received at `ert` milliseconds.
    ///
    /// # Errors
    /// [crate::Error::Framing] if the bytes do not form a valid frame.
    fn decode(&self, data: Vec<u8>, ert: i64) -> Result<DownlinkTransferFrame>;
}

/// Calculate the number of missing frame sequence counts.
///
/// `cur` is the current frame counter. `last` is the frame counter seen before `cur`.
/// `cur` will be greater than `last` except in the case of a wrap at `modulus`. A repeated
/// counter is treated as a full counter cycle of lost frames.
#[must_use]
pub fn missing_frames(cur: u32, last: u32, modulus: u32) -> u32 {
    let modulus = u64::from(modulus.max(1));
    let missing = (u64::from(cur) + modulus - u64::from(last) % modulus - 1) % modulus;
    // less than modulus, so fits
    missing as u32
}

/// Extract the 11 bit first header pointer, returning `(first_header, idle)`.
fn first_header_pointer(fhp: u16, data_start: usize, data_len: usize) -> Result<(Option<usize>, bool)> {
    match fhp & 0x7ff {
        NO_PACKET_START => Ok((None, false)),
        IDLE_DATA_ONLY => Ok((None, true)),
        x if usize::from(x) < data_len => Ok((Some(data_start + usize::from(x)), false)),
        x => Err(crate::Error::Framing(format!(
            "first header pointer {x} beyond data field of {data_len} bytes"
        ))),
    }
}

/// First header pointer value indicating no packet starts in the data field.
pub const NO_PACKET_START: u16 = 0x7ff;
/// First header pointer value indicating the data field contains only idle data.
pub const IDLE_DATA_ONLY: u16 = 0x7fe;
