use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::framing::{Scid, Vcid, CRC_CCITT};
use crate::{Error, Result};

/// TC transfer frame primary header.
///
/// Ref: CCSDS 232.0-B-4, Section 4.1.2
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TcFrameHeader {
    pub version: u8,
    /// Type-B frame, i.e., not subject to FARM-1 sequence checking
    pub bypass: bool,
    /// Frame carries control commands rather than data
    pub control_command: bool,
    pub scid: Scid,
    pub vcid: Vcid,
    /// Total frame length in bytes
    pub frame_length: usize,
    pub frame_seq: u8,
}

impl TcFrameHeader {
    /// Header length in bytes
    pub const LEN: usize = 5;
    /// Maximum frame length in bytes
    pub const MAX_FRAME_LEN: usize = 1024;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let y = u16::from_be_bytes([dat[2], dat[3]]);
        Some(TcFrameHeader {
            version: (x >> 14) as u8,
            bypass: (x >> 13) & 0x1 == 1,
            control_command: (x >> 12) & 0x1 == 1,
            scid: x & 0x3ff,
            vcid: (y >> 10) as u8,
            frame_length: usize::from(y & 0x3ff) + 1,
            frame_seq: dat[4],
        })
    }

    /// # Errors
    /// [Error::InvalidArgument] if a field does not fit its bits or the frame length is not
    /// between 1 and [TcFrameHeader::MAX_FRAME_LEN].
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        if self.version > 3 || self.scid > 0x3ff || self.vcid > 0x3f {
            return Err(Error::InvalidArgument(format!(
                "TC frame header field out of range: {self:?}"
            )));
        }
        if !(1..=Self::MAX_FRAME_LEN).contains(&self.frame_length) {
            return Err(Error::InvalidArgument(format!(
                "TC frame length must be between 1 and {}; got {}",
                Self::MAX_FRAME_LEN,
                self.frame_length
            )));
        }
        let x = (u16::from(self.version) << 14)
            | (u16::from(self.bypass) << 13)
            | (u16::from(self.control_command) << 12)
            | self.scid;
        // fits in 10 bits, checked above
        let y = (u16::from(self.vcid) << 10) | (self.frame_length - 1) as u16;
        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&x.to_be_bytes());
        buf[2..4].copy_from_slice(&y.to_be_bytes());
        buf[4] = self.frame_seq;
        Ok(buf)
    }
}

/// COP-1 control commands carried by type-BC frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Clear the FARM-1 lockout
    Unlock,
    /// Set the FARM-1 expected sequence number V(R)
    SetVr(u8),
}

impl ControlCommand {
    #[must_use]
    pub fn data(self) -> Vec<u8> {
        match self {
            ControlCommand::Unlock => vec![0x00],
            ControlCommand::SetVr(vr) => vec![0x82, 0x00, vr],
        }
    }
}

/// Builds the TC transfer frames of one virtual channel.
///
/// Type-AD frames are numbered with the frame sequence counter V(S); type-BD and type-BC
/// frames carry a zero sequence number.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TcFrameGenerator {
    scid: Scid,
    vcid: Vcid,
    /// Append a frame error control field
    #[builder(default = true)]
    fecf: bool,
    #[builder(default = TcFrameHeader::MAX_FRAME_LEN)]
    max_frame_length: usize,
    #[builder(default, setter(skip))]
    vs: u8,
}

impl TcFrameGenerator {
    /// Frame error control field length in bytes
    const FECF_LEN: usize = 2;

    #[must_use]
    pub fn vcid(&self) -> Vcid {
        self.vcid
    }

    /// The sequence number of the next type-AD frame, V(S).
    #[must_use]
    pub fn next_sequence(&self) -> u8 {
        self.vs
    }

    /// Largest frame data field.
    #[must_use]
    pub fn max_data_length(&self) -> usize {
        let overhead = TcFrameHeader::LEN + if self.fecf { Self::FECF_LEN } else { 0 };
        self.max_frame_length
            .min(TcFrameHeader::MAX_FRAME_LEN)
            .saturating_sub(overhead)
    }

    fn frame(&self, data: &[u8], bypass: bool, control_command: bool, seq: u8) -> Result<Vec<u8>> {
        if data.is_empty() || data.len() > self.max_data_length() {
            return Err(Error::InvalidArgument(format!(
                "TC frame data must be between 1 and {} bytes; got {}",
                self.max_data_length(),
                data.len()
            )));
        }
        let frame_length =
            TcFrameHeader::LEN + data.len() + if self.fecf { Self::FECF_LEN } else { 0 };
        let header = TcFrameHeader {
            version: 0,
            bypass,
            control_command,
            scid: self.scid,
            vcid: self.vcid,
            frame_length,
            frame_seq: seq,
        };
        let mut frame = Vec::with_capacity(frame_length);
        frame.extend_from_slice(&header.encode()?);
        frame.extend_from_slice(data);
        if self.fecf {
            let crc = CRC_CCITT.checksum(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
        }
        Ok(frame)
    }

    /// Frame `data`, a type-BD frame if `bypass` is set and otherwise a type-AD frame
    /// consuming the next V(S).
    ///
    /// # Errors
    /// [Error::InvalidArgument] if `data` is empty or does not fit in a frame.
    pub fn make_frame(&mut self, data: &[u8], bypass: bool) -> Result<Vec<u8>> {
        if bypass {
            return self.frame(data, true, false, 0);
        }
        let frame = self.frame(data, false, false, self.vs)?;
        debug!(vcid = self.vcid, vs = self.vs, "type-AD frame");
        self.vs = self.vs.wrapping_add(1);
        Ok(frame)
    }

    /// Type-BC frame for `command`. Setting V(R) also resets V(S) to the same value.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if the frame cannot be built with the configured limits.
    pub fn make_control_frame(&mut self, command: ControlCommand) -> Result<Vec<u8>> {
        let frame = self.frame(&command.data(), true, true, 0)?;
        if let ControlCommand::SetVr(vr) = command {
            self.vs = vr;
        }
        Ok(frame)
    }
}
