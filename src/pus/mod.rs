//! ECSS Packet Utilization Standard (PUS-C) headers and the `(service, sub-service)`
//! dispatch of telecommands and telemetry.
mod registry;
pub mod services;

pub use registry::*;

use serde::{Deserialize, Serialize};

use crate::spacepacket::{Apid, PrimaryHeader, TmPacket};
use crate::{Direction, Error, Result};

/// PUS version number carried in PUS-C secondary headers
pub const PUS_VERSION: u8 = 2;

/// Metadata name for the PUS service type of a telemetry packet
pub const METADATA_SERVICE: &str = "pus.service";
/// Metadata name for the PUS sub-service type of a telemetry packet
pub const METADATA_SUBSERVICE: &str = "pus.subservice";

/// Big-endian unsigned integer of `len` (at most 8) bytes at `offset`.
pub(crate) fn read_uint(buf: &[u8], offset: usize, len: usize) -> Option<u64> {
    if len > 8 {
        return None;
    }
    let dat = buf.get(offset..offset + len)?;
    Some(dat.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Write the low `len` bytes of `value` big-endian.
pub(crate) fn write_uint(buf: &mut Vec<u8>, value: u64, len: usize) {
    let bytes = value.to_be_bytes();
    buf.extend_from_slice(&bytes[8 - len.min(8)..]);
}

/// Primary header plus PUS secondary header fields, parsed from the leading octets of a
/// packet.
///
/// Decoded on demand; it is not updated if the packet bytes are later modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PusHeader {
    pub apid: Apid,
    pub direction: Direction,
    pub seq_count: u16,
    pub pus_version: u8,
    /// TC acknowledgement flags; zero for telemetry
    pub ack_flags: u8,
    pub service: u8,
    pub subservice: u8,
    /// TM message type counter; zero for telecommands
    pub msg_counter: u16,
    /// Source id of a TC, destination id of a TM
    pub id: u16,
}

impl PusHeader {
    /// Length of primary and secondary header of a telecommand
    pub const TC_LEN: usize = PrimaryHeader::LEN + 5;
    /// Length of primary and secondary header of telemetry, up to the time field
    pub const TM_LEN: usize = PrimaryHeader::LEN + 7;

    /// Decode from packet bytes. Returns `None` if the packet has no secondary header or is
    /// too short for the header of its type.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let primary = PrimaryHeader::decode(buf)?;
        if !primary.has_secondary_header {
            return None;
        }
        if primary.type_flag == PrimaryHeader::TYPE_TC {
            if buf.len() < Self::TC_LEN {
                return None;
            }
            Some(PusHeader {
                apid: primary.apid,
                direction: Direction::Telecommand,
                seq_count: primary.sequence_id,
                pus_version: buf[6] >> 4,
                ack_flags: buf[6] & 0xf,
                service: buf[7],
                subservice: buf[8],
                msg_counter: 0,
                id: u16::from_be_bytes([buf[9], buf[10]]),
            })
        } else {
            if buf.len() < Self::TM_LEN {
                return None;
            }
            Some(PusHeader {
                apid: primary.apid,
                direction: Direction::Telemetry,
                seq_count: primary.sequence_id,
                pus_version: buf[6] >> 4,
                ack_flags: 0,
                service: buf[7],
                subservice: buf[8],
                msg_counter: u16::from_be_bytes([buf[9], buf[10]]),
                id: u16::from_be_bytes([buf[11], buf[12]]),
            })
        }
    }
}

/// Sizes of the variable parts of PUS telemetry packets.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PusTmLayout {
    /// Length of the absolute time field following the destination id
    pub time_length: usize,
    /// Length of the packet error control field at the end of the packet
    pub trailer_length: usize,
}

impl Default for PusTmLayout {
    fn default() -> Self {
        // 4 coarse, 2 fine CUC with p-field
        Self {
            time_length: 7,
            trailer_length: 0,
        }
    }
}

/// A telemetry packet with a decoded PUS header.
#[derive(Debug, Clone, PartialEq)]
pub struct PusTmPacket {
    packet: TmPacket,
    header: PusHeader,
    layout: PusTmLayout,
}

impl PusTmPacket {
    /// # Errors
    /// [Error::Framing] if the packet does not carry a PUS telemetry header, or is too short
    /// for the time field and trailer in `layout`.
    pub fn new(packet: TmPacket, layout: PusTmLayout) -> Result<Self> {
        let header = PusHeader::decode(&packet.payload)
            .filter(|h| h.direction == Direction::Telemetry)
            .ok_or_else(|| Error::Framing("packet has no PUS telemetry header".to_string()))?;
        let minimum = PusHeader::TM_LEN + layout.time_length + layout.trailer_length;
        if packet.payload.len() < minimum {
            return Err(Error::Framing(format!(
                "PUS packet ({},{}) too short; got {} bytes, need {minimum}",
                header.service,
                header.subservice,
                packet.payload.len()
            )));
        }
        Ok(Self {
            packet,
            header,
            layout,
        })
    }

    #[must_use]
    pub fn header(&self) -> &PusHeader {
        &self.header
    }

    #[must_use]
    pub fn layout(&self) -> PusTmLayout {
        self.layout
    }

    #[must_use]
    pub fn packet(&self) -> &TmPacket {
        &self.packet
    }

    #[must_use]
    pub fn into_packet(self) -> TmPacket {
        self.packet
    }

    /// Offset of the application data following the secondary header.
    #[must_use]
    pub fn data_offset(&self) -> usize {
        PusHeader::TM_LEN + self.layout.time_length
    }

    /// Primary and secondary header bytes.
    #[must_use]
    pub fn headers(&self) -> &[u8] {
        &self.packet.payload[..self.data_offset()]
    }

    #[must_use]
    pub fn time_field(&self) -> &[u8] {
        &self.packet.payload[PusHeader::TM_LEN..self.data_offset()]
    }

    /// Application data, excluding any packet error control field.
    #[must_use]
    pub fn data_field(&self) -> &[u8] {
        let end = self.packet.payload.len() - self.layout.trailer_length;
        &self.packet.payload[self.data_offset()..end]
    }
}
