use std::collections::HashMap;
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use super::{missing_packets, Apid, PrimaryHeader, TmPacket};
use crate::framing::CRC_CCITT;
use crate::timecode::{TimeDecoder, TimeEpoch};
use crate::Result;

/// Completes a [TmPacket] before it is handed downstream, e.g., by decoding its generation
/// time from the packet bytes.
pub trait PacketPreprocessor: Send {
    /// Returns the completed packet, or `None` if the packet is to be dropped.
    fn process(&mut self, packet: TmPacket) -> Option<TmPacket>;
}

/// Packet error control algorithm, computed over all packet bytes preceding the 2 byte
/// checkword at the end of the packet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorDetection {
    #[serde(rename = "CRC-16-CCIIT")]
    Crc16Ccitt,
    /// Sum of big-endian 16 bit words
    #[serde(rename = "16-SUM")]
    Sum16,
    /// ISO 8473 / ECSS-E-ST-70-41 checksum
    #[serde(rename = "ISO-16")]
    Iso16,
    #[default]
    #[serde(rename = "NONE")]
    None,
}

impl ErrorDetection {
    /// Checkword length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ErrorDetection::None => 0,
            _ => 2,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        *self == ErrorDetection::None
    }

    /// Compute the checkword over `dat`, or `None` if no error detection is configured.
    #[must_use]
    pub fn compute(&self, dat: &[u8]) -> Option<u16> {
        match self {
            ErrorDetection::Crc16Ccitt => Some(CRC_CCITT.checksum(dat)),
            ErrorDetection::Sum16 => Some(dat.chunks(2).fold(0u16, |sum, w| {
                let word = u16::from_be_bytes([w[0], w.get(1).copied().unwrap_or(0)]);
                sum.wrapping_add(word)
            })),
            ErrorDetection::Iso16 => Some(iso16(dat)),
            ErrorDetection::None => None,
        }
    }

    /// True if the checkword at the end of `packet` matches, or if there is no error
    /// detection.
    #[must_use]
    pub fn verify(&self, packet: &[u8]) -> bool {
        if self.is_none() {
            return true;
        }
        if packet.len() < self.len() {
            return false;
        }
        let (dat, check) = packet.split_at(packet.len() - self.len());
        self.compute(dat) == Some(u16::from_be_bytes([check[0], check[1]]))
    }
}

/// Two octet ISO checksum. The checkword appended to `dat` makes both running sums zero
/// modulo 255.
fn iso16(dat: &[u8]) -> u16 {
    let (c0, c1) = dat.iter().fold((0u32, 0u32), |(c0, c1), b| {
        let c0 = (c0 + u32::from(*b)) % 255;
        (c0, (c1 + c0) % 255)
    });
    // ones complement zero is sent as 0xff
    let nonzero = |x: u32| if x == 0 { 255 } else { x };
    let ck1 = nonzero(255 - (c0 + c1) % 255);
    let ck2 = nonzero(c1);
    ((ck1 << 8) | ck2) as u16
}

/// Tracks per-APID sequence counts, logging any gaps.
#[derive(Debug, Clone, Default)]
pub struct SequenceChecker {
    last: HashMap<Apid, u16>,
}

impl SequenceChecker {
    /// Record the packet sequence count, returning the number of packets missing before it.
    pub fn check(&mut self, apid: Apid, seq: u16) -> u16 {
        let missing = match self.last.insert(apid, seq) {
            Some(last) => missing_packets(seq, last),
            None => 0,
        };
        if missing > 0 {
            warn!(apid = apid, seq = seq, missing = missing, "sequence count jump");
        }
        missing
    }
}

/// Packet pre-processor for space packets carrying the generation time at a fixed offset.
///
/// Packets failing the checkword or time decoding are marked invalid and keep the ground
/// reception time as their generation time. With [TimeEpoch::None] the raw on-board time
/// is stored in [TmPacket::obt] and the generation time stays the reception time.
#[derive(TypedBuilder)]
pub struct DefaultPacketPreprocessor {
    /// Decoder for the on-board time; if not set the ground reception time is used
    #[builder(default, setter(strip_option))]
    time_decoder: Option<Box<dyn TimeDecoder>>,
    /// Offset of the time field from the start of the packet
    #[builder(default = 13)]
    time_offset: usize,
    #[builder(default = TimeEpoch::Gps)]
    epoch: TimeEpoch,
    /// Time elapsed since a [TimeEpoch::Custom] epoch counts leap seconds
    #[builder(default = true)]
    time_includes_leap_seconds: bool,
    /// Always use the reception time as generation time, without decoding the packet time
    #[builder(default = false)]
    use_local_generation_time: bool,
    #[builder(default)]
    error_detection: ErrorDetection,
    /// Packets must carry a PUS secondary header
    #[builder(default = false)]
    pus: bool,
    #[builder(default, setter(strip_option))]
    sequence_checker: Option<SequenceChecker>,
}

impl DefaultPacketPreprocessor {
    /// PUS TM version/time reference octet plus service, sub-service, message counter and
    /// destination id
    const PUS_TM_HEADER_LEN: usize = 7;

    fn to_unix_millis(&self, millis: i64) -> Result<i64> {
        match self.epoch {
            TimeEpoch::Custom(_) if !self.time_includes_leap_seconds => {
                self.epoch.to_unix_millis_utc(millis)
            }
            _ => self.epoch.to_unix_millis(millis),
        }
    }

    fn decode_time(&self, payload: &[u8]) -> Option<PacketTime> {
        let decoder = self.time_decoder.as_ref()?;
        let Some(dat) = payload.get(self.time_offset..) else {
            warn!(
                len = payload.len(),
                offset = self.time_offset,
                "packet too short for time; using reception time"
            );
            return None;
        };
        let mut cur = Cursor::new(dat);
        let zult = if self.epoch == TimeEpoch::None {
            decoder.decode_raw(&mut cur).map(PacketTime::OnBoard)
        } else {
            decoder
                .decode(&mut cur)
                .and_then(|t| self.to_unix_millis(t))
                .map(PacketTime::Generation)
        };
        match zult {
            Ok(t) => Some(t),
            Err(err) => {
                warn!("failed to decode packet time: {err}");
                None
            }
        }
    }
}

/// Time decoded from a packet.
enum PacketTime {
    /// Unix milliseconds
    Generation(i64),
    /// Raw on-board time
    OnBoard(i64),
}

impl PacketPreprocessor for DefaultPacketPreprocessor {
    fn process(&mut self, mut packet: TmPacket) -> Option<TmPacket> {
        let Some(header) = PrimaryHeader::decode(&packet.payload) else {
            debug!(len = packet.payload.len(), "packet too short for header; dropping");
            return None;
        };
        packet.seq_count = header.sequence_id;

        if self.pus
            && (!header.has_secondary_header
                || packet.payload.len() < PrimaryHeader::LEN + Self::PUS_TM_HEADER_LEN)
        {
            warn!(apid = header.apid, "PUS packet without a secondary header");
            packet.invalid = true;
        }

        if !self.error_detection.verify(&packet.payload) {
            warn!(
                apid = header.apid,
                seq = header.sequence_id,
                "packet checkword mismatch"
            );
            packet.invalid = true;
        }

        if let Some(checker) = self.sequence_checker.as_mut() {
            checker.check(header.apid, header.sequence_id);
        }

        if self.use_local_generation_time {
            packet.generation_time = packet.reception_time;
            packet.local_gen_time = true;
            return Some(packet);
        }

        match self.decode_time(&packet.payload) {
            Some(PacketTime::Generation(t)) if !packet.invalid => {
                packet.generation_time = t;
                packet.local_gen_time = false;
            }
            Some(PacketTime::OnBoard(obt)) => {
                packet.obt = Some(obt);
            }
            Some(PacketTime::Generation(_)) => {}
            None => {
                if self.time_decoder.is_some() {
                    packet.invalid = true;
                }
            }
        }

        Some(packet)
    }
}
