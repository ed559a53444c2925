//! CCSDS space packets and the ground-side packet containers for telemetry and commands.
mod preprocessor;
mod seq_count;

pub use preprocessor::*;
pub use seq_count::*;

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub type Apid = u16;

/// Packet is the first packet in a packet group
pub const SEQ_FIRST: u8 = 1;
/// Packet is a part of a packet group, but not first and not last
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the last packet in a packet group
pub const SEQ_LAST: u8 = 2;
/// Packet is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping. See the `SEQ_*` values.
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    /// `type_flag` of a telecommand packet
    pub const TYPE_TC: u8 = 1;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Total packet length, header included, as declared by the length field.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        usize::from(self.len_minus1) + 1 + Self::LEN
    }

    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let d1 = (u16::from(self.version & 0x7) << 13)
            | (u16::from(self.type_flag & 0x1) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7ff);
        let d2 = (u16::from(self.sequence_flags & 0x3) << 14) | (self.sequence_id & 0x3fff);
        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&d1.to_be_bytes());
        buf[2..4].copy_from_slice(&d2.to_be_bytes());
        buf[4..].copy_from_slice(&self.len_minus1.to_be_bytes());
        buf
    }
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let modulus = u32::from(PrimaryHeader::SEQ_MAX) + 1;
    let missing = (u32::from(cur) + modulus - u32::from(last) - 1) % modulus;
    // less than modulus, so fits
    missing as u16
}

/// Values attached to a packet describing its link context, e.g., the virtual channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Int(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(v) => write!(f, "{v}"),
            MetadataValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u8> for MetadataValue {
    fn from(v: u8) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<u16> for MetadataValue {
    fn from(v: u16) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

/// A telemetry packet with its ground reception context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TmPacket {
    /// Ground reception time, milliseconds
    pub reception_time: i64,
    /// Generation time, milliseconds; the reception time until a pre-processor sets it
    pub generation_time: i64,
    pub seq_count: u16,
    /// All packet bytes, including the primary header
    pub payload: Vec<u8>,
    /// Time the containing frame was received on the ground, milliseconds
    pub earth_reception_time: Option<i64>,
    pub metadata: HashMap<String, MetadataValue>,
    /// Packet failed a validity check, e.g., the checkword
    pub invalid: bool,
    /// `generation_time` was set from the ground clock rather than the packet
    pub local_gen_time: bool,
    /// Raw on-board time counter, for packets whose time is not relative to a known epoch
    #[serde(default)]
    pub obt: Option<i64>,
}

impl TmPacket {
    #[must_use]
    pub fn new(reception_time: i64, payload: Vec<u8>) -> Self {
        let seq_count = PrimaryHeader::decode(&payload).map_or(0, |h| h.sequence_id);
        TmPacket {
            reception_time,
            generation_time: reception_time,
            seq_count,
            payload,
            earth_reception_time: None,
            metadata: HashMap::default(),
            invalid: false,
            local_gen_time: true,
            obt: None,
        }
    }

    #[must_use]
    pub fn header(&self) -> Option<PrimaryHeader> {
        PrimaryHeader::decode(&self.payload)
    }

    #[must_use]
    pub fn apid(&self) -> Option<Apid> {
        self.header().map(|h| h.apid)
    }

    /// Attach `value` as metadata `name`, replacing any existing value.
    pub fn set_metadata<V: Into<MetadataValue>>(&mut self, name: &str, value: V) {
        self.metadata.insert(name.to_string(), value.into());
    }

    #[must_use]
    pub fn metadata(&self, name: &str) -> Option<&MetadataValue> {
        self.metadata.get(name)
    }
}

impl Display for TmPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TmPacket{{apid: {:?}, seq: {}, gentime: {}, data:[len={}]}}",
            self.apid(),
            self.seq_count,
            self.generation_time,
            self.payload.len()
        )
    }
}

/// Identifies a command from its generation to its release.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandId {
    /// Generation time, milliseconds
    pub generation_time: i64,
    pub origin: String,
    pub sequence_number: u32,
    pub command_name: String,
}

/// Command attribute values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Bool(bool),
    String(String),
}

/// A command ready to be uplinked, with its binary being completed as it passes through
/// the uplink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub id: CommandId,
    /// All packet bytes, including the primary header
    pub binary: Vec<u8>,
    pub attributes: HashMap<String, AttributeValue>,
}

impl PreparedCommand {
    /// Attribute naming the on-board release time, Unix milliseconds, of a time-tagged command.
    pub const TIMETAG: &'static str = "timetag";

    #[must_use]
    pub fn new(id: CommandId, binary: Vec<u8>) -> Self {
        Self {
            id,
            binary,
            attributes: HashMap::default(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: AttributeValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn header(&self) -> Option<PrimaryHeader> {
        PrimaryHeader::decode(&self.binary)
    }
}
