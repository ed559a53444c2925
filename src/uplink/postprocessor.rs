use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::spacepacket::{ErrorDetection, PreparedCommand, PrimaryHeader, SeqCountFiller};

/// Last step before a command binary is framed for uplink.
pub trait CommandPostprocessor: Send {
    /// Returns the bytes to uplink for `command`.
    fn process(&mut self, command: PreparedCommand) -> Vec<u8>;
}

/// Restricts an enumerated octet of the command binary to a range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldClamp {
    /// Offset from the start of the packet
    pub offset: usize,
    pub min: u8,
    pub max: u8,
    /// Written when the octet is outside `min..=max`
    pub replacement: u8,
}

impl FieldClamp {
    /// Returns the replaced value if the field was out of range.
    fn apply(&self, binary: &mut [u8]) -> Option<u8> {
        let val = binary.get_mut(self.offset)?;
        let orig = *val;
        if (self.min..=self.max).contains(&orig) {
            return None;
        }
        *val = self.replacement;
        Some(orig)
    }
}

/// Post-processor for CCSDS space packet telecommands.
///
/// In order: out of range fields are clamped, room is made for the checkword if the
/// packet has a secondary header and error detection is configured, the packet length and
/// the per-APID sequence count are set, and the checkword is computed.
#[derive(TypedBuilder)]
pub struct PusCommandPostprocessor {
    #[builder(default)]
    error_detection: ErrorDetection,
    #[builder(default)]
    clamps: Vec<FieldClamp>,
    #[builder(default, setter(skip))]
    seq_filler: SeqCountFiller,
}

impl PusCommandPostprocessor {
    fn has_checkword(&self, binary: &[u8]) -> bool {
        !self.error_detection.is_none()
            && PrimaryHeader::decode(binary).is_some_and(|h| h.has_secondary_header)
    }
}

impl CommandPostprocessor for PusCommandPostprocessor {
    fn process(&mut self, command: PreparedCommand) -> Vec<u8> {
        let name = command.id.command_name;
        let mut binary = command.binary;

        for clamp in &self.clamps {
            if let Some(orig) = clamp.apply(&mut binary) {
                warn!(
                    command = %name,
                    offset = clamp.offset,
                    "value {orig} out of range {}..={}; replaced with {}",
                    clamp.min,
                    clamp.max,
                    clamp.replacement
                );
            }
        }

        if binary.len() < PrimaryHeader::LEN + 1 {
            warn!(command = %name, len = binary.len(), "command too short for a space packet");
            return binary;
        }

        let checkword = self.has_checkword(&binary);
        if checkword {
            binary.resize(binary.len() + self.error_detection.len(), 0);
        }
        match u16::try_from(binary.len() - PrimaryHeader::LEN - 1) {
            Ok(len) => binary[4..6].copy_from_slice(&len.to_be_bytes()),
            Err(_) => warn!(command = %name, len = binary.len(), "command too long for the length field"),
        }
        self.seq_filler.fill(&mut binary);

        if checkword {
            let pos = binary.len() - self.error_detection.len();
            if let Some(word) = self.error_detection.compute(&binary[..pos]) {
                debug!(command = %name, "appending checkword {word:#06x} at {pos}");
                binary[pos..].copy_from_slice(&word.to_be_bytes());
            }
        }
        binary
    }
}
