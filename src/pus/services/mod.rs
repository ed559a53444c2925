//! Standard PUS service implementations.
mod event;
mod housekeeping;
mod scheduling;
mod testing;
mod verification;

pub use event::*;
pub use housekeeping::*;
pub use scheduling::*;
pub use testing::*;
pub use verification::*;

use std::sync::Arc;

use super::{
    CommandModifier, PusConfig, PusHeader, PusTmPacket, SubService, TelemetryProcessor,
    PUS_VERSION,
};
use crate::spacepacket::{PreparedCommand, TmPacket};
use crate::{Error, Result};

/// Completes the PUS-C telecommand secondary header: version and acknowledgement flags
/// (octet 6) and the source id (octets 9-10). Service and sub-service are left as set by
/// the command definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcHeaderStamp {
    pub source_id: u16,
    pub ack_flags: u8,
}

impl TcHeaderStamp {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            source_id: config.source_id,
            ack_flags: config.ack_flags,
        }
    }

    /// # Errors
    /// [Error::NotEnoughData] if `binary` is too short for a PUS TC header.
    pub fn stamp(&self, binary: &mut [u8]) -> Result<()> {
        if binary.len() < PusHeader::TC_LEN {
            return Err(Error::NotEnoughData {
                actual: binary.len(),
                minimum: PusHeader::TC_LEN,
            });
        }
        binary[6] = (PUS_VERSION << 4) | (self.ack_flags & 0xf);
        binary[9..11].copy_from_slice(&self.source_id.to_be_bytes());
        Ok(())
    }
}

impl CommandModifier for TcHeaderStamp {
    fn modify_command(&self, mut command: PreparedCommand) -> Result<PreparedCommand> {
        self.stamp(&mut command.binary)?;
        Ok(command)
    }
}

/// Hands telemetry downstream as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardTelemetry;

impl TelemetryProcessor for ForwardTelemetry {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        Ok(vec![packet.into_packet()])
    }
}

fn command_subservices(stamp: TcHeaderStamp, subservices: &[u8]) -> Vec<(u8, SubService)> {
    let modifier: Arc<dyn CommandModifier> = Arc::new(stamp);
    subservices
        .iter()
        .map(|sst| (*sst, SubService::Command(modifier.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spacepacket::CommandId;

    #[test]
    fn test_stamp_tc_header() {
        let stamp = TcHeaderStamp {
            source_id: 0x0a0b,
            ack_flags: 0b1001,
        };
        let binary = vec![0x18, 0x10, 0xc0, 0x00, 0x00, 0x05, 0x00, 17, 1, 0x00, 0x00, 0xee];

        let command = stamp
            .modify_command(PreparedCommand::new(CommandId::default(), binary))
            .unwrap();

        assert_eq!(&command.binary[6..], &[0x29, 17, 1, 0x0a, 0x0b, 0xee]);
    }

    #[test]
    fn test_stamp_short_command() {
        let stamp = TcHeaderStamp {
            source_id: 1,
            ack_flags: 0,
        };
        let zult = stamp.stamp(&mut [0x18, 0x10, 0xc0, 0x00, 0x00, 0x05]);
        assert!(matches!(zult, Err(Error::NotEnoughData { .. })), "{zult:?}");
    }
}
