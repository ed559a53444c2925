use std::sync::Arc;

use super::{command_subservices, TcHeaderStamp};
use crate::pus::{read_uint, PusConfig, PusService, PusTmPacket, SubService, TelemetryProcessor};
use crate::spacepacket::TmPacket;
use crate::{Error, Result};

/// Metadata name for the housekeeping parameter report structure id
pub const METADATA_STRUCTURE_ID: &str = "pus.structure_id";

/// TM[3,25] housekeeping and TM[3,26] diagnostic parameter reports.
#[derive(Debug, Clone, Copy)]
pub struct ParameterReport {
    structure_id_length: usize,
}

impl TelemetryProcessor for ParameterReport {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let data = packet.data_field();
        let sid = read_uint(data, 0, self.structure_id_length).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: self.structure_id_length,
        })?;
        let mut packet = packet.into_packet();
        packet.set_metadata(METADATA_STRUCTURE_ID, sid as i64);
        Ok(vec![packet])
    }
}

/// ST[3] housekeeping.
///
/// Telecommands: TC[3,5] enable and TC[3,6] disable periodic report generation, TC[3,27]
/// one-shot report. Telemetry: TM[3,25] and TM[3,26] reports.
#[derive(Debug, Clone)]
pub struct HousekeepingService {
    stamp: TcHeaderStamp,
    report: ParameterReport,
}

impl HousekeepingService {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            stamp: TcHeaderStamp::new(config),
            report: ParameterReport {
                structure_id_length: config.structure_id_length,
            },
        }
    }
}

impl PusService for HousekeepingService {
    fn service_type(&self) -> u8 {
        3
    }

    fn subservices(&self) -> Vec<(u8, SubService)> {
        let report: Arc<dyn TelemetryProcessor> = Arc::new(self.report);
        let mut subs = command_subservices(self.stamp, &[5, 6, 27]);
        subs.push((25, SubService::Telemetry(report.clone())));
        subs.push((26, SubService::Telemetry(report)));
        subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pus::tests::tm;
    use crate::pus::PusTmLayout;
    use crate::spacepacket::MetadataValue;

    #[test]
    fn test_structure_id() {
        let service = HousekeepingService::new(&PusConfig::default());
        let packet = PusTmPacket::new(
            TmPacket::new(0, tm(3, 25, &[0x00, 0x2a, 0x01, 0x02])),
            PusTmLayout::default(),
        )
        .unwrap();

        let zult = service.report.process_telemetry(packet).unwrap();

        assert_eq!(zult.len(), 1);
        assert_eq!(
            zult[0].metadata(METADATA_STRUCTURE_ID),
            Some(&MetadataValue::Int(42))
        );
    }

    #[test]
    fn test_subservices() {
        let subs = HousekeepingService::new(&PusConfig::default()).subservices();
        let mut got: Vec<(u8, crate::Direction)> =
            subs.iter().map(|(sst, h)| (*sst, h.direction())).collect();
        got.sort_by_key(|(sst, _)| *sst);

        assert_eq!(
            got,
            vec![
                (5, crate::Direction::Telecommand),
                (6, crate::Direction::Telecommand),
                (25, crate::Direction::Telemetry),
                (26, crate::Direction::Telemetry),
                (27, crate::Direction::Telecommand),
            ]
        );
    }
}
