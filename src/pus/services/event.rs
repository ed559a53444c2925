use std::fmt::Display;
use std::sync::Arc;

use super::{command_subservices, TcHeaderStamp};
use crate::pus::{read_uint, PusConfig, PusService, PusTmPacket, SubService, TelemetryProcessor};
use crate::spacepacket::TmPacket;
use crate::{Error, Result};

/// Metadata name for the event definition id of an event report
pub const METADATA_EVENT_ID: &str = "pus.event_id";
/// Metadata name for the severity of an event report
pub const METADATA_SEVERITY: &str = "pus.severity";
/// Metadata name for the number of event definitions in a TM[5,8] report
pub const METADATA_EVENT_COUNT: &str = "pus.event_count";

/// Event report severity, given by the reporting sub-service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub fn from_subservice(subservice: u8) -> Option<Self> {
        match subservice {
            1 => Some(Severity::Info),
            2 => Some(Severity::Low),
            3 => Some(Severity::Medium),
            4 => Some(Severity::High),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// TM[5,1] to TM[5,4] event reports.
#[derive(Debug, Clone, Copy)]
pub struct EventReport {
    event_id_length: usize,
}

impl TelemetryProcessor for EventReport {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let subservice = packet.header().subservice;
        let severity = Severity::from_subservice(subservice).ok_or(Error::UnknownSubService {
            service: 5,
            subservice,
        })?;
        let data = packet.data_field();
        let event_id = read_uint(data, 0, self.event_id_length).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: self.event_id_length,
        })?;

        let mut packet = packet.into_packet();
        packet.set_metadata(METADATA_SEVERITY, severity.to_string());
        packet.set_metadata(METADATA_EVENT_ID, event_id as i64);
        Ok(vec![packet])
    }
}

/// TM[5,8] disabled event definitions list.
#[derive(Debug, Clone, Copy)]
pub struct DisabledEventsReport;

impl TelemetryProcessor for DisabledEventsReport {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let count = packet
            .data_field()
            .first()
            .copied()
            .ok_or(Error::NotEnoughData {
                actual: 0,
                minimum: 1,
            })?;
        let mut packet = packet.into_packet();
        packet.set_metadata(METADATA_EVENT_COUNT, count);
        Ok(vec![packet])
    }
}

/// ST[5] event reporting.
///
/// Telecommands: TC[5,5] enable, TC[5,6] disable and TC[5,7] report the disabled event
/// definitions. Telemetry: TM[5,1] to TM[5,4] event reports by severity and TM[5,8].
#[derive(Debug, Clone)]
pub struct EventReportingService {
    stamp: TcHeaderStamp,
    report: EventReport,
}

impl EventReportingService {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            stamp: TcHeaderStamp::new(config),
            report: EventReport {
                event_id_length: config.event_id_length,
            },
        }
    }
}

impl PusService for EventReportingService {
    fn service_type(&self) -> u8 {
        5
    }

    fn subservices(&self) -> Vec<(u8, SubService)> {
        let report: Arc<dyn TelemetryProcessor> = Arc::new(self.report);
        let mut subs = command_subservices(self.stamp, &[5, 6, 7]);
        for sst in 1..=4 {
            subs.push((sst, SubService::Telemetry(report.clone())));
        }
        subs.push((8, SubService::Telemetry(Arc::new(DisabledEventsReport))));
        subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pus::tests::tm;
    use crate::pus::PusTmLayout;
    use crate::spacepacket::MetadataValue;
    use test_case::test_case;

    fn pus_tm(subservice: u8, data: &[u8]) -> PusTmPacket {
        PusTmPacket::new(TmPacket::new(0, tm(5, subservice, data)), PusTmLayout::default())
            .unwrap()
    }

    #[test_case(1, "INFO")]
    #[test_case(2, "LOW")]
    #[test_case(3, "MEDIUM")]
    #[test_case(4, "HIGH")]
    fn test_event_report(subservice: u8, severity: &str) {
        let report = EventReport { event_id_length: 2 };

        let zult = report
            .process_telemetry(pus_tm(subservice, &[0x01, 0x00, 0xff]))
            .unwrap();

        assert_eq!(
            zult[0].metadata(METADATA_SEVERITY),
            Some(&MetadataValue::String(severity.to_string()))
        );
        assert_eq!(
            zult[0].metadata(METADATA_EVENT_ID),
            Some(&MetadataValue::Int(256))
        );
    }

    #[test]
    fn test_event_report_too_short() {
        let report = EventReport { event_id_length: 2 };
        let zult = report.process_telemetry(pus_tm(1, &[0x01]));
        assert!(matches!(zult, Err(Error::NotEnoughData { .. })), "{zult:?}");
    }

    #[test]
    fn test_disabled_events() {
        let zult = DisabledEventsReport
            .process_telemetry(pus_tm(8, &[2, 0x00, 0x01, 0x00, 0x02]))
            .unwrap();
        assert_eq!(
            zult[0].metadata(METADATA_EVENT_COUNT),
            Some(&MetadataValue::Int(2))
        );
    }
}
