use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::services::{
    EventReportingService, HousekeepingService, ScheduleConfig, TestService,
    TimeSchedulingService, VerificationService,
};
use super::{PusHeader, PusTmLayout, PusTmPacket, METADATA_SERVICE, METADATA_SUBSERVICE};
use crate::framing::{LinkStatsSnapshot, TmSink};
use crate::spacepacket::{ErrorDetection, PreparedCommand, TmPacket};
use crate::{Direction, Error, Result};

/// Telecommand side of a sub-service: completes the PUS fields of a command before it is
/// uplinked.
pub trait CommandModifier: Send + Sync {
    /// # Errors
    /// If the command cannot be completed.
    fn modify_command(&self, command: PreparedCommand) -> Result<PreparedCommand>;
}

/// Telemetry side of a sub-service: interprets a report, returning the packets to hand
/// downstream.
pub trait TelemetryProcessor: Send + Sync {
    /// # Errors
    /// If the report is malformed.
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>>;
}

/// Handler registered for a `(service, sub-service)` pair.
#[derive(Clone)]
pub enum SubService {
    Command(Arc<dyn CommandModifier>),
    Telemetry(Arc<dyn TelemetryProcessor>),
}

impl SubService {
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            SubService::Command(_) => Direction::Telecommand,
            SubService::Telemetry(_) => Direction::Telemetry,
        }
    }
}

impl std::fmt::Debug for SubService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubService({})", self.direction())
    }
}

/// A PUS service with a fixed set of sub-services.
pub trait PusService {
    fn service_type(&self) -> u8;
    fn subservices(&self) -> Vec<(u8, SubService)>;
}

/// Options for the standard PUS services.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PusConfig {
    /// Source id stamped into telecommand secondary headers
    pub source_id: u16,
    /// Acknowledgement flags stamped into telecommand secondary headers
    pub ack_flags: u8,
    /// Length of the TM absolute time field
    pub time_length: usize,
    /// Packet error control appended to packets with a secondary header
    pub error_detection: ErrorDetection,
    /// Services to register; all standard services if empty
    pub services: Vec<u8>,
    /// Length of ST[5] event ids
    pub event_id_length: usize,
    /// Length of ST[3] housekeeping structure ids
    pub structure_id_length: usize,
    /// Length of the step id in ST[1] progress reports
    pub step_id_length: usize,
    /// Length of the failure notice code in ST[1] failure reports
    pub failure_code_length: usize,
    pub schedule: ScheduleConfig,
}

impl Default for PusConfig {
    fn default() -> Self {
        Self {
            source_id: 0,
            ack_flags: 0b1001,
            time_length: PusTmLayout::default().time_length,
            error_detection: ErrorDetection::None,
            services: Vec::default(),
            event_id_length: 2,
            structure_id_length: 2,
            step_id_length: 1,
            failure_code_length: 2,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl PusConfig {
    #[must_use]
    pub fn tm_layout(&self) -> PusTmLayout {
        PusTmLayout {
            time_length: self.time_length,
            trailer_length: self.error_detection.len(),
        }
    }
}

/// Builder for [PusServiceRegistry].
#[derive(Default)]
pub struct PusServiceRegistryBuilder {
    services: BTreeMap<u8, BTreeMap<u8, SubService>>,
    layout: PusTmLayout,
}

impl PusServiceRegistryBuilder {
    /// # Errors
    /// [Error::Config] if the pair is already registered.
    pub fn register(&mut self, service: u8, subservice: u8, handler: SubService) -> Result<()> {
        let subs = self.services.entry(service).or_default();
        if subs.contains_key(&subservice) {
            return Err(Error::Config(format!(
                "PUS sub-service ({service},{subservice}) registered twice"
            )));
        }
        subs.insert(subservice, handler);
        Ok(())
    }

    /// Register all sub-services of `service`.
    ///
    /// # Errors
    /// [Error::Config] if any of its sub-services is already registered.
    pub fn add_service(&mut self, service: &dyn PusService) -> Result<()> {
        let st = service.service_type();
        for (subservice, handler) in service.subservices() {
            self.register(st, subservice, handler)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn tm_layout(mut self, layout: PusTmLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn build(self) -> PusServiceRegistry {
        PusServiceRegistry {
            services: self
                .services
                .into_iter()
                .map(|(st, subs)| (st, subs.into_iter().collect()))
                .collect(),
            layout: self.layout,
        }
    }
}

/// Routes commands and telemetry to the sub-service registered for their PUS service and
/// sub-service type.
///
/// The set of sub-services is fixed once built.
#[derive(Debug)]
pub struct PusServiceRegistry {
    services: HashMap<u8, HashMap<u8, SubService>>,
    layout: PusTmLayout,
}

impl PusServiceRegistry {
    /// Service types in [PusServiceRegistry::from_config] registration order.
    pub const STANDARD_SERVICES: [u8; 5] = [1, 3, 5, 11, 17];

    #[must_use]
    pub fn builder() -> PusServiceRegistryBuilder {
        PusServiceRegistryBuilder::default()
    }

    /// Registry with the standard services enabled in `config`.
    ///
    /// # Errors
    /// [Error::Config] if `config` names a service without a standard implementation.
    pub fn from_config(config: &PusConfig) -> Result<Self> {
        let enabled: &[u8] = if config.services.is_empty() {
            &Self::STANDARD_SERVICES
        } else {
            &config.services
        };

        let mut builder = Self::builder().tm_layout(config.tm_layout());
        for st in enabled {
            match st {
                1 => builder.add_service(&VerificationService::new(config))?,
                3 => builder.add_service(&HousekeepingService::new(config))?,
                5 => builder.add_service(&EventReportingService::new(config))?,
                11 => builder.add_service(&TimeSchedulingService::new(config))?,
                17 => builder.add_service(&TestService::new(config))?,
                _ => {
                    return Err(Error::Config(format!(
                        "no implementation for PUS service {st}"
                    )))
                }
            }
        }
        Ok(builder.build())
    }

    #[must_use]
    pub fn tm_layout(&self) -> PusTmLayout {
        self.layout
    }

    /// Handler for `(service, subservice)`.
    ///
    /// # Errors
    /// [Error::UnknownService] or [Error::UnknownSubService] if nothing is registered.
    pub fn lookup(&self, service: u8, subservice: u8) -> Result<&SubService> {
        self.services
            .get(&service)
            .ok_or(Error::UnknownService(service))?
            .get(&subservice)
            .ok_or(Error::UnknownSubService {
                service,
                subservice,
            })
    }

    /// Apply the command modifier registered for the command's service and sub-service.
    ///
    /// # Errors
    /// [Error::Framing] if the command has no PUS TC header, lookup errors as in
    /// [PusServiceRegistry::lookup], [Error::UnsupportedDirection] if the sub-service is
    /// telemetry only, or the modifier's error.
    pub fn modify_command(&self, command: PreparedCommand) -> Result<PreparedCommand> {
        let header = PusHeader::decode(&command.binary)
            .filter(|h| h.direction == Direction::Telecommand)
            .ok_or_else(|| {
                Error::Framing(format!(
                    "command {} has no PUS TC header",
                    command.id.command_name
                ))
            })?;
        match self.lookup(header.service, header.subservice)? {
            SubService::Command(modifier) => modifier.modify_command(command),
            SubService::Telemetry(_) => Err(Error::UnsupportedDirection {
                service: header.service,
                subservice: header.subservice,
                direction: Direction::Telecommand,
            }),
        }
    }

    /// Apply the telemetry processor registered for the packet's service and sub-service.
    ///
    /// # Errors
    /// Lookup errors as in [PusServiceRegistry::lookup], [Error::UnsupportedDirection] if
    /// the sub-service is telecommand only, or the processor's error.
    pub fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let (service, subservice) = (packet.header().service, packet.header().subservice);
        match self.lookup(service, subservice)? {
            SubService::Telemetry(processor) => processor.process_telemetry(packet),
            SubService::Command(_) => Err(Error::UnsupportedDirection {
                service,
                subservice,
                direction: Direction::Telemetry,
            }),
        }
    }

    /// Decode the PUS header of `packet` using this registry's layout and dispatch it.
    ///
    /// # Errors
    /// See [PusTmPacket::new] and [PusServiceRegistry::process_telemetry].
    pub fn process_packet(&self, packet: TmPacket) -> Result<Vec<TmPacket>> {
        self.process_telemetry(PusTmPacket::new(packet, self.layout)?)
    }
}

/// Sink dispatching PUS telemetry through a [PusServiceRegistry] before handing the
/// resulting packets to the next sink.
///
/// Packets that are not PUS telemetry, are invalid, or have no registered sub-service are
/// forwarded unchanged. Packets failing their sub-service are dropped.
pub struct PusTmSink {
    registry: Arc<PusServiceRegistry>,
    next: Arc<dyn TmSink>,
}

impl PusTmSink {
    #[must_use]
    pub fn new(registry: Arc<PusServiceRegistry>, next: Arc<dyn TmSink>) -> Self {
        Self { registry, next }
    }
}

impl TmSink for PusTmSink {
    fn process_packet(&self, mut packet: TmPacket) {
        let header = match PusHeader::decode(&packet.payload) {
            Some(h) if h.direction == Direction::Telemetry && !packet.invalid => h,
            _ => return self.next.process_packet(packet),
        };
        packet.set_metadata(METADATA_SERVICE, header.service);
        packet.set_metadata(METADATA_SUBSERVICE, header.subservice);

        if let Err(err) = self.registry.lookup(header.service, header.subservice) {
            debug!(apid = header.apid, "{err}; forwarding packet");
            return self.next.process_packet(packet);
        }
        match self.registry.process_packet(packet) {
            Ok(packets) => {
                for packet in packets {
                    self.next.process_packet(packet);
                }
            }
            Err(err) => warn!(
                apid = header.apid,
                seq = header.seq_count,
                "dropping PUS ({},{}) packet: {err}",
                header.service,
                header.subservice
            ),
        }
    }

    fn update_stats(&self, link: &str, stats: LinkStatsSnapshot) {
        self.next.update_stats(link, stats);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::pus::tests::tm;
    use crate::spacepacket::CommandId;

    struct Echo;

    impl TelemetryProcessor for Echo {
        fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
            Ok(vec![packet.into_packet()])
        }
    }

    struct Stamp;

    impl CommandModifier for Stamp {
        fn modify_command(&self, mut command: PreparedCommand) -> Result<PreparedCommand> {
            command.binary.push(0xff);
            Ok(command)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<TmPacket>>);

    impl TmSink for Collect {
        fn process_packet(&self, packet: TmPacket) {
            self.0.lock().unwrap().push(packet);
        }
    }

    fn registry() -> PusServiceRegistry {
        let mut builder = PusServiceRegistry::builder();
        builder
            .register(5, 5, SubService::Command(Arc::new(Stamp)))
            .unwrap();
        builder
            .register(5, 6, SubService::Telemetry(Arc::new(Echo)))
            .unwrap();
        builder
            .register(5, 7, SubService::Command(Arc::new(Stamp)))
            .unwrap();
        builder.build()
    }

    fn tc(service: u8, subservice: u8) -> PreparedCommand {
        let binary = vec![0x18, 0x10, 0xc0, 0x00, 0x00, 0x04, 0x29, service, subservice, 0, 0];
        PreparedCommand::new(CommandId::default(), binary)
    }

    #[test]
    fn test_lookup() {
        let registry = registry();

        assert_eq!(
            registry.lookup(5, 6).unwrap().direction(),
            Direction::Telemetry
        );
        assert!(matches!(
            registry.lookup(6, 1),
            Err(Error::UnknownService(6))
        ));
        assert!(matches!(
            registry.lookup(5, 99),
            Err(Error::UnknownSubService {
                service: 5,
                subservice: 99
            })
        ));
    }

    #[test]
    fn test_modify_command() {
        let command = registry().modify_command(tc(5, 5)).unwrap();
        assert_eq!(command.binary.last(), Some(&0xff));
    }

    #[test]
    fn test_modify_command_on_telemetry_subservice() {
        let zult = registry().modify_command(tc(5, 6));
        assert!(
            matches!(
                zult,
                Err(Error::UnsupportedDirection {
                    service: 5,
                    subservice: 6,
                    direction: Direction::Telecommand
                })
            ),
            "{zult:?}"
        );
    }

    #[test]
    fn test_process_telemetry_on_command_subservice() {
        let packet = TmPacket::new(0, tm(5, 7, &[]));
        let zult = registry().process_packet(packet);
        assert!(
            matches!(zult, Err(Error::UnsupportedDirection { .. })),
            "{zult:?}"
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let mut builder = PusServiceRegistry::builder();
        builder
            .register(17, 1, SubService::Command(Arc::new(Stamp)))
            .unwrap();
        let zult = builder.register(17, 1, SubService::Command(Arc::new(Stamp)));
        assert!(matches!(zult, Err(Error::Config(_))), "{zult:?}");
    }

    #[test]
    fn test_from_config_standard_services() {
        let registry = PusServiceRegistry::from_config(&PusConfig::default()).unwrap();

        for (st, sst) in [(1, 1), (3, 25), (5, 4), (11, 4), (11, 10), (17, 2)] {
            assert!(registry.lookup(st, sst).is_ok(), "({st},{sst})");
        }
    }

    #[test]
    fn test_from_config_verification_widths() {
        let config = PusConfig {
            services: vec![1],
            failure_code_length: 4,
            ..PusConfig::default()
        };
        let registry = PusServiceRegistry::from_config(&config).unwrap();
        // TM[1,2] with a two byte code is short for a four byte failure code
        let packet = TmPacket::new(0, tm(1, 2, &[0x18, 0x10, 0xc0, 0x07, 0x01, 0x02]));

        let zult = registry.process_packet(packet);

        assert!(matches!(zult, Err(Error::NotEnoughData { .. })), "{zult:?}");
    }

    #[test]
    fn test_from_config_unknown_service() {
        let config = PusConfig {
            services: vec![1, 42],
            ..PusConfig::default()
        };
        let zult = PusServiceRegistry::from_config(&config);
        assert!(matches!(zult, Err(Error::Config(_))), "{zult:?}");
    }

    #[test]
    fn test_sink_forwards_unknown_and_non_pus() {
        let next = Arc::new(Collect::default());
        let sink = PusTmSink::new(Arc::new(registry()), next.clone());

        sink.process_packet(TmPacket::new(0, tm(6, 1, &[])));
        sink.process_packet(TmPacket::new(0, vec![0x00, 0x01, 0xc0, 0x00, 0x00, 0x00, 0x00]));
        sink.process_packet(TmPacket::new(0, tm(5, 6, &[])));

        let got = next.0.lock().unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(
            got[2].metadata(METADATA_SUBSERVICE),
            Some(&crate::spacepacket::MetadataValue::Int(6))
        );
    }

    #[test]
    fn test_sink_drops_failed_packets() {
        let next = Arc::new(Collect::default());
        let sink = PusTmSink::new(Arc::new(registry()), next.clone());

        sink.process_packet(TmPacket::new(0, tm(5, 7, &[])));

        assert!(next.0.lock().unwrap().is_empty());
    }
}
