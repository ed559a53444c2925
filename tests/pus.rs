use std::sync::Arc;

use ccsds_link::framing::TmSink;
use ccsds_link::pus::services::{
    METADATA_RELEASE_TIME, METADATA_REQUEST_APID, METADATA_SEVERITY, METADATA_TC_APID,
    METADATA_TC_SERVICE,
};
use ccsds_link::pus::{
    PusConfig, PusHeader, PusServiceRegistry, PusTmSink, METADATA_SERVICE, METADATA_SUBSERVICE,
};
use ccsds_link::spacepacket::{CommandId, MetadataValue, PreparedCommand, TmPacket};
use ccsds_link::{Direction, Error};

mod common;
use common::{pus_tc, pus_tm, Collect};

fn registry(config: &PusConfig) -> Arc<PusServiceRegistry> {
    Arc::new(PusServiceRegistry::from_config(config).unwrap())
}

fn command(binary: Vec<u8>) -> PreparedCommand {
    PreparedCommand::new(CommandId::default(), binary)
}

#[test]
fn test_unknown_subservice() {
    let zult = registry(&PusConfig::default()).modify_command(command(pus_tc(16, 5, 99, &[])));

    assert!(
        matches!(
            zult,
            Err(Error::UnknownSubService {
                service: 5,
                subservice: 99
            })
        ),
        "{zult:?}"
    );
}

#[test]
fn test_unknown_service() {
    let zult = registry(&PusConfig::default()).modify_command(command(pus_tc(16, 200, 1, &[])));

    assert!(matches!(zult, Err(Error::UnknownService(200))), "{zult:?}");
}

#[test]
fn test_command_for_telemetry_subservice() {
    let zult = registry(&PusConfig::default()).modify_command(command(pus_tc(16, 5, 1, &[])));

    assert!(
        matches!(
            zult,
            Err(Error::UnsupportedDirection {
                service: 5,
                subservice: 1,
                direction: Direction::Telecommand
            })
        ),
        "{zult:?}"
    );
}

#[test]
fn test_command_stamped_with_source_id() {
    let config = PusConfig {
        source_id: 0x0a0b,
        ..PusConfig::default()
    };

    let zult = registry(&config)
        .modify_command(command(pus_tc(16, 5, 6, &[0x00, 0x01])))
        .unwrap();

    let header = PusHeader::decode(&zult.binary).unwrap();
    assert_eq!(header.id, 0x0a0b);
    assert_eq!(header.pus_version, 2);
    assert_eq!(header.ack_flags, config.ack_flags);
    assert_eq!(&zult.binary[11..], &[0x00, 0x01]);
}

#[test]
fn test_disabled_service() {
    let config = PusConfig {
        services: vec![1, 17],
        ..PusConfig::default()
    };

    let zult = registry(&config).modify_command(command(pus_tc(16, 5, 6, &[])));

    assert!(matches!(zult, Err(Error::UnknownService(5))), "{zult:?}");
}

#[test]
fn test_sink_dispatches_event_report() {
    let next = Arc::new(Collect::default());
    let sink = PusTmSink::new(registry(&PusConfig::default()), next.clone());

    sink.process_packet(TmPacket::new(0, pus_tm(5, 3, &[0x00, 0x2a, 0xff])));

    let packets = next.packets.lock().unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(
        packets[0].metadata(METADATA_SERVICE),
        Some(&MetadataValue::Int(5))
    );
    assert_eq!(
        packets[0].metadata(METADATA_SUBSERVICE),
        Some(&MetadataValue::Int(3))
    );
    assert_eq!(
        packets[0].metadata(METADATA_SEVERITY),
        Some(&MetadataValue::String("MEDIUM".to_string()))
    );
}

#[test]
fn test_sink_forwards_unregistered_telemetry() {
    let next = Arc::new(Collect::default());
    let sink = PusTmSink::new(registry(&PusConfig::default()), next.clone());
    let payload = pus_tm(128, 1, &[1, 2, 3]);

    sink.process_packet(TmPacket::new(0, payload.clone()));
    // not a PUS packet
    sink.process_packet(TmPacket::new(0, vec![0x00, 0x01, 0xc0, 0x00, 0x00, 0x00, 0xff]));

    let packets = next.packets.lock().unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].payload, payload);
    assert_eq!(
        packets[0].metadata(METADATA_SERVICE),
        Some(&MetadataValue::Int(128))
    );
    assert_eq!(packets[1].metadata(METADATA_SERVICE), None);
}

#[test]
fn test_sink_drops_failed_telemetry() {
    let next = Arc::new(Collect::default());
    let sink = PusTmSink::new(registry(&PusConfig::default()), next.clone());

    // verification report too short for the request id
    sink.process_packet(TmPacket::new(0, pus_tm(1, 1, &[0x18])));
    sink.process_packet(TmPacket::new(0, pus_tm(1, 1, &[0x18, 0x10, 0xc0, 0x00])));

    let packets = next.packets.lock().unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(
        packets[0].metadata(METADATA_REQUEST_APID),
        Some(&MetadataValue::Int(16))
    );
}

#[test]
fn test_sink_splits_schedule_detail_report() {
    let next = Arc::new(Collect::default());
    let sink = PusTmSink::new(registry(&PusConfig::default()), next.clone());
    let first = pus_tc(16, 17, 1, &[]);
    let second = pus_tc(17, 3, 5, &[0x00, 0x01]);
    let mut data = vec![2];
    data.extend_from_slice(&100u64.to_be_bytes());
    data.extend_from_slice(&first);
    data.extend_from_slice(&200u64.to_be_bytes());
    data.extend_from_slice(&second);

    sink.process_packet(TmPacket::new(0, pus_tm(11, 10, &data)));

    let packets = next.packets.lock().unwrap();
    assert_eq!(packets.len(), 2);
    for (packet, (apid, service, release)) in packets.iter().zip([(16, 17, 100), (17, 3, 200)]) {
        assert_eq!(
            packet.metadata(METADATA_TC_APID),
            Some(&MetadataValue::Int(apid))
        );
        assert_eq!(
            packet.metadata(METADATA_TC_SERVICE),
            Some(&MetadataValue::Int(service))
        );
        assert_eq!(
            packet.metadata(METADATA_RELEASE_TIME),
            Some(&MetadataValue::Int(release * 1000))
        );
        let header = packet.header().unwrap();
        assert_eq!(header.packet_len(), packet.payload.len());
    }
    assert!(packets[1].payload.ends_with(&second));
}
