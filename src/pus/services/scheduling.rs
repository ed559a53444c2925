use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{command_subservices, TcHeaderStamp};
use crate::pus::{
    read_uint, write_uint, PusConfig, PusHeader, PusService, PusTmPacket, SubService,
    TelemetryProcessor, PUS_VERSION,
};
use crate::spacepacket::{
    Apid, AttributeValue, PreparedCommand, PrimaryHeader, TmPacket, SEQ_UNSEGMENTED,
};
use crate::{Error, Result};

/// Metadata name for the release time, Unix milliseconds, of a scheduled activity
pub const METADATA_RELEASE_TIME: &str = "pus.release_time";
/// Metadata name for the APID of a scheduled telecommand
pub const METADATA_TC_APID: &str = "pus.tc_apid";
/// Metadata name for the sequence count of a scheduled telecommand
pub const METADATA_TC_SEQ_COUNT: &str = "pus.tc_seq_count";
/// Metadata name for the source id of a scheduled telecommand
pub const METADATA_TC_SOURCE_ID: &str = "pus.tc_source_id";
/// Metadata name for the service type of a scheduled telecommand
pub const METADATA_TC_SERVICE: &str = "pus.tc_service";
/// Metadata name for the sub-service type of a scheduled telecommand
pub const METADATA_TC_SUBSERVICE: &str = "pus.tc_subservice";
/// Metadata name for the number of activities in a schedule report
pub const METADATA_ACTIVITY_COUNT: &str = "pus.activity_count";

/// Command attribute set on a time-tag wrapper, naming the APID of the wrapped command
pub const ATTR_WRAPPED_APID: &str = "timetagged_apid";
/// Command attribute set on a time-tag wrapper, naming the sequence count of the wrapped
/// command
pub const ATTR_WRAPPED_SEQ_COUNT: &str = "timetagged_seq_count";

/// Unit of the on-board release time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimetagResolution {
    #[default]
    Second,
    Millisecond,
}

impl TimetagResolution {
    fn to_tag(self, millis: i64) -> i64 {
        match self {
            TimetagResolution::Second => millis / 1000,
            TimetagResolution::Millisecond => millis,
        }
    }

    fn to_millis(self, value: i64) -> i64 {
        match self {
            TimetagResolution::Second => value.saturating_mul(1000),
            TimetagResolution::Millisecond => value,
        }
    }
}

/// ST[11] time-based scheduling options.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// APID of TC[11,4] time-tag wrappers; the wrapped command's APID if not set
    pub apid: Option<Apid>,
    /// Length of release time fields
    pub timetag_length: usize,
    pub timetag_resolution: TimetagResolution,
    /// Minimum time, seconds, between now and the release time of a time-tagged command
    pub timetag_buffer: i64,
    /// Length of the activity count field
    pub count_length: usize,
    /// Fail commands released less than `timetag_buffer` from now instead of sending them
    /// without a time-tag
    pub reject_early_timetag: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            apid: None,
            timetag_length: 8,
            timetag_resolution: TimetagResolution::Second,
            timetag_buffer: 5,
            count_length: 1,
            reject_early_timetag: false,
        }
    }
}

/// Wraps time-tagged commands into TC[11,4] insert activities requests.
#[derive(Debug, Clone, Copy)]
pub struct TimeTagger {
    stamp: TcHeaderStamp,
    config: ScheduleConfig,
}

impl TimeTagger {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            stamp: TcHeaderStamp::new(config),
            config: config.schedule,
        }
    }

    /// Release time, Unix milliseconds, of `command`, if it is time-tagged.
    ///
    /// A time-tag of zero means the command is released immediately.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if the time-tag is not an integer or is negative.
    pub fn release_time(command: &PreparedCommand) -> Result<Option<i64>> {
        match command.attribute(PreparedCommand::TIMETAG) {
            None | Some(AttributeValue::Int(0)) => Ok(None),
            Some(AttributeValue::Int(t)) if *t > 0 => Ok(Some(*t)),
            Some(v) => Err(Error::InvalidArgument(format!(
                "invalid time-tag {v:?} for command {}",
                command.id.command_name
            ))),
        }
    }

    /// Wrap `command` into a TC[11,4] if it is time-tagged, otherwise return it unchanged.
    ///
    /// `command` must be complete, i.e., post-processed; the wrapper's sequence count,
    /// length and checkword are left to the post-processor. Only wrappers carry the
    /// [ATTR_WRAPPED_APID] attribute.
    ///
    /// A release time less than the configured buffer after `now` is dropped, and the
    /// command returned without its time-tag, unless
    /// [ScheduleConfig::reject_early_timetag] is set.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if the time-tag is invalid, is rejected as too early, or
    /// the command has no primary header.
    pub fn wrap(&self, mut command: PreparedCommand, now: i64) -> Result<PreparedCommand> {
        let Some(release) = Self::release_time(&command)? else {
            return Ok(command);
        };
        let earliest = now.saturating_add(self.config.timetag_buffer.saturating_mul(1000));
        if release < earliest {
            if self.config.reject_early_timetag {
                return Err(Error::InvalidArgument(format!(
                    "release time {release} of command {} is before {earliest}",
                    command.id.command_name
                )));
            }
            warn!(
                command = %command.id.command_name,
                release = release,
                earliest = earliest,
                "time-tag too early; sending command without time-tag"
            );
            command.attributes.remove(PreparedCommand::TIMETAG);
            return Ok(command);
        }
        let inner = command.header().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "command {} has no primary header",
                command.id.command_name
            ))
        })?;

        let mut binary = Vec::with_capacity(
            PusHeader::TC_LEN
                + self.config.count_length
                + self.config.timetag_length
                + command.binary.len(),
        );
        let header = PrimaryHeader {
            version: 0,
            type_flag: PrimaryHeader::TYPE_TC,
            has_secondary_header: true,
            apid: self.config.apid.unwrap_or(inner.apid),
            sequence_flags: SEQ_UNSEGMENTED,
            sequence_id: 0,
            len_minus1: 0,
        };
        binary.extend_from_slice(&header.encode());
        binary.extend_from_slice(&[PUS_VERSION << 4, 11, 4, 0, 0]);
        self.stamp.stamp(&mut binary)?;
        write_uint(&mut binary, 1, self.config.count_length);
        let tag = self.config.timetag_resolution.to_tag(release);
        write_uint(&mut binary, tag as u64, self.config.timetag_length);
        binary.extend_from_slice(&command.binary);
        let len = u16::try_from(binary.len() - PrimaryHeader::LEN - 1).map_err(|_| {
            Error::InvalidArgument(format!(
                "command {} too long to time-tag",
                command.id.command_name
            ))
        })?;
        binary[4..6].copy_from_slice(&len.to_be_bytes());

        debug!(
            apid = inner.apid,
            seq = inner.sequence_id,
            release = release,
            "wrapped time-tagged command"
        );

        let mut wrapper = PreparedCommand::new(command.id, binary);
        wrapper.attributes = command.attributes;
        wrapper.attributes.remove(PreparedCommand::TIMETAG);
        Ok(wrapper
            .with_attribute(ATTR_WRAPPED_APID, AttributeValue::Int(i64::from(inner.apid)))
            .with_attribute(
                ATTR_WRAPPED_SEQ_COUNT,
                AttributeValue::Int(i64::from(inner.sequence_id)),
            ))
    }
}

/// TM[11,10] time-based schedule detail report.
///
/// Each scheduled activity, a release time followed by the scheduled telecommand, becomes
/// its own packet with the report's headers and metadata describing the telecommand.
#[derive(Debug, Clone, Copy)]
pub struct DetailReport {
    config: ScheduleConfig,
}

impl DetailReport {
    fn activity(
        &self,
        report: &PusTmPacket,
        release: i64,
        activity: &[u8],
    ) -> Result<TmPacket> {
        let tc = &activity[self.config.timetag_length..];
        let header = PusHeader::decode(tc).ok_or_else(|| {
            Error::Framing("scheduled activity has no PUS TC header".to_string())
        })?;

        let mut payload = report.headers().to_vec();
        payload.extend_from_slice(activity);
        let len = u16::try_from(payload.len() - PrimaryHeader::LEN - 1)
            .map_err(|_| Error::Overflow)?;
        payload[4..6].copy_from_slice(&len.to_be_bytes());

        let mut packet = report.packet().clone();
        packet.payload = payload;
        packet.set_metadata(
            METADATA_RELEASE_TIME,
            self.config.timetag_resolution.to_millis(release),
        );
        packet.set_metadata(METADATA_TC_APID, header.apid);
        packet.set_metadata(METADATA_TC_SEQ_COUNT, header.seq_count);
        packet.set_metadata(METADATA_TC_SOURCE_ID, header.id);
        packet.set_metadata(METADATA_TC_SERVICE, header.service);
        packet.set_metadata(METADATA_TC_SUBSERVICE, header.subservice);
        Ok(packet)
    }
}

impl TelemetryProcessor for DetailReport {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let data = packet.data_field();
        let count = read_uint(data, 0, self.config.count_length).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: self.config.count_length,
        })?;

        let mut zult = Vec::new();
        let mut offset = self.config.count_length;
        for _ in 0..count {
            let tc_start = offset + self.config.timetag_length;
            let release = read_uint(data, offset, self.config.timetag_length);
            let tc_len = data
                .get(tc_start..)
                .and_then(PrimaryHeader::decode)
                .map(|h| h.packet_len());
            let (Some(release), Some(tc_len)) = (release, tc_len) else {
                return Err(Error::Framing(format!(
                    "schedule detail report truncated at activity {}",
                    zult.len()
                )));
            };
            let end = tc_start + tc_len;
            let activity = data.get(offset..end).ok_or_else(|| {
                Error::Framing(format!(
                    "scheduled telecommand {} extends past the report",
                    zult.len()
                ))
            })?;
            zult.push(self.activity(&packet, release as i64, activity)?);
            offset = end;
        }
        Ok(zult)
    }
}

/// TM[11,13] time-based schedule summary report.
#[derive(Debug, Clone, Copy)]
pub struct SummaryReport {
    count_length: usize,
}

impl TelemetryProcessor for SummaryReport {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let data = packet.data_field();
        let count = read_uint(data, 0, self.count_length).ok_or(Error::NotEnoughData {
            actual: data.len(),
            minimum: self.count_length,
        })?;
        let mut packet = packet.into_packet();
        packet.set_metadata(METADATA_ACTIVITY_COUNT, count as i64);
        Ok(vec![packet])
    }
}

/// ST[11] time-based scheduling.
///
/// Telecommands: TC[11,1] enable and TC[11,2] disable the release function, TC[11,3]
/// reset, TC[11,4] insert activities. Telemetry: TM[11,10] detail and TM[11,13] summary
/// reports.
#[derive(Debug, Clone)]
pub struct TimeSchedulingService {
    stamp: TcHeaderStamp,
    config: ScheduleConfig,
}

impl TimeSchedulingService {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            stamp: TcHeaderStamp::new(config),
            config: config.schedule,
        }
    }
}

impl PusService for TimeSchedulingService {
    fn service_type(&self) -> u8 {
        11
    }

    fn subservices(&self) -> Vec<(u8, SubService)> {
        let mut subs = command_subservices(self.stamp, &[1, 2, 3, 4]);
        subs.push((
            10,
            SubService::Telemetry(Arc::new(DetailReport {
                config: self.config,
            })),
        ));
        subs.push((
            13,
            SubService::Telemetry(Arc::new(SummaryReport {
                count_length: self.config.count_length,
            })),
        ));
        subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pus::tests::tm;
    use crate::pus::PusTmLayout;
    use crate::spacepacket::{CommandId, MetadataValue};

    fn tc17(seq: u8) -> Vec<u8> {
        vec![0x18, 0x20, 0xc0, seq, 0x00, 0x04, 0x29, 17, 1, 0x00, 0x07]
    }

    fn tagger() -> TimeTagger {
        let config = PusConfig {
            source_id: 7,
            ..PusConfig::default()
        };
        TimeTagger::new(&config)
    }

    #[test]
    fn test_wrap_untagged_command() {
        let command = PreparedCommand::new(CommandId::default(), tc17(1));

        let zult = tagger().wrap(command.clone(), 0).unwrap();

        assert_eq!(zult, command);
    }

    #[test]
    fn test_wrap_time_tagged_command() {
        let command = PreparedCommand::new(CommandId::default(), tc17(1))
            .with_attribute(PreparedCommand::TIMETAG, AttributeValue::Int(1_000_000));

        let zult = tagger().wrap(command, 0).unwrap();

        let header = PusHeader::decode(&zult.binary).unwrap();
        assert_eq!((header.service, header.subservice), (11, 4));
        assert_eq!(header.apid, 32);
        assert_eq!(header.id, 7);
        // count, release time (seconds), wrapped command
        assert_eq!(zult.binary[11], 1);
        assert_eq!(&zult.binary[12..20], &1000u64.to_be_bytes());
        assert_eq!(&zult.binary[20..], &tc17(1)[..]);
        let primary = zult.header().unwrap();
        assert_eq!(primary.packet_len(), zult.binary.len());
        assert_eq!(zult.attribute(PreparedCommand::TIMETAG), None);
        assert_eq!(
            zult.attribute(ATTR_WRAPPED_SEQ_COUNT),
            Some(&AttributeValue::Int(1))
        );
    }

    #[test]
    fn test_wrap_sends_early_release_untagged() {
        let command = PreparedCommand::new(CommandId::default(), tc17(1))
            .with_attribute(PreparedCommand::TIMETAG, AttributeValue::Int(1_000_000));

        let zult = tagger().wrap(command, 999_000).unwrap();

        assert_eq!(zult.binary, tc17(1));
        assert_eq!(zult.attribute(PreparedCommand::TIMETAG), None);
        assert_eq!(zult.attribute(ATTR_WRAPPED_APID), None);
    }

    #[test]
    fn test_wrap_rejects_early_release_when_configured() {
        let mut config = PusConfig::default();
        config.schedule.reject_early_timetag = true;
        let command = PreparedCommand::new(CommandId::default(), tc17(1))
            .with_attribute(PreparedCommand::TIMETAG, AttributeValue::Int(1_000_000));

        let zult = TimeTagger::new(&config).wrap(command, 999_000);

        assert!(matches!(zult, Err(Error::InvalidArgument(_))), "{zult:?}");
    }

    #[test]
    fn test_wrap_rejects_negative_timetag() {
        let command = PreparedCommand::new(CommandId::default(), tc17(1))
            .with_attribute(PreparedCommand::TIMETAG, AttributeValue::Int(-1));

        let zult = tagger().wrap(command, 0);

        assert!(matches!(zult, Err(Error::InvalidArgument(_))), "{zult:?}");
    }

    #[test]
    fn test_detail_report_split() {
        let mut data = vec![2];
        data.extend_from_slice(&100u64.to_be_bytes());
        data.extend_from_slice(&tc17(1));
        data.extend_from_slice(&200u64.to_be_bytes());
        data.extend_from_slice(&tc17(2));
        let packet = PusTmPacket::new(
            TmPacket::new(0, tm(11, 10, &data)),
            PusTmLayout::default(),
        )
        .unwrap();
        let report = DetailReport {
            config: ScheduleConfig::default(),
        };

        let zult = report.process_telemetry(packet).unwrap();

        assert_eq!(zult.len(), 2);
        for (packet, (release, seq)) in zult.iter().zip([(100_000, 1), (200_000, 2)]) {
            assert_eq!(
                packet.metadata(METADATA_RELEASE_TIME),
                Some(&MetadataValue::Int(release))
            );
            assert_eq!(
                packet.metadata(METADATA_TC_SEQ_COUNT),
                Some(&MetadataValue::Int(seq))
            );
            assert_eq!(
                packet.metadata(METADATA_TC_SERVICE),
                Some(&MetadataValue::Int(17))
            );
            assert_eq!(
                packet.metadata(METADATA_TC_SOURCE_ID),
                Some(&MetadataValue::Int(7))
            );
            assert_eq!(packet.header().unwrap().packet_len(), packet.payload.len());
            assert_eq!(packet.payload.len(), 20 + 8 + 11);
        }
    }

    #[test]
    fn test_detail_report_truncated() {
        let mut data = vec![2];
        data.extend_from_slice(&100u64.to_be_bytes());
        data.extend_from_slice(&tc17(1));
        data.extend_from_slice(&200u64.to_be_bytes());
        let packet = PusTmPacket::new(
            TmPacket::new(0, tm(11, 10, &data)),
            PusTmLayout::default(),
        )
        .unwrap();
        let report = DetailReport {
            config: ScheduleConfig::default(),
        };

        let zult = report.process_telemetry(packet);

        assert!(matches!(zult, Err(Error::Framing(_))), "{zult:?}");
    }

    #[test]
    fn test_summary_report() {
        let zult = SummaryReport { count_length: 1 }
            .process_telemetry(
                PusTmPacket::new(TmPacket::new(0, tm(11, 13, &[3])), PusTmLayout::default())
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(
            zult[0].metadata(METADATA_ACTIVITY_COUNT),
            Some(&MetadataValue::Int(3))
        );
    }
}
