use std::sync::Arc;

use crate::pus::{read_uint, PusConfig, PusService, PusTmPacket, SubService, TelemetryProcessor};
use crate::spacepacket::{PrimaryHeader, TmPacket};
use crate::{Error, Result};

/// Metadata name for the APID of the verified request
pub const METADATA_REQUEST_APID: &str = "pus.request_apid";
/// Metadata name for the sequence count of the verified request
pub const METADATA_REQUEST_SEQ_COUNT: &str = "pus.request_seq_count";
/// Metadata name for the verification stage outcome
pub const METADATA_SUCCESS: &str = "pus.success";
/// Metadata name for the step of a progress report
pub const METADATA_STEP_ID: &str = "pus.step_id";
/// Metadata name for the failure notice code of a failure report
pub const METADATA_FAILURE_CODE: &str = "pus.failure_code";

/// ST[1] request verification: TM[1,1] to TM[1,8] acceptance, start, progress and
/// completion reports.
#[derive(Debug, Clone, Copy)]
pub struct VerificationService {
    pub step_id_length: usize,
    pub failure_code_length: usize,
}

impl Default for VerificationService {
    fn default() -> Self {
        Self {
            step_id_length: 1,
            failure_code_length: 2,
        }
    }
}

impl VerificationService {
    const REQUEST_ID_LEN: usize = 4;

    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            step_id_length: config.step_id_length,
            failure_code_length: config.failure_code_length,
        }
    }
}

impl PusService for VerificationService {
    fn service_type(&self) -> u8 {
        1
    }

    fn subservices(&self) -> Vec<(u8, SubService)> {
        let processor: Arc<dyn TelemetryProcessor> = Arc::new(*self);
        (1..=8)
            .map(|sst| (sst, SubService::Telemetry(processor.clone())))
            .collect()
    }
}

impl TelemetryProcessor for VerificationService {
    fn process_telemetry(&self, packet: PusTmPacket) -> Result<Vec<TmPacket>> {
        let subservice = packet.header().subservice;
        let data = packet.data_field();
        // request id: packet id and packet sequence control of the request
        if data.len() < Self::REQUEST_ID_LEN {
            return Err(Error::NotEnoughData {
                actual: data.len(),
                minimum: Self::REQUEST_ID_LEN,
            });
        }
        let apid = u16::from_be_bytes([data[0], data[1]]) & 0x7ff;
        let seq = u16::from_be_bytes([data[2], data[3]]) & PrimaryHeader::SEQ_MAX;

        let success = subservice % 2 == 1;
        let mut offset = Self::REQUEST_ID_LEN;
        let step = if matches!(subservice, 5 | 6) {
            let step = read_uint(data, offset, self.step_id_length);
            offset += self.step_id_length;
            step
        } else {
            None
        };
        let failure_code = if success {
            None
        } else {
            Some(
                read_uint(data, offset, self.failure_code_length).ok_or(
                    Error::NotEnoughData {
                        actual: data.len(),
                        minimum: offset + self.failure_code_length,
                    },
                )?,
            )
        };

        let mut packet = packet.into_packet();
        packet.set_metadata(METADATA_REQUEST_APID, apid);
        packet.set_metadata(METADATA_REQUEST_SEQ_COUNT, seq);
        packet.set_metadata(METADATA_SUCCESS, success);
        if let Some(step) = step {
            packet.set_metadata(METADATA_STEP_ID, step as i64);
        }
        if let Some(code) = failure_code {
            packet.set_metadata(METADATA_FAILURE_CODE, code as i64);
        }
        Ok(vec![packet])
    }
}
