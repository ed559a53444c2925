//! JSON link configuration.
//!
//! A [LinkConfig] describes one physical link: its frame format and coding, the virtual
//! channels to extract packets from, PUS options and the uplink.
//!
//! ```
//! use ccsds_link::config::LinkConfig;
//!
//! let config: LinkConfig = r#"{
//!     "name": "tm",
//!     "frame": {"type": "TM", "frame_length": 1115, "fecf": true},
//!     "reed_solomon": {"interleave": 5},
//!     "derandomize": true,
//!     "virtual_channels": [
//!         {"vcid": 0, "preprocessor": {"error_detection": "CRC-16-CCIIT"}},
//!         {"vcid": 1, "enabled": false}
//!     ]
//! }"#.parse().unwrap();
//!
//! assert_eq!(config.virtual_channels.len(), 2);
//! ```
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::framing::{
    AosFrameDecoder, DefaultDerandomizer, DownlinkLink, FrameDecoder, IntegrityAlgorithm,
    ReedSolomonIntegrity, Scid, TmFrameDecoder, TmSink, VcOptions, Vcid,
};
use crate::pus::services::TimeTagger;
use crate::pus::{PusConfig, PusServiceRegistry, PusTmSink};
use crate::rs::{ReedSolomon, ReedSolomonParams};
use crate::spacepacket::{
    DefaultPacketPreprocessor, ErrorDetection, PacketPreprocessor, SequenceChecker,
};
use crate::time::TimeService;
use crate::timecode::{
    ByteOrder, CucTimeDecoder, FixedSizeTimeDecoder, Float64TimeDecoder, TimeDecoder,
    TimeEpoch,
};
use crate::uplink::{
    BchCltuGenerator, CltuGenerator, FieldClamp, PaddingCltuGenerator, PusCommandPostprocessor,
    TcFrameGenerator, TcFrameHeader, UplinkPipeline,
};
use crate::{Error, Result};

/// Transfer frame format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum FrameConfig {
    Tm {
        /// Frame length, FECF included
        frame_length: usize,
        #[serde(default)]
        fecf: bool,
    },
    Aos {
        /// Frame length, FECF included
        frame_length: usize,
        #[serde(default)]
        insert_zone_length: usize,
        #[serde(default)]
        fhec: bool,
        #[serde(default)]
        ocf: bool,
        #[serde(default)]
        fecf: bool,
    },
}

impl FrameConfig {
    #[must_use]
    pub fn frame_length(&self) -> usize {
        match self {
            FrameConfig::Tm { frame_length, .. } | FrameConfig::Aos { frame_length, .. } => {
                *frame_length
            }
        }
    }

    #[must_use]
    pub fn decoder(&self) -> Box<dyn FrameDecoder> {
        match *self {
            FrameConfig::Tm { frame_length, fecf } => Box::new(
                TmFrameDecoder::builder()
                    .frame_length(frame_length)
                    .fecf(fecf)
                    .build(),
            ),
            FrameConfig::Aos {
                frame_length,
                insert_zone_length,
                fhec,
                ocf,
                fecf,
            } => Box::new(
                AosFrameDecoder::builder()
                    .frame_length(frame_length)
                    .insert_zone_length(insert_zone_length)
                    .fhec(fhec)
                    .ocf(ocf)
                    .fecf(fecf)
                    .build(),
            ),
        }
    }
}

fn default_rs_params() -> ReedSolomonParams {
    ReedSolomonParams::CCSDS
}

fn default_true() -> bool {
    true
}

fn default_interleave() -> usize {
    1
}

/// Reed-Solomon coding of frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RsConfig {
    #[serde(default = "default_rs_params")]
    pub params: ReedSolomonParams,
    #[serde(default = "default_interleave")]
    pub interleave: usize,
    /// Symbols are in the CCSDS dual basis representation
    #[serde(default = "default_true")]
    pub dual_basis: bool,
}

/// On-board time field format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum TimeDecoderConfig {
    /// CCSDS unsegmented time code; p-fields not given are read from the packet
    Cuc {
        #[serde(default)]
        implicit_pfield: Option<u8>,
        #[serde(default)]
        implicit_pfield_cont: Option<u8>,
    },
    Fixed {
        size: usize,
        multiplier: f64,
    },
    Float64,
}

impl TimeDecoderConfig {
    /// Decoder for this format. `byte_order` applies to the fixed size and floating point
    /// formats; CUC is always big-endian.
    ///
    /// # Errors
    /// [Error::TimecodeConfig] for an unsupported fixed time size.
    pub fn decoder(&self, byte_order: ByteOrder) -> Result<Box<dyn TimeDecoder>> {
        Ok(match *self {
            TimeDecoderConfig::Cuc {
                implicit_pfield,
                implicit_pfield_cont,
            } => Box::new(CucTimeDecoder::new(implicit_pfield, implicit_pfield_cont)),
            TimeDecoderConfig::Fixed { size, multiplier } => Box::new(
                FixedSizeTimeDecoder::new(size, multiplier)?.with_byte_order(byte_order),
            ),
            TimeDecoderConfig::Float64 => Box::new(Float64TimeDecoder::new(byte_order)),
        })
    }
}

fn default_time_offset() -> usize {
    13
}

fn default_epoch() -> TimeEpoch {
    TimeEpoch::Gps
}

/// Options for the [DefaultPacketPreprocessor] of a virtual channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PreprocessorConfig {
    #[serde(default)]
    pub error_detection: ErrorDetection,
    /// Packets carry a PUS telemetry secondary header
    #[serde(default)]
    pub pus: bool,
    #[serde(default)]
    pub time_decoder: Option<TimeDecoderConfig>,
    #[serde(default = "default_time_offset")]
    pub time_offset: usize,
    #[serde(default = "default_epoch")]
    pub epoch: TimeEpoch,
    /// Time since a custom epoch counts leap seconds
    #[serde(default = "default_true")]
    pub time_includes_leap_seconds: bool,
    /// Byte order of fixed size and floating point time fields
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Use the reception time as generation time
    #[serde(default)]
    pub use_local_generation_time: bool,
    /// Log sequence count gaps
    #[serde(default)]
    pub check_sequence: bool,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            error_detection: ErrorDetection::None,
            pus: false,
            time_decoder: None,
            time_offset: default_time_offset(),
            epoch: default_epoch(),
            time_includes_leap_seconds: true,
            byte_order: ByteOrder::default(),
            use_local_generation_time: false,
            check_sequence: false,
        }
    }
}

impl PreprocessorConfig {
    /// # Errors
    /// If the time decoder options are invalid.
    pub fn preprocessor(&self) -> Result<Box<dyn PacketPreprocessor>> {
        let pp = DefaultPacketPreprocessor::builder()
            .time_offset(self.time_offset)
            .epoch(self.epoch.clone())
            .time_includes_leap_seconds(self.time_includes_leap_seconds)
            .use_local_generation_time(self.use_local_generation_time)
            .error_detection(self.error_detection)
            .pus(self.pus);
        Ok(match (&self.time_decoder, self.check_sequence) {
            (Some(td), true) => Box::new(
                pp.time_decoder(td.decoder(self.byte_order)?)
                    .sequence_checker(SequenceChecker::default())
                    .build(),
            ),
            (Some(td), false) => Box::new(pp.time_decoder(td.decoder(self.byte_order)?).build()),
            (None, true) => Box::new(
                pp.sequence_checker(SequenceChecker::default())
                    .build(),
            ),
            (None, false) => Box::new(pp.build()),
        })
    }
}

fn default_max_packet_length() -> usize {
    65_542
}

/// A virtual channel to extract packets from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VcConfig {
    pub vcid: Vcid,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_packet_length")]
    pub max_packet_length: usize,
    #[serde(default)]
    pub strip_encapsulation_header: bool,
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
}

impl VcConfig {
    #[must_use]
    pub fn options(&self) -> VcOptions {
        VcOptions::builder()
            .vcid(self.vcid)
            .enabled(self.enabled)
            .max_packet_length(self.max_packet_length)
            .strip_encapsulation_header(self.strip_encapsulation_header)
            .build()
    }
}

/// CLTU generation profile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CltuConfig {
    Padding { block_size: usize },
    Bch,
}

impl CltuConfig {
    /// # Errors
    /// [Error::InvalidArgument] for a zero padding block size.
    pub fn generator(&self) -> Result<Box<dyn CltuGenerator>> {
        Ok(match *self {
            CltuConfig::Padding { block_size } => Box::new(PaddingCltuGenerator::new(block_size)?),
            CltuConfig::Bch => Box::new(BchCltuGenerator),
        })
    }
}

fn default_max_tc_frame_length() -> usize {
    TcFrameHeader::MAX_FRAME_LEN
}

/// TC transfer framing of commands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcFrameConfig {
    pub scid: Scid,
    pub vcid: Vcid,
    #[serde(default = "default_true")]
    pub fecf: bool,
    /// Send type-BD frames unless a command says otherwise
    #[serde(default = "default_true")]
    pub bypass: bool,
    #[serde(default = "default_max_tc_frame_length")]
    pub max_frame_length: usize,
}

impl TcFrameConfig {
    #[must_use]
    pub fn generator(&self) -> TcFrameGenerator {
        TcFrameGenerator::builder()
            .scid(self.scid)
            .vcid(self.vcid)
            .fecf(self.fecf)
            .max_frame_length(self.max_frame_length)
            .build()
    }
}

/// Telecommand uplink options.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UplinkConfig {
    pub cltu: CltuConfig,
    /// Place commands in TC transfer frames; commands go directly into CLTUs if not set
    #[serde(default)]
    pub tc_frame: Option<TcFrameConfig>,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub reed_solomon: Option<ReedSolomonParams>,
    /// Checkword appended to commands with a secondary header
    #[serde(default)]
    pub error_detection: ErrorDetection,
    #[serde(default)]
    pub clamps: Vec<FieldClamp>,
}

fn default_queue_size() -> usize {
    1024
}

/// Configuration of a link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub name: String,
    pub frame: FrameConfig,
    /// Frames are randomized with the CCSDS TM pseudo-random sequence
    #[serde(default)]
    pub derandomize: bool,
    #[serde(default)]
    pub reed_solomon: Option<RsConfig>,
    #[serde(default)]
    pub virtual_channels: Vec<VcConfig>,
    /// Frames queued per virtual channel
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Dispatch PUS telemetry and complete PUS commands
    #[serde(default)]
    pub pus: Option<PusConfig>,
    #[serde(default)]
    pub uplink: Option<UplinkConfig>,
}

impl FromStr for LinkConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: LinkConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl LinkConfig {
    /// # Errors
    /// If the file cannot be read, is not valid JSON, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        s.parse()
    }

    /// Check option combinations that cannot be expressed by the types.
    ///
    /// # Errors
    /// [Error::Config] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for vc in &self.virtual_channels {
            if vc.vcid > 63 {
                return Err(Error::Config(format!("vcid {} out of range", vc.vcid)));
            }
            if !seen.insert(vc.vcid) {
                return Err(Error::Config(format!("vcid {} configured twice", vc.vcid)));
            }
        }
        if let Some(ref rs) = self.reed_solomon {
            let codec = ReedSolomon::new(rs.params)?;
            let expected = codec.data_len() * rs.interleave.max(1);
            if self.frame.frame_length() != expected {
                return Err(Error::Config(format!(
                    "frame length {} does not match the Reed-Solomon codeblock data length {expected}",
                    self.frame.frame_length()
                )));
            }
        }
        if let Some(ref uplink) = self.uplink {
            if let Some(params) = uplink.reed_solomon {
                ReedSolomon::new(params)?;
            }
            if let CltuConfig::Padding { block_size: 0 } = uplink.cltu {
                return Err(Error::Config("CLTU block size must be greater than 0".to_string()));
            }
            if let Some(tc) = uplink.tc_frame {
                if tc.scid > 0x3ff || tc.vcid > 63 {
                    return Err(Error::Config(format!(
                        "TC frame scid {} or vcid {} out of range",
                        tc.scid, tc.vcid
                    )));
                }
                if tc.generator().max_data_length() == 0 {
                    return Err(Error::Config(format!(
                        "TC frame length {} leaves no room for data",
                        tc.max_frame_length
                    )));
                }
            }
        }
        Ok(())
    }

    /// Frame integrity algorithm, if frames are Reed-Solomon coded.
    ///
    /// # Errors
    /// If the Reed-Solomon parameters are invalid.
    pub fn integrity(&self) -> Result<Option<Box<dyn IntegrityAlgorithm>>> {
        let Some(ref rs) = self.reed_solomon else {
            return Ok(None);
        };
        let codec = Arc::new(ReedSolomon::new(rs.params)?);
        Ok(Some(Box::new(ReedSolomonIntegrity::new(
            codec,
            rs.interleave,
            rs.dual_basis,
        ))))
    }

    /// PUS registry for the configured services, if PUS is enabled.
    ///
    /// # Errors
    /// See [PusServiceRegistry::from_config].
    pub fn registry(&self) -> Result<Option<Arc<PusServiceRegistry>>> {
        self.pus
            .as_ref()
            .map(|pus| PusServiceRegistry::from_config(pus).map(Arc::new))
            .transpose()
    }

    /// Create the downlink and start its virtual channel handlers.
    ///
    /// If PUS is enabled packets are dispatched through the PUS registry before reaching
    /// `sink`.
    ///
    /// # Errors
    /// If any part of the configuration is invalid or a handler cannot be started.
    pub fn downlink(
        &self,
        sink: Arc<dyn TmSink>,
        time_service: Arc<dyn TimeService>,
    ) -> Result<DownlinkLink> {
        let sink: Arc<dyn TmSink> = match self.registry()? {
            Some(registry) => Arc::new(PusTmSink::new(registry, sink)),
            None => sink,
        };
        let mut link = DownlinkLink::new(&self.name, self.frame.decoder(), sink, time_service)
            .with_queue_size(self.queue_size);
        if self.derandomize {
            link = link.with_derandomization(Box::new(DefaultDerandomizer));
        }
        if let Some(integrity) = self.integrity()? {
            link = link.with_integrity(integrity);
        }
        for vc in &self.virtual_channels {
            debug!(link = %self.name, vcid = vc.vcid, enabled = vc.enabled, "adding vc");
            link.add_vc(vc.options(), vc.preprocessor.preprocessor()?)?;
        }
        Ok(link)
    }

    /// Create the uplink, if configured.
    ///
    /// # Errors
    /// If any part of the configuration is invalid.
    pub fn uplink(&self, time_service: Arc<dyn TimeService>) -> Result<Option<UplinkPipeline>> {
        let Some(ref uplink) = self.uplink else {
            return Ok(None);
        };
        let postprocessor = PusCommandPostprocessor::builder()
            .error_detection(uplink.error_detection)
            .clamps(uplink.clamps.clone())
            .build();
        let mut pipeline = UplinkPipeline::new(
            Box::new(postprocessor),
            uplink.cltu.generator()?,
            time_service,
        )
        .with_randomization(uplink.randomize);
        if let Some(params) = uplink.reed_solomon {
            pipeline = pipeline.with_reed_solomon(Arc::new(ReedSolomon::new(params)?));
        }
        if let Some(tc) = uplink.tc_frame {
            pipeline = pipeline.with_tc_frames(tc.generator(), tc.bypass);
        }
        if let (Some(registry), Some(pus)) = (self.registry()?, self.pus.as_ref()) {
            pipeline = pipeline
                .with_registry(registry)
                .with_time_tagger(TimeTagger::new(pus));
        }
        Ok(Some(pipeline))
    }
}
