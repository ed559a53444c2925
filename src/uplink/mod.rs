//! Telecommand uplink: PUS command completion, post-processing, TC transfer framing and
//! CLTU generation.
mod cltu;
mod postprocessor;
mod tc_frame;

pub use cltu::*;
pub use postprocessor::*;
pub use tc_frame::*;

use std::sync::Arc;

use tracing::{debug, span, Level};

use crate::pus::services::{TimeTagger, ATTR_WRAPPED_APID};
use crate::pus::PusServiceRegistry;
use crate::rs::ReedSolomon;
use crate::spacepacket::{AttributeValue, PreparedCommand};
use crate::time::TimeService;
use crate::{Error, Result};

/// Command attribute selecting a type-BD (`true`) or type-AD (`false`) frame for the
/// command, overriding the pipeline default.
pub const ATTR_BYPASS: &str = "cop1_bypass";

/// Turns prepared commands into bytes for transmission.
///
/// A command is completed by the PUS command modifier for its service and sub-service,
/// post-processed, wrapped into a TC[11,4] if time-tagged, optionally placed in a TC
/// transfer frame, framed into a CLTU, and optionally Reed-Solomon encoded.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use ccsds_link::spacepacket::{CommandId, PreparedCommand};
/// use ccsds_link::time::FixedClock;
/// use ccsds_link::uplink::{PaddingCltuGenerator, PusCommandPostprocessor, UplinkPipeline};
///
/// let mut uplink = UplinkPipeline::new(
///     Box::new(PusCommandPostprocessor::builder().build()),
///     Box::new(PaddingCltuGenerator::new(16).unwrap()),
///     Arc::new(FixedClock::new(0)),
/// );
/// let command = PreparedCommand::new(
///     CommandId::default(),
///     vec![0x10, 0x10, 0xc0, 0x00, 0x00, 0x00, 0x01, 0x02],
/// );
/// let cltu = uplink.process(command).unwrap();
/// assert_eq!(cltu.len(), 16);
/// ```
pub struct UplinkPipeline {
    registry: Option<Arc<PusServiceRegistry>>,
    time_tagger: Option<TimeTagger>,
    postprocessor: Box<dyn CommandPostprocessor>,
    cltu: Box<dyn CltuGenerator>,
    randomize: bool,
    reed_solomon: Option<Arc<ReedSolomon>>,
    tc_frames: Option<TcFrameGenerator>,
    bypass: bool,
    time_service: Arc<dyn TimeService>,
}

impl UplinkPipeline {
    #[must_use]
    pub fn new(
        postprocessor: Box<dyn CommandPostprocessor>,
        cltu: Box<dyn CltuGenerator>,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            registry: None,
            time_tagger: None,
            postprocessor,
            cltu,
            randomize: false,
            reed_solomon: None,
            tc_frames: None,
            bypass: true,
            time_service,
        }
    }

    /// Place commands in TC transfer frames built by `generator` before CLTU generation.
    ///
    /// Frames are type-BD if `bypass` is set, type-AD otherwise; the [ATTR_BYPASS] command
    /// attribute overrides this per command.
    #[must_use]
    pub fn with_tc_frames(mut self, generator: TcFrameGenerator, bypass: bool) -> Self {
        self.tc_frames = Some(generator);
        self.bypass = bypass;
        self
    }

    /// Complete commands using the PUS command modifiers in `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<PusServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wrap time-tagged commands into TC[11,4] requests.
    #[must_use]
    pub fn with_time_tagger(mut self, tagger: TimeTagger) -> Self {
        self.time_tagger = Some(tagger);
        self
    }

    #[must_use]
    pub fn with_randomization(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    #[must_use]
    pub fn with_reed_solomon(mut self, codec: Arc<ReedSolomon>) -> Self {
        self.reed_solomon = Some(codec);
        self
    }

    /// Complete `command`, returning the packet as it will be uplinked.
    ///
    /// # Errors
    /// PUS dispatch errors, see [PusServiceRegistry::modify_command], or an invalid
    /// time-tag.
    pub fn prepare(&mut self, command: PreparedCommand) -> Result<PreparedCommand> {
        let span = span!(Level::DEBUG, "uplink", command = %command.id.command_name);
        let _guard = span.enter();

        let mut command = match self.registry {
            Some(ref registry) => registry.modify_command(command)?,
            None => command,
        };
        command.binary = self.postprocessor.process(command.clone());

        if let Some(ref tagger) = self.time_tagger {
            if TimeTagger::release_time(&command)?.is_some() {
                let mut wrapper = tagger.wrap(command, self.time_service.mission_time())?;
                if wrapper.attribute(ATTR_WRAPPED_APID).is_some() {
                    wrapper.binary = self.postprocessor.process(wrapper.clone());
                }
                return Ok(wrapper);
            }
        }
        Ok(command)
    }

    /// Frame a complete packet for transmission.
    ///
    /// # Errors
    /// [crate::Error::InvalidArgument] if Reed-Solomon encoding fails.
    pub fn encode(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let cltu = self.cltu.make_cltu(packet, self.randomize);
        match self.reed_solomon {
            Some(ref rs) => rs.encode_stream(&cltu),
            None => Ok(cltu),
        }
    }

    /// Complete and frame `command`.
    ///
    /// # Errors
    /// See [UplinkPipeline::prepare] and [UplinkPipeline::encode], or
    /// [Error::InvalidArgument] if the command does not fit in a TC transfer frame.
    pub fn process(&mut self, command: PreparedCommand) -> Result<Vec<u8>> {
        let command = self.prepare(command)?;
        debug!(len = command.binary.len(), "command ready");
        let bypass = match command.attribute(ATTR_BYPASS) {
            Some(AttributeValue::Bool(bypass)) => *bypass,
            _ => self.bypass,
        };
        match self.tc_frames {
            Some(ref mut frames) => {
                let frame = frames.make_frame(&command.binary, bypass)?;
                self.encode(&frame)
            }
            None => self.encode(&command.binary),
        }
    }

    /// Build and frame a COP-1 control command.
    ///
    /// # Errors
    /// [Error::Config] if the pipeline does not build TC transfer frames, or as
    /// [UplinkPipeline::encode].
    pub fn process_control(&mut self, command: ControlCommand) -> Result<Vec<u8>> {
        let frames = self.tc_frames.as_mut().ok_or_else(|| {
            Error::Config("uplink has no TC transfer frame generator".to_string())
        })?;
        let frame = frames.make_control_frame(command)?;
        debug!(vcid = frames.vcid(), command = ?command, "control frame");
        self.encode(&frame)
    }
}
