use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender};
use tracing::{debug, info, trace, warn};

use super::{
    Derandomizer, DownlinkTransferFrame, FrameDecoder, Integrity, IntegrityAlgorithm, LinkStats,
    LinkStatsSnapshot, TmSink, VcOptions, VcPacketHandler, Vcid,
};
use crate::spacepacket::PacketPreprocessor;
use crate::time::TimeService;
use crate::{Error, Result};

enum VcMessage {
    Frame(DownlinkTransferFrame),
    Stop,
}

struct VcWorker {
    tx: Sender<VcMessage>,
    handle: JoinHandle<()>,
    enabled: Arc<AtomicBool>,
}

/// A downlink carrying transfer frames for one or more virtual channels.
///
/// Each virtual channel is handled by its own thread fed by a queue, so frames of a
/// virtual channel are processed sequentially in the order submitted while virtual
/// channels proceed independently.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use ccsds_link::framing::{DownlinkLink, TmFrameDecoder, TmSink, VcOptions};
/// use ccsds_link::spacepacket::{DefaultPacketPreprocessor, TmPacket};
/// use ccsds_link::time::WallClock;
///
/// struct Print;
/// impl TmSink for Print {
///     fn process_packet(&self, packet: TmPacket) {
///         println!("{packet}");
///     }
/// }
///
/// let decoder = TmFrameDecoder::builder().frame_length(1115).fecf(true).build();
/// let mut link = DownlinkLink::new("tm", Box::new(decoder), Arc::new(Print), Arc::new(WallClock));
/// link.add_vc(
///     VcOptions::builder().vcid(0).build(),
///     Box::new(DefaultPacketPreprocessor::builder().build()),
/// ).unwrap();
/// link.submit(vec![0u8; 1115], 0).ok();
/// link.stop();
/// ```
pub struct DownlinkLink {
    name: String,
    frame_decoder: Box<dyn FrameDecoder>,
    derandomization: Option<Box<dyn Derandomizer>>,
    integrity: Option<Box<dyn IntegrityAlgorithm>>,
    sink: Arc<dyn TmSink>,
    time_service: Arc<dyn TimeService>,
    stats: Arc<LinkStats>,
    workers: HashMap<Vcid, VcWorker>,
    queue_size: usize,
}

impl DownlinkLink {
    const DEFAULT_QUEUE_SIZE: usize = 1024;

    pub fn new(
        name: &str,
        frame_decoder: Box<dyn FrameDecoder>,
        sink: Arc<dyn TmSink>,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            name: name.to_string(),
            frame_decoder,
            derandomization: None,
            integrity: None,
            sink,
            time_service,
            stats: Arc::new(LinkStats::default()),
            workers: HashMap::default(),
            queue_size: Self::DEFAULT_QUEUE_SIZE,
        }
    }

    #[must_use]
    pub fn with_derandomization(mut self, derandomizer: Box<dyn Derandomizer>) -> Self {
        self.derandomization = Some(derandomizer);
        self
    }

    #[must_use]
    pub fn with_integrity(mut self, integrity: Box<dyn IntegrityAlgorithm>) -> Self {
        self.integrity = Some(integrity);
        self
    }

    /// Number of frames queued per virtual channel before [DownlinkLink::submit] blocks.
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// Start handling virtual channel `options.vcid`.
    ///
    /// # Errors
    /// [Error::Config] if the virtual channel is already handled, or [Error::Io] if the
    /// handler thread cannot be started.
    pub fn add_vc(
        &mut self,
        options: VcOptions,
        preprocessor: Box<dyn PacketPreprocessor>,
    ) -> Result<()> {
        let handler = VcPacketHandler::new(
            options,
            preprocessor,
            self.sink.clone(),
            self.time_service.clone(),
            self.stats.clone(),
        );
        self.add_handler(handler)
    }

    /// Start a thread for `handler`.
    ///
    /// # Errors
    /// [Error::Config] if the virtual channel is already handled, or [Error::Io] if the
    /// handler thread cannot be started.
    pub fn add_handler(&mut self, mut handler: VcPacketHandler) -> Result<()> {
        let vcid = handler.vcid();
        if self.workers.contains_key(&vcid) {
            return Err(Error::Config(format!(
                "link {} already has a handler for vcid {vcid}",
                self.name
            )));
        }

        let (tx, rx) = bounded(self.queue_size);
        let enabled = handler.enabled();
        let handle = thread::Builder::new()
            .name(format!("{}_vc{vcid}", self.name))
            .spawn(move || {
                for msg in rx {
                    match msg {
                        VcMessage::Frame(frame) => handler.handle(&frame),
                        VcMessage::Stop => break,
                    }
                }
                handler.reset();
                debug!(vcid = vcid, "vc handler stopped");
            })?;

        self.workers.insert(
            vcid,
            VcWorker {
                tx,
                handle,
                enabled,
            },
        );
        Ok(())
    }

    /// Enable or disable processing of a virtual channel.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if the virtual channel is not handled by this link.
    pub fn set_vc_enabled(&self, vcid: Vcid, enabled: bool) -> Result<()> {
        let worker = self.workers.get(&vcid).ok_or(Error::InvalidArgument(format!(
            "no handler for vcid {vcid}"
        )))?;
        worker.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn decode(&self, mut cadu: Vec<u8>, ert: i64) -> Result<DownlinkTransferFrame> {
        if let Some(ref pn) = self.derandomization {
            cadu = pn.derandomize(&cadu);
        }
        if let Some(ref integrity) = self.integrity {
            let (status, data) = integrity.perform(&cadu)?;
            match status {
                Integrity::Uncorrectable | Integrity::HasErrors => {
                    return Err(Error::UncorrectableFec)
                }
                Integrity::Corrected => debug!("corrected frame"),
                _ => {}
            }
            cadu = data;
        }
        self.frame_decoder.decode(cadu, ert)
    }

    /// Decode a raw frame received at `ert` and queue it for its virtual channel.
    ///
    /// Blocks if the virtual channel's queue is full.
    ///
    /// # Errors
    /// If the frame cannot be decoded. The error is also counted in the link statistics.
    pub fn submit(&self, cadu: Vec<u8>, ert: i64) -> Result<()> {
        self.stats.add_frame();
        let frame = match self.decode(cadu, ert) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(link = %self.name, "dropping frame: {err}");
                self.stats.record_error(&err);
                return Err(err);
            }
        };

        if let Some(clcw) = frame.clcw() {
            trace!(
                link = %self.name,
                vcid = clcw.vcid,
                lockout = clcw.lockout,
                wait = clcw.wait,
                retransmit = clcw.retransmit,
                nr = clcw.report_value,
                "clcw"
            );
            self.stats.set_clcw(clcw);
        }

        let vcid = frame.vcid;
        match self.workers.get(&vcid) {
            Some(worker) => worker
                .tx
                .send(VcMessage::Frame(frame))
                .map_err(|_| Error::Framing(format!("handler for vcid {vcid} has stopped"))),
            None => {
                if !frame.idle {
                    debug!(link = %self.name, vcid = vcid, "no handler for vcid; dropping frame");
                }
                Ok(())
            }
        }
    }

    /// Publish the current statistics to the sink.
    pub fn publish_stats(&self) {
        self.sink.update_stats(&self.name, self.stats.snapshot());
    }

    /// Stop all virtual channel handlers.
    ///
    /// Frames already submitted are processed; partially assembled packets are then
    /// discarded. Returns once every handler thread has exited.
    pub fn stop(&mut self) -> LinkStatsSnapshot {
        for (vcid, worker) in self.workers.drain() {
            if worker.tx.send(VcMessage::Stop).is_err() {
                debug!(vcid = vcid, "vc handler already stopped");
            }
            drop(worker.tx);
            if worker.handle.join().is_err() {
                warn!(link = %self.name, vcid = vcid, "vc handler panicked");
            }
        }
        let stats = self.stats.snapshot();
        info!(link = %self.name, frames = stats.frames, packets = stats.packets, errors = stats.errors, "link stopped");
        self.sink.update_stats(&self.name, stats.clone());
        stats
    }
}

impl Drop for DownlinkLink {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
