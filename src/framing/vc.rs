use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, span, trace, warn, Level};
use typed_builder::TypedBuilder;

use super::{Clcw, DownlinkTransferFrame, PacketDecoder, Vcid};
use crate::spacepacket::{PacketPreprocessor, TmPacket};
use crate::time::TimeService;
use crate::{Error, Result};

/// Receives fully decoded telemetry packets. Shared by all links, so it must accept packets
/// concurrently.
pub trait TmSink: Send + Sync {
    fn process_packet(&self, packet: TmPacket);

    /// Periodic link statistics.
    fn update_stats(&self, _link: &str, _stats: LinkStatsSnapshot) {}
}

/// Link counters, updated by the link's virtual channel handlers.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames: AtomicU64,
    idle_frames: AtomicU64,
    lost_frames: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    dropped_packets: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    clcw: Mutex<Option<Clcw>>,
}

/// Point in time copy of [LinkStats].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub frames: u64,
    pub idle_frames: u64,
    pub lost_frames: u64,
    pub packets: u64,
    pub bytes: u64,
    pub dropped_packets: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    /// Most recent CLCW received on the link
    pub clcw: Option<Clcw>,
}

impl LinkStats {
    /// Count `err` and remember it as the last error.
    pub fn record_error(&self, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(err.to_string());
        }
    }

    pub(crate) fn set_clcw(&self, clcw: Clcw) {
        if let Ok(mut last) = self.clcw.lock() {
            *last = Some(clcw);
        }
    }

    pub(crate) fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            idle_frames: self.idle_frames.load(Ordering::Relaxed),
            lost_frames: self.lost_frames.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
            clcw: self.clcw.lock().ok().and_then(|c| *c),
        }
    }
}

/// Options for a [VcPacketHandler].
#[derive(Debug, Clone, TypedBuilder)]
pub struct VcOptions {
    pub vcid: Vcid,
    /// Maximum length of a packet, header included
    #[builder(default = 65_542)]
    pub max_packet_length: usize,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default = false)]
    pub strip_encapsulation_header: bool,
}

/// Metadata name for the virtual channel a packet was received on
pub const METADATA_VCID: &str = "vcid";
/// Metadata name for the earth reception time of the frame completing the packet
pub const METADATA_ERT: &str = "ert";

/// Extracts the packets of a single virtual channel.
///
/// Frames must be provided in the order received; packets spanning frames are reassembled
/// until a frame is lost, at which point the partial packet is dropped.
pub struct VcPacketHandler {
    vcid: Vcid,
    enabled: Arc<AtomicBool>,
    decoder: PacketDecoder,
    last_frame_seq: Option<u32>,
    preprocessor: Box<dyn PacketPreprocessor>,
    sink: Arc<dyn TmSink>,
    time_service: Arc<dyn TimeService>,
    stats: Arc<LinkStats>,
}

impl VcPacketHandler {
    #[must_use]
    pub fn new(
        options: VcOptions,
        preprocessor: Box<dyn PacketPreprocessor>,
        sink: Arc<dyn TmSink>,
        time_service: Arc<dyn TimeService>,
        stats: Arc<LinkStats>,
    ) -> Self {
        Self {
            vcid: options.vcid,
            enabled: Arc::new(AtomicBool::new(options.enabled)),
            decoder: PacketDecoder::new(options.max_packet_length)
                .with_strip_encapsulation_header(options.strip_encapsulation_header),
            last_frame_seq: None,
            preprocessor,
            sink,
            time_service,
            stats,
        }
    }

    #[must_use]
    pub fn vcid(&self) -> Vcid {
        self.vcid
    }

    /// Shared flag controlling whether frames are processed; may be changed at any time.
    #[must_use]
    pub fn enabled(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// Discard any partially assembled packet.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }

    /// Extract packets from `frame`, delivering completed packets to the sink.
    ///
    /// Decoding errors do not propagate; they are logged and counted and the frame's
    /// remaining data is dropped.
    pub fn handle(&mut self, frame: &DownlinkTransferFrame) {
        let span = span!(Level::TRACE, "vc", vcid = self.vcid);
        let _guard = span.enter();

        if !self.enabled.load(Ordering::Relaxed) {
            trace!(seq = frame.vc_frame_seq, "vc disabled, dropping frame");
            return;
        }
        if frame.idle {
            trace!(seq = frame.vc_frame_seq, "idle frame");
            self.last_frame_seq = Some(frame.vc_frame_seq);
            self.stats.idle_frames.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let missing = self
            .last_frame_seq
            .map_or(0, |last| frame.missing_since(last));
        self.last_frame_seq = Some(frame.vc_frame_seq);
        if missing > 0 {
            debug!(seq = frame.vc_frame_seq, missing = missing, "missing frames");
            self.stats
                .lost_frames
                .fetch_add(u64::from(missing), Ordering::Relaxed);
        }

        let mut packets = Vec::new();
        let zult = self.extract_packets(frame, missing > 0, &mut packets);
        for packet in packets {
            self.deliver(packet, frame.earth_reception_time);
        }
        if let Err(err) = zult {
            warn!(seq = frame.vc_frame_seq, "dropping frame data: {err}");
            self.stats.record_error(&err);
            self.decoder.reset();
        }
    }

    fn extract_packets(
        &mut self,
        frame: &DownlinkTransferFrame,
        frames_lost: bool,
        packets: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        if self.decoder.has_incomplete_packet() {
            if frames_lost {
                warn!(
                    seq = frame.vc_frame_seq,
                    "frames lost, dropping incomplete packet"
                );
                self.decoder.reset();
                self.stats.dropped_packets.fetch_add(1, Ordering::Relaxed);
            } else {
                let end = frame.first_header_pointer.unwrap_or(frame.data_end);
                self.decoder
                    .process(&frame.data[frame.data_start..end], |p| packets.push(p))?;
            }
        }

        match frame.first_header_pointer {
            Some(fhp) => {
                if self.decoder.has_incomplete_packet() {
                    warn!(
                        seq = frame.vc_frame_seq,
                        "packet incomplete at the start of the next packet, dropping"
                    );
                    self.decoder.reset();
                    self.stats.dropped_packets.fetch_add(1, Ordering::Relaxed);
                }
                self.decoder
                    .process(&frame.data[fhp..frame.data_end], |p| packets.push(p))?;
            }
            None if !self.decoder.has_incomplete_packet() => {
                trace!(seq = frame.vc_frame_seq, "no packet start, dropping frame data");
            }
            None => {}
        }
        Ok(())
    }

    fn deliver(&mut self, payload: Vec<u8>, ert: i64) {
        let len = payload.len() as u64;
        let mut packet = TmPacket::new(self.time_service.mission_time(), payload);
        packet.earth_reception_time = Some(ert);
        packet.set_metadata(METADATA_VCID, self.vcid);
        packet.set_metadata(METADATA_ERT, ert);

        match self.preprocessor.process(packet) {
            Some(packet) => {
                self.stats.packets.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(len, Ordering::Relaxed);
                self.sink.process_packet(packet);
            }
            None => {
                trace!("packet dropped by preprocessor");
                self.stats.dropped_packets.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TmPacket>>);

    impl TmSink for Collect {
        fn process_packet(&self, packet: TmPacket) {
            self.0.lock().unwrap().push(packet);
        }
    }

    struct Passthrough;

    impl PacketPreprocessor for Passthrough {
        fn process(&mut self, packet: TmPacket) -> Option<TmPacket> {
            Some(packet)
        }
    }

    fn packet(apid: u8, data_len: u8) -> Vec<u8> {
        let mut dat = vec![0x00, apid, 0xc0, 0x00, 0x00, data_len - 1];
        dat.resize(6 + data_len as usize, apid);
        dat
    }

    fn frame(seq: u32, fhp: Option<usize>, field: &[u8]) -> DownlinkTransferFrame {
        let mut data = vec![0u8; 6];
        data.extend_from_slice(field);
        DownlinkTransferFrame {
            scid: 1,
            vcid: 2,
            vc_frame_seq: seq,
            vc_frame_seq_modulus: 256,
            first_header_pointer: fhp.map(|x| x + 6),
            idle: false,
            data_start: 6,
            data_end: data.len(),
            data,
            earth_reception_time: 42,
            ocf: None,
        }
    }

    fn handler() -> (VcPacketHandler, Arc<Collect>, Arc<LinkStats>) {
        let sink = Arc::new(Collect::default());
        let stats = Arc::new(LinkStats::default());
        let handler = VcPacketHandler::new(
            VcOptions::builder().vcid(2).build(),
            Box::new(Passthrough),
            sink.clone(),
            Arc::new(FixedClock::new(7)),
            stats.clone(),
        );
        (handler, sink, stats)
    }

    #[test]
    fn test_packet_spanning_frames() {
        let (mut handler, sink, _) = handler();
        let pkt = packet(1, 30);

        handler.handle(&frame(0, Some(0), &pkt[..20]));
        handler.handle(&frame(1, None, &pkt[20..]));

        let packets = sink.0.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, pkt);
        assert_eq!(packets[0].reception_time, 7);
        assert_eq!(packets[0].earth_reception_time, Some(42));
        assert_eq!(
            packets[0].metadata(METADATA_VCID),
            Some(&crate::spacepacket::MetadataValue::Int(2))
        );
    }

    #[test]
    fn test_lost_frame_drops_partial_packet() {
        let (mut handler, sink, stats) = handler();
        let pkt = packet(1, 30);
        let mut next = pkt[20..].to_vec();
        let fhp = next.len();
        next.extend(packet(2, 4));

        handler.handle(&frame(0, Some(0), &pkt[..20]));
        handler.handle(&frame(2, Some(fhp), &next));

        let packets = sink.0.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, packet(2, 4));
        let stats = stats.snapshot();
        assert_eq!(stats.lost_frames, 1);
        assert_eq!(stats.dropped_packets, 1);
    }

    #[test]
    fn test_disabled_vc_drops_frames() {
        let (mut handler, sink, _) = handler();
        handler.enabled().store(false, Ordering::Relaxed);

        handler.handle(&frame(0, Some(0), &packet(1, 4)));

        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_idle_frame_counted() {
        let (mut handler, sink, stats) = handler();
        let mut f = frame(0, None, &[0u8; 10]);
        f.idle = true;

        handler.handle(&f);

        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().idle_frames, 1);
    }

    #[test]
    fn test_decode_error_is_recorded() {
        let (mut handler, sink, stats) = handler();
        // packet version 1
        handler.handle(&frame(0, Some(0), &[0x20, 0, 0, 0, 0, 0, 0]));
        handler.handle(&frame(1, Some(0), &packet(3, 4)));

        assert_eq!(sink.0.lock().unwrap().len(), 1);
        let stats = stats.snapshot();
        assert_eq!(stats.errors, 1);
        assert!(stats.last_error.is_some());
    }
}
