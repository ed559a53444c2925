#![allow(dead_code)]
use std::path::PathBuf;
use std::sync::Mutex;

use ccsds_link::framing::{LinkStatsSnapshot, TmSink, NO_PACKET_START};
use ccsds_link::spacepacket::TmPacket;

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// Unsegmented space packet with `data_len` bytes of `fill`.
pub fn space_packet(apid: u16, seq: u16, data_len: usize, fill: u8) -> Vec<u8> {
    let d1 = apid & 0x7ff;
    let d2 = 0xc000 | (seq & 0x3fff);
    let d3 = u16::try_from(data_len - 1).unwrap();
    let mut dat = Vec::with_capacity(6 + data_len);
    dat.extend_from_slice(&d1.to_be_bytes());
    dat.extend_from_slice(&d2.to_be_bytes());
    dat.extend_from_slice(&d3.to_be_bytes());
    dat.resize(6 + data_len, fill);
    dat
}

/// TM transfer frame without secondary header, OCF or FECF. `fhp` is relative to the start
/// of the data field, `None` if no packet starts in the frame.
pub fn tm_frame(vcid: u8, count: u8, fhp: Option<usize>, field: &[u8]) -> Vec<u8> {
    let x: u16 = (0x2a << 4) | (u16::from(vcid) << 1);
    let status = fhp.map_or(NO_PACKET_START, |x| u16::try_from(x).unwrap());
    let mut dat = Vec::with_capacity(6 + field.len());
    dat.extend_from_slice(&x.to_be_bytes());
    dat.push(0);
    dat.push(count);
    dat.extend_from_slice(&status.to_be_bytes());
    dat.extend_from_slice(field);
    dat
}

#[derive(Default)]
pub struct Collect {
    pub packets: Mutex<Vec<TmPacket>>,
    pub stats: Mutex<Vec<(String, LinkStatsSnapshot)>>,
}

impl TmSink for Collect {
    fn process_packet(&self, packet: TmPacket) {
        self.packets.lock().unwrap().push(packet);
    }

    fn update_stats(&self, link: &str, stats: LinkStatsSnapshot) {
        self.stats.lock().unwrap().push((link.to_string(), stats));
    }
}

/// PUS TM packet, apid 100, with a 7 byte CUC time field.
pub fn pus_tm(service: u8, subservice: u8, data: &[u8]) -> Vec<u8> {
    let mut dat = vec![0x08, 0x64, 0xc0, 0x01, 0x00, 0x00];
    dat.extend_from_slice(&[0x20, service, subservice, 0x00, 0x05, 0x00, 0x01]);
    dat.extend_from_slice(&[0x2e, 0x00, 0x00, 0x00, 0x64, 0x80, 0x00]);
    dat.extend_from_slice(data);
    let len = u16::try_from(dat.len() - 7).unwrap();
    dat[4..6].copy_from_slice(&len.to_be_bytes());
    dat
}

/// PUS TC packet with an 11 byte header followed by `data`.
pub fn pus_tc(apid: u16, service: u8, subservice: u8, data: &[u8]) -> Vec<u8> {
    let mut dat = (0x1800 | (apid & 0x7ff)).to_be_bytes().to_vec();
    dat.extend_from_slice(&[0xc0, 0x00, 0x00, 0x00]);
    dat.extend_from_slice(&[0x20, service, subservice, 0x00, 0x00]);
    dat.extend_from_slice(data);
    let len = u16::try_from(dat.len() - 7).unwrap();
    dat[4..6].copy_from_slice(&len.to_be_bytes());
    dat
}
