use tracing::trace;

use crate::spacepacket::PrimaryHeader;
use crate::{Error, Result};

/// Packet version number of a CCSDS space packet
const SPACE_PACKET_VERSION: u8 = 0;
/// Packet version number of a CCSDS encapsulation packet
const ENCAPSULATION_VERSION: u8 = 7;

/// What is needed to determine the size of the packet starting at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Required {
    /// At least this many bytes are needed to read the header
    Header(usize),
    /// Total length of the packet
    Packet(usize),
}

/// Reassembles space packets, or encapsulation packets, spanning consecutive frame data
/// fields of a single virtual channel.
///
/// Bytes are provided with [PacketDecoder::process] in the order received and every
/// complete packet is provided exactly once to the callback. A packet entirely contained in
/// the provided bytes is copied directly, otherwise bytes are accumulated across calls.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    max_packet_length: usize,
    strip_encapsulation_header: bool,
    /// Partial packet bytes, starting with the packet header
    cache: Vec<u8>,
}

impl PacketDecoder {
    #[must_use]
    pub fn new(max_packet_length: usize) -> Self {
        Self {
            max_packet_length,
            strip_encapsulation_header: false,
            cache: Vec::default(),
        }
    }

    /// Provide encapsulation packets without their header.
    #[must_use]
    pub fn with_strip_encapsulation_header(mut self, strip: bool) -> Self {
        self.strip_encapsulation_header = strip;
        self
    }

    /// True if bytes of a packet have been received but the packet is not yet complete.
    #[must_use]
    pub fn has_incomplete_packet(&self) -> bool {
        !self.cache.is_empty()
    }

    /// Discard any partial packet.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    /// Decode packets from `data`, calling `emit` with each complete packet.
    ///
    /// # Errors
    /// [Error::Framing] if a packet header is invalid or declares a length larger than the
    /// maximum packet length. The partial packet is discarded and the remainder of `data`
    /// is not processed.
    pub fn process<F>(&mut self, data: &[u8], mut emit: F) -> Result<()>
    where
        F: FnMut(Vec<u8>),
    {
        let zult = self.process_inner(data, &mut emit);
        if zult.is_err() {
            self.reset();
        }
        zult
    }

    fn process_inner<F>(&mut self, mut data: &[u8], emit: &mut F) -> Result<()>
    where
        F: FnMut(Vec<u8>),
    {
        while !data.is_empty() {
            if self.cache.is_empty() {
                if let Required::Packet(len) = self.required(data)? {
                    if len <= data.len() {
                        let (packet, rest) = data.split_at(len);
                        self.emit_packet(packet.to_vec(), emit);
                        data = rest;
                        continue;
                    }
                }
            }

            // Accumulate only up to the end of the header, or the packet, so the remaining
            // bytes are left for the next packet.
            let want = match self.required(&self.cache)? {
                Required::Header(n) | Required::Packet(n) => n,
            };
            let take = (want - self.cache.len()).min(data.len());
            self.cache.extend_from_slice(&data[..take]);
            data = &data[take..];

            if let Required::Packet(len) = self.required(&self.cache)? {
                if self.cache.len() == len {
                    let packet = std::mem::take(&mut self.cache);
                    self.emit_packet(packet, emit);
                }
            }
        }
        Ok(())
    }

    fn required(&self, dat: &[u8]) -> Result<Required> {
        let Some(first) = dat.first() else {
            return Ok(Required::Header(1));
        };
        let (header_len, len) = match first >> 5 {
            SPACE_PACKET_VERSION => {
                let Some(header) = PrimaryHeader::decode(dat) else {
                    return Ok(Required::Header(PrimaryHeader::LEN));
                };
                (PrimaryHeader::LEN, header.packet_len())
            }
            ENCAPSULATION_VERSION => {
                let header_len = encapsulation_header_len(*first);
                if dat.len() < header_len {
                    return Ok(Required::Header(header_len));
                }
                let len = match header_len {
                    1 => 1,
                    2 => usize::from(dat[1]),
                    4 => usize::from(u16::from_be_bytes([dat[2], dat[3]])),
                    _ => u32::from_be_bytes([dat[4], dat[5], dat[6], dat[7]]) as usize,
                };
                (header_len, len)
            }
            version => {
                return Err(Error::Framing(format!(
                    "invalid packet version {version}"
                )))
            }
        };

        if len > self.max_packet_length {
            return Err(Error::Framing(format!(
                "packet length {len} exceeds maximum of {}",
                self.max_packet_length
            )));
        }
        if len < header_len {
            return Err(Error::Framing(format!(
                "packet length {len} shorter than its {header_len} byte header"
            )));
        }
        Ok(Required::Packet(len))
    }

    fn emit_packet<F>(&self, packet: Vec<u8>, emit: &mut F)
    where
        F: FnMut(Vec<u8>),
    {
        if packet[0] >> 5 != ENCAPSULATION_VERSION {
            emit(packet);
            return;
        }
        let header_len = encapsulation_header_len(packet[0]);
        if header_len == 1 {
            trace!("dropping idle encapsulation packet");
        } else if self.strip_encapsulation_header {
            emit(packet[header_len..].to_vec());
        } else {
            emit(packet);
        }
    }
}

/// Encapsulation packet header length from the length-of-length bits.
///
/// Ref: CCSDS 133.1-B-3, Section 4.1.2
fn encapsulation_header_len(first: u8) -> usize {
    match first & 0x3 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Space packet with `data_len` user data bytes of `fill`
    fn packet(apid: u16, data_len: usize, fill: u8) -> Vec<u8> {
        let mut dat = apid.to_be_bytes().to_vec();
        dat.extend_from_slice(&[0xc0, 0x00]);
        dat.extend_from_slice(&u16::try_from(data_len - 1).unwrap().to_be_bytes());
        dat.resize(PrimaryHeader::LEN + data_len, fill);
        dat
    }

    fn decode_all(decoder: &mut PacketDecoder, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for chunk in chunks {
            decoder.process(chunk, |p| packets.push(p)).unwrap();
        }
        packets
    }

    #[test]
    fn test_packets_in_one_chunk() {
        let mut dat = packet(1, 10, 0xaa);
        dat.extend(packet(2, 1, 0xbb));
        let mut decoder = PacketDecoder::new(1024);

        let packets = decode_all(&mut decoder, &[&dat]);

        assert_eq!(packets, vec![packet(1, 10, 0xaa), packet(2, 1, 0xbb)]);
        assert!(!decoder.has_incomplete_packet());
    }

    #[test]
    fn test_packet_split_over_three_chunks() {
        let pkt = packet(5, 100, 0x11);
        let mut decoder = PacketDecoder::new(1024);

        let packets = decode_all(&mut decoder, &[&pkt[..40], &pkt[40..80], &pkt[80..]]);

        assert_eq!(packets, vec![pkt]);
    }

    #[test]
    fn test_header_split_across_chunks() {
        let mut dat = packet(1, 20, 0x01);
        dat.extend(packet(2, 20, 0x02));
        let mut decoder = PacketDecoder::new(1024);

        // the second packet's header is split after 3 bytes
        let packets = decode_all(&mut decoder, &[&dat[..29], &dat[29..]]);

        assert_eq!(packets, vec![packet(1, 20, 0x01), packet(2, 20, 0x02)]);
    }

    #[test]
    fn test_incomplete_packet() {
        let pkt = packet(5, 100, 0x11);
        let mut decoder = PacketDecoder::new(1024);

        let packets = decode_all(&mut decoder, &[&pkt[..50]]);

        assert!(packets.is_empty());
        assert!(decoder.has_incomplete_packet());
        decoder.reset();
        assert!(!decoder.has_incomplete_packet());
    }

    #[test]
    fn test_packet_too_long_is_framing_error() {
        let mut decoder = PacketDecoder::new(64);
        let dat = packet(5, 100, 0x11);

        let zult = decoder.process(&dat[..50], |_| panic!("should not emit"));

        assert!(matches!(zult, Err(Error::Framing(_))), "got {zult:?}");
        assert!(!decoder.has_incomplete_packet());
    }

    #[test]
    fn test_invalid_version_is_framing_error() {
        let mut decoder = PacketDecoder::new(1024);
        let zult = decoder.process(&[0x20, 0, 0, 0, 0, 0, 0], |_| {});
        assert!(matches!(zult, Err(Error::Framing(_))));
    }

    #[test]
    fn test_encapsulation_packets() {
        let mut dat = vec![0xe0, 0xe0]; // two idle packets
        dat.extend_from_slice(&[0xe1, 0x04, 0xaa, 0xbb]); // 2 byte header
        dat.extend_from_slice(&[0xe2, 0x00, 0x00, 0x05, 0xcc]); // 4 byte header
        let mut decoder = PacketDecoder::new(1024).with_strip_encapsulation_header(true);

        let packets = decode_all(&mut decoder, &[&dat[..7], &dat[7..]]);

        assert_eq!(packets, vec![vec![0xaa, 0xbb], vec![0xcc]]);
    }
}
