use std::collections::HashMap;

use super::{Apid, PrimaryHeader};

/// Per-APID packet sequence counters, wrapping at [PrimaryHeader::SEQ_MAX].
#[derive(Debug, Clone, Default)]
pub struct SeqCountFiller {
    counts: HashMap<Apid, u16>,
}

impl SeqCountFiller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next count for `apid`.
    pub fn next(&mut self, apid: Apid) -> u16 {
        let count = self.counts.entry(apid).or_insert(0);
        let zult = *count;
        *count = if *count >= PrimaryHeader::SEQ_MAX {
            0
        } else {
            *count + 1
        };
        zult
    }

    /// Write the next sequence count for the packet's APID into the packet, leaving the
    /// sequence flags unchanged.
    ///
    /// Returns the count written, or `None` if `packet` is too short for a primary header.
    pub fn fill(&mut self, packet: &mut [u8]) -> Option<u16> {
        let header = PrimaryHeader::decode(packet)?;
        let count = self.next(header.apid);
        let d2 = (u16::from(header.sequence_flags) << 14) | count;
        packet[2..4].copy_from_slice(&d2.to_be_bytes());
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_apid() {
        let mut filler = SeqCountFiller::new();
        assert_eq!(filler.next(1), 0);
        assert_eq!(filler.next(1), 1);
        assert_eq!(filler.next(2), 0);
        assert_eq!(filler.next(1), 2);
    }

    #[test]
    fn test_wraps() {
        let mut filler = SeqCountFiller::new();
        filler.counts.insert(7, PrimaryHeader::SEQ_MAX);
        assert_eq!(filler.next(7), PrimaryHeader::SEQ_MAX);
        assert_eq!(filler.next(7), 0);
    }

    #[test]
    fn test_fill_keeps_flags() {
        let mut filler = SeqCountFiller::new();
        let mut packet = [0x18, 0x07, 0xc0, 0x00, 0x00, 0x00, 0x00];
        filler.next(7);

        assert_eq!(filler.fill(&mut packet), Some(1));
        assert_eq!(&packet[2..4], &[0xc0, 0x01]);
        assert_eq!(filler.fill(&mut [0u8; 3]), None);
    }
}
