use serde::{Deserialize, Serialize};

use super::Vcid;

/// Communications link control word, the COP-1 report carried in the operational control
/// field of downlink frames.
///
/// Ref: CCSDS 232.0-B-4, Section 4.2.1
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clcw {
    pub version: u8,
    pub status: u8,
    pub cop_in_effect: u8,
    /// Virtual channel the report is for
    pub vcid: Vcid,
    pub no_rf_available: bool,
    pub no_bit_lock: bool,
    /// FARM-1 has rejected a type-AD frame and is locked out until unlocked
    pub lockout: bool,
    /// FARM-1 cannot accept type-AD frames
    pub wait: bool,
    /// Type-AD frames must be retransmitted
    pub retransmit: bool,
    pub farm_b_counter: u8,
    /// N(R), the next expected type-AD frame sequence number
    pub report_value: u8,
}

impl Clcw {
    /// Decode an operational control field, or `None` if it does not hold a CLCW, i.e.,
    /// the control word type bit is set.
    #[must_use]
    pub fn decode(ocf: u32) -> Option<Self> {
        if ocf >> 31 != 0 {
            return None;
        }
        let flag = |bit: u32| (ocf >> bit) & 0x1 == 1;
        Some(Clcw {
            version: ((ocf >> 29) & 0x3) as u8,
            status: ((ocf >> 26) & 0x7) as u8,
            cop_in_effect: ((ocf >> 24) & 0x3) as u8,
            vcid: ((ocf >> 18) & 0x3f) as u8,
            no_rf_available: flag(15),
            no_bit_lock: flag(14),
            lockout: flag(13),
            wait: flag(12),
            retransmit: flag(11),
            farm_b_counter: ((ocf >> 9) & 0x3) as u8,
            report_value: (ocf & 0xff) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_clcw() {
        // cop 1, vcid 3, lockout, retransmit, farm-b 2, N(R) 0x2a
        let ocf: u32 = (1 << 24) | (3 << 18) | (1 << 13) | (1 << 11) | (2 << 9) | 0x2a;

        let clcw = Clcw::decode(ocf).unwrap();

        assert_eq!(clcw.version, 0);
        assert_eq!(clcw.cop_in_effect, 1);
        assert_eq!(clcw.vcid, 3);
        assert!(!clcw.no_rf_available);
        assert!(!clcw.no_bit_lock);
        assert!(clcw.lockout);
        assert!(!clcw.wait);
        assert!(clcw.retransmit);
        assert_eq!(clcw.farm_b_counter, 2);
        assert_eq!(clcw.report_value, 0x2a);
    }

    #[test]
    fn decode_rf_flags() {
        let clcw = Clcw::decode((1 << 15) | (1 << 14) | (1 << 12)).unwrap();

        assert!(clcw.no_rf_available);
        assert!(clcw.no_bit_lock);
        assert!(clcw.wait);
        assert!(!clcw.lockout);
    }

    #[test]
    fn decode_not_a_clcw() {
        assert!(Clcw::decode(0x8000_0000).is_none());
    }
}
