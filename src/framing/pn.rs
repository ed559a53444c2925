//! Pseudo-noise sequences for transfer frame (de)randomization.
//!
//! Ref: CCSDS 131.0-B-4 Section 10 (TM), CCSDS 231.0-B-4 Section 6 (TC)

/// Both sequences repeat every 255 octets.
const PN_LEN: usize = 255;

/// Octets of a Fibonacci LFSR sequence with all-ones seed, where `taps` are the state
/// positions XOR'd into the feedback.
const fn pn_sequence(taps: &[usize]) -> [u8; PN_LEN] {
    let mut state = [1u8; 8];
    let mut out = [0u8; PN_LEN];
    let mut i = 0;
    while i < PN_LEN * 8 {
        out[i / 8] = (out[i / 8] << 1) | state[0];
        let mut feedback = 0;
        let mut t = 0;
        while t < taps.len() {
            feedback ^= state[taps[t]];
            t += 1;
        }
        let mut j = 0;
        while j < 7 {
            state[j] = state[j + 1];
            j += 1;
        }
        state[7] = feedback;
        i += 1;
    }
    out
}

/// h(x) = x^8 + x^7 + x^5 + x^3 + 1
const TM_PN: [u8; PN_LEN] = pn_sequence(&[0, 3, 5, 7]);
/// h(x) = x^8 + x^6 + x^4 + x^3 + x^2 + x + 1
const TC_PN: [u8; PN_LEN] = pn_sequence(&[0, 1, 2, 3, 4, 6]);

fn apply(seq: &[u8; PN_LEN], dat: &mut [u8]) {
    for (b, pn) in dat.iter_mut().zip(seq.iter().cycle()) {
        *b ^= pn;
    }
}

pub trait Derandomizer: Send + Sync {
    fn derandomize(&self, dat: &[u8]) -> Vec<u8>;
}

/// CCSDS TM pseudo-randomizer; randomization and derandomization are the same operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDerandomizer;

impl Derandomizer for DefaultDerandomizer {
    fn derandomize(&self, dat: &[u8]) -> Vec<u8> {
        let mut zult = dat.to_vec();
        apply(&TM_PN, &mut zult);
        zult
    }
}

/// Apply the CCSDS TC pseudo-randomizer to `dat` in place.
pub fn tc_randomize(dat: &mut [u8]) {
    apply(&TC_PN, dat);
}
