use crate::framing::tc_randomize;
use crate::{Error, Result};

/// Frames uplink data into Command Link Transmission Units.
pub trait CltuGenerator: Send + Sync {
    /// Create a CLTU from `data`. Whether `randomize` has an effect depends on the
    /// implementation.
    fn make_cltu(&self, data: &[u8], randomize: bool) -> Vec<u8>;
}

/// Pads data to a multiple of a block size with zeros; no coding is performed and
/// `randomize` is ignored.
#[derive(Debug, Clone, Copy)]
pub struct PaddingCltuGenerator {
    block_size: usize,
}

impl PaddingCltuGenerator {
    /// # Errors
    /// [Error::InvalidArgument] if `block_size` is zero.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidArgument(
                "CLTU block size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { block_size })
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl CltuGenerator for PaddingCltuGenerator {
    fn make_cltu(&self, data: &[u8], _randomize: bool) -> Vec<u8> {
        let mut cltu = data.to_vec();
        cltu.resize(data.len().next_multiple_of(self.block_size), 0);
        cltu
    }
}

/// BCH(63,56) generator polynomial x^7 + x^6 + x^2 + 1, shifted left one bit
const BCH_POLYNOMIAL: u8 = 0x8a;

const fn bch_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        // i < 256
        let mut val = i as u8;
        let mut bit = 0;
        while bit < 8 {
            val = if val & 0x80 == 0 {
                val << 1
            } else {
                (val << 1) ^ BCH_POLYNOMIAL
            };
            bit += 1;
        }
        table[i] = val;
        i += 1;
    }
    table
}

const BCH_TABLE: [u8; 256] = bch_table();

/// Parity octet of a 7 octet BCH codeblock; the complemented 7 bit remainder followed by
/// the filler bit.
#[must_use]
pub fn bch_parity(block: &[u8]) -> u8 {
    let remainder = block
        .iter()
        .fold(0u8, |acc, b| BCH_TABLE[usize::from(b ^ acc)]);
    (remainder ^ 0xff) & 0xfe
}

/// CLTU generator per CCSDS 231.0-B: start sequence, BCH(63,56) codeblocks and tail
/// sequence. With `randomize` the data is randomized with the TC pseudo-random sequence
/// before encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BchCltuGenerator;

impl BchCltuGenerator {
    pub const START_SEQUENCE: [u8; 2] = [0xeb, 0x90];
    pub const TAIL_SEQUENCE: [u8; 8] = [0xc5, 0xc5, 0xc5, 0xc5, 0xc5, 0xc5, 0xc5, 0x79];
    /// Alternating zeros and ones filling the last codeblock
    pub const FILL: u8 = 0x55;
    /// Information octets per codeblock
    pub const BLOCK_DATA_LEN: usize = 7;
}

impl CltuGenerator for BchCltuGenerator {
    fn make_cltu(&self, data: &[u8], randomize: bool) -> Vec<u8> {
        let mut data = data.to_vec();
        if randomize {
            tc_randomize(&mut data);
        }
        data.resize(data.len().next_multiple_of(Self::BLOCK_DATA_LEN), Self::FILL);

        let blocks = data.len() / Self::BLOCK_DATA_LEN;
        let mut cltu = Vec::with_capacity(
            Self::START_SEQUENCE.len() + blocks * 8 + Self::TAIL_SEQUENCE.len(),
        );
        cltu.extend_from_slice(&Self::START_SEQUENCE);
        for block in data.chunks(Self::BLOCK_DATA_LEN) {
            cltu.extend_from_slice(block);
            cltu.push(bch_parity(block));
        }
        cltu.extend_from_slice(&Self::TAIL_SEQUENCE);
        cltu
    }
}
