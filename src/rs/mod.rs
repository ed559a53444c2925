//! Reed-Solomon forward error correction over GF(2^symsize).
//!
//! Any code defined by the parameter tuple `(nroots, symsize, fcr, prim, gfpoly, pad)` is
//! supported, including shortened codes. Correction follows the Berlekamp-Massey, Chien
//! search, Forney procedure as described by Phil Karn's general purpose decoder.
//!
//! Ref: [CCSDS 131.0-B-4](https://public.ccsds.org/Pubs/131x0b4.pdf), Section 4
mod dual_basis;

pub use dual_basis::*;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Code parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReedSolomonParams {
    /// Number of parity symbols, i.e., the code can correct `nroots / 2` symbol errors.
    pub nroots: usize,
    /// Bits per symbol.
    pub symsize: usize,
    /// First consecutive root of the generator polynomial, in index form.
    pub fcr: usize,
    /// Primitive element used to generate the roots, in index form.
    pub prim: usize,
    /// Field generator polynomial coefficients.
    pub gfpoly: usize,
    /// Number of leading symbols omitted for shortened codes.
    pub pad: usize,
}

impl ReedSolomonParams {
    /// The CCSDS recommended (255,223) code, E=16.
    pub const CCSDS: ReedSolomonParams = ReedSolomonParams {
        nroots: 32,
        symsize: 8,
        fcr: 112,
        prim: 11,
        gfpoly: 0x187,
        pad: 0,
    };

    /// CCSDS (255,239) code, E=8.
    pub const CCSDS_E8: ReedSolomonParams = ReedSolomonParams {
        nroots: 16,
        symsize: 8,
        fcr: 120,
        prim: 11,
        gfpoly: 0x187,
        pad: 0,
    };

    /// AOS frame header error control, a (10,6) code over GF(16) with generator roots
    /// alpha^6 to alpha^9.
    ///
    /// Ref: CCSDS 732.0-B-4, Section 4.1.2.6
    pub const AOS_FHEC: ReedSolomonParams = ReedSolomonParams {
        nroots: 4,
        symsize: 4,
        fcr: 6,
        prim: 1,
        gfpoly: 0x13,
        pad: 5,
    };
}

/// A Reed-Solomon codec with precomputed field and generator polynomial tables.
///
/// The codec holds no decoding state and can be shared between threads.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    params: ReedSolomonParams,
    /// Symbols per codeword, `2^symsize - 1`
    nn: usize,
    iprim: usize,
    /// Log lookup; index form to polynomial form
    alpha_to: Vec<usize>,
    /// Antilog lookup; polynomial form to index form
    index_of: Vec<usize>,
    /// Generator polynomial, index form
    genpoly: Vec<usize>,
}

impl ReedSolomon {
    /// Construct a codec for `params`.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if any of the parameters are out of range or `gfpoly` is not
    /// a primitive polynomial.
    pub fn new(params: ReedSolomonParams) -> Result<Self> {
        let ReedSolomonParams {
            nroots,
            symsize,
            fcr,
            prim,
            gfpoly,
            pad,
        } = params;

        if !(2..=8).contains(&symsize) {
            return Err(Error::InvalidArgument(format!(
                "symsize must be between 2 and 8; got {symsize}"
            )));
        }
        let nn = (1usize << symsize) - 1;
        if fcr > nn {
            return Err(Error::InvalidArgument(format!(
                "fcr must be <= {nn}; got {fcr}"
            )));
        }
        if prim == 0 || prim > nn {
            return Err(Error::InvalidArgument(format!(
                "prim must be between 1 and {nn}; got {prim}"
            )));
        }
        if nroots == 0 || nroots >= nn {
            return Err(Error::InvalidArgument(format!(
                "nroots must be between 1 and {}; got {nroots}",
                nn - 1
            )));
        }
        if pad >= nn - nroots {
            return Err(Error::InvalidArgument(format!(
                "pad must be < {}; got {pad}",
                nn - nroots
            )));
        }

        let mut alpha_to = vec![0usize; nn + 1];
        let mut index_of = vec![0usize; nn + 1];
        index_of[0] = nn;
        alpha_to[nn] = 0;
        let mut sr = 1usize;
        for i in 0..nn {
            index_of[sr] = i;
            alpha_to[i] = sr;
            sr <<= 1;
            if sr & (1 << symsize) != 0 {
                sr ^= gfpoly;
            }
            sr &= nn;
        }
        if sr != 1 {
            return Err(Error::InvalidArgument(format!(
                "gfpoly {gfpoly:#x} is not primitive"
            )));
        }

        // prim-th root of 1, used in decoding
        let mut iprim = 1;
        while iprim % prim != 0 {
            iprim += nn;
        }
        iprim /= prim;

        let mut rs = ReedSolomon {
            params,
            nn,
            iprim,
            alpha_to,
            index_of,
            genpoly: Vec::default(),
        };

        let mut genpoly = vec![0usize; nroots + 1];
        genpoly[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            genpoly[i + 1] = 1;
            // multiply genpoly by (x + alpha^root)
            for j in (1..=i).rev() {
                genpoly[j] = if genpoly[j] == 0 {
                    genpoly[j - 1]
                } else {
                    genpoly[j - 1] ^ rs.alpha_to[rs.modnn(rs.index_of[genpoly[j]] + root)]
                };
            }
            genpoly[0] = rs.alpha_to[rs.modnn(rs.index_of[genpoly[0]] + root)];
            root += prim;
        }
        rs.genpoly = genpoly.iter().map(|g| rs.index_of[*g]).collect();

        Ok(rs)
    }

    /// Codec for [ReedSolomonParams::CCSDS].
    ///
    /// # Panics
    /// Never; the CCSDS parameters are valid.
    #[must_use]
    pub fn ccsds() -> Self {
        Self::new(ReedSolomonParams::CCSDS).expect("CCSDS parameters are valid")
    }

    /// Codec for [ReedSolomonParams::AOS_FHEC].
    ///
    /// # Panics
    /// Never; the FHEC parameters are valid.
    #[must_use]
    pub fn aos_fhec() -> Self {
        Self::new(ReedSolomonParams::AOS_FHEC).expect("FHEC parameters are valid")
    }

    #[must_use]
    pub fn params(&self) -> &ReedSolomonParams {
        &self.params
    }

    /// Number of data symbols in a (possibly shortened) codeword.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.nn - self.params.nroots - self.params.pad
    }

    /// Number of symbols in a (possibly shortened) codeword, data plus parity.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.nn - self.params.pad
    }

    #[must_use]
    pub fn parity_len(&self) -> usize {
        self.params.nroots
    }

    fn modnn(&self, x: usize) -> usize {
        x % self.nn
    }

    fn check_symbols(&self, symbols: &[u8]) -> Result<()> {
        if let Some(sym) = symbols.iter().find(|s| usize::from(**s) > self.nn) {
            return Err(Error::InvalidArgument(format!(
                "symbol {sym:#x} exceeds {} bit symbol size",
                self.params.symsize
            )));
        }
        Ok(())
    }

    /// Compute parity for `data` into `parity`.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if `data` is not [Self::data_len] symbols, `parity` is not
    /// [Self::parity_len] symbols, or a symbol does not fit in `symsize` bits.
    pub fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()> {
        let nroots = self.params.nroots;
        if data.len() != self.data_len() {
            return Err(Error::InvalidArgument(format!(
                "expected {} data symbols; got {}",
                self.data_len(),
                data.len()
            )));
        }
        if parity.len() != nroots {
            return Err(Error::InvalidArgument(format!(
                "expected {nroots} parity symbols; got {}",
                parity.len()
            )));
        }
        self.check_symbols(data)?;

        let a0 = self.nn;
        let mut par = vec![0usize; nroots];
        for sym in data {
            let feedback = self.index_of[usize::from(*sym) ^ par[0]];
            if feedback != a0 {
                for j in 1..nroots {
                    par[j] ^= self.alpha_to[self.modnn(feedback + self.genpoly[nroots - j])];
                }
            }
            par.rotate_left(1);
            par[nroots - 1] = if feedback == a0 {
                0
            } else {
                self.alpha_to[self.modnn(feedback + self.genpoly[0])]
            };
        }

        for (dst, src) in parity.iter_mut().zip(par) {
            // symbols are at most 8 bits
            *dst = src as u8;
        }
        Ok(())
    }

    /// Encode a byte stream into consecutive codewords.
    ///
    /// `data` is split into [Self::data_len] sized blocks, the last zero-filled if
    /// necessary, each followed by its parity.
    ///
    /// # Errors
    /// [Error::InvalidArgument] if a symbol does not fit in `symsize` bits.
    pub fn encode_stream(&self, data: &[u8]) -> Result<Vec<u8>> {
        let k = self.data_len();
        let mut zult = Vec::with_capacity(data.len().div_ceil(k) * self.block_len());
        let mut parity = vec![0u8; self.parity_len()];
        for chunk in data.chunks(k) {
            let start = zult.len();
            zult.extend_from_slice(chunk);
            zult.resize(start + k, 0);
            self.encode(&zult[start..], &mut parity)?;
            zult.extend_from_slice(&parity);
        }
        Ok(zult)
    }

    /// Correct `block` (data followed by parity, [Self::block_len] symbols) in place.
    ///
    /// `erasures` are positions in `block` known to be in error.
    ///
    /// Returns the number of corrected symbols.
    ///
    /// # Errors
    /// [Error::UncorrectableFec] if there are more errors than the code can correct, or
    /// [Error::InvalidArgument] if `block` or `erasures` are invalid for this code.
    #[allow(clippy::too_many_lines)]
    pub fn decode(&self, block: &mut [u8], erasures: Option<&[usize]>) -> Result<usize> {
        let ReedSolomonParams {
            nroots, fcr, prim, pad, ..
        } = self.params;
        let nn = self.nn;
        let a0 = nn;

        if block.len() != self.block_len() {
            return Err(Error::InvalidArgument(format!(
                "expected block of {} symbols; got {}",
                self.block_len(),
                block.len()
            )));
        }
        self.check_symbols(block)?;
        let erasures = erasures.unwrap_or_default();
        if erasures.len() > nroots {
            return Err(Error::InvalidArgument(format!(
                "at most {nroots} erasures supported; got {}",
                erasures.len()
            )));
        }
        if let Some(pos) = erasures.iter().find(|p| **p >= block.len()) {
            return Err(Error::InvalidArgument(format!(
                "erasure position {pos} outside block"
            )));
        }
        let mut sorted = erasures.to_vec();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::InvalidArgument(format!(
                "duplicate erasure position {}",
                pair[0]
            )));
        }

        // syndromes, evaluating block at the roots of the generator
        let mut syn = vec![usize::from(block[0]); nroots];
        for sym in &block[1..] {
            let sym = usize::from(*sym);
            for (i, s) in syn.iter_mut().enumerate() {
                *s = if *s == 0 {
                    sym
                } else {
                    sym ^ self.alpha_to[self.modnn(self.index_of[*s] + (fcr + i) * prim)]
                };
            }
        }
        if syn.iter().all(|s| *s == 0) {
            return Ok(0);
        }
        let syn: Vec<usize> = syn.iter().map(|s| self.index_of[*s]).collect();

        // erasure locator polynomial, polynomial form
        let mut lambda = vec![0usize; nroots + 1];
        lambda[0] = 1;
        let num_erasures = erasures.len();
        if let Some(first) = erasures.first() {
            lambda[1] = self.alpha_to[self.modnn(prim * (nn - 1 - (first + pad)))];
            for (i, pos) in erasures.iter().enumerate().skip(1) {
                let u = self.modnn(prim * (nn - 1 - (pos + pad)));
                for j in (1..=i + 1).rev() {
                    let tmp = self.index_of[lambda[j - 1]];
                    if tmp != a0 {
                        lambda[j] ^= self.alpha_to[self.modnn(u + tmp)];
                    }
                }
            }
        }

        // Berlekamp-Massey
        let mut b: Vec<usize> = lambda.iter().map(|l| self.index_of[*l]).collect();
        let mut el = num_erasures;
        for r in (num_erasures + 1)..=nroots {
            let mut discr = 0usize;
            for i in 0..r {
                if lambda[i] != 0 && syn[r - i - 1] != a0 {
                    discr ^= self.alpha_to[self.modnn(self.index_of[lambda[i]] + syn[r - i - 1])];
                }
            }
            let discr = self.index_of[discr];
            if discr == a0 {
                b.rotate_right(1);
                b[0] = a0;
                continue;
            }

            let mut t = vec![0usize; nroots + 1];
            t[0] = lambda[0];
            for i in 0..nroots {
                t[i + 1] = if b[i] == a0 {
                    lambda[i + 1]
                } else {
                    lambda[i + 1] ^ self.alpha_to[self.modnn(discr + b[i])]
                };
            }
            if 2 * el < r + num_erasures {
                el = r + num_erasures - el;
                for (bi, li) in b.iter_mut().zip(&lambda) {
                    *bi = if *li == 0 {
                        a0
                    } else {
                        self.modnn(self.index_of[*li] + nn - discr)
                    };
                }
            } else {
                b.rotate_right(1);
                b[0] = a0;
            }
            lambda = t;
        }

        let lambda: Vec<usize> = lambda.iter().map(|l| self.index_of[*l]).collect();
        let deg_lambda = lambda.iter().rposition(|l| *l != a0).unwrap_or(0);
        if deg_lambda == 0 {
            return Err(Error::UncorrectableFec);
        }

        // Chien search for the roots of the error locator
        let mut reg = lambda.clone();
        let mut roots = Vec::with_capacity(deg_lambda);
        let mut locs = Vec::with_capacity(deg_lambda);
        let mut k = self.iprim - 1;
        for i in 1..=nn {
            let mut q = 1usize;
            for j in (1..=deg_lambda).rev() {
                if reg[j] != a0 {
                    reg[j] = self.modnn(reg[j] + j);
                    q ^= self.alpha_to[reg[j]];
                }
            }
            if q == 0 {
                roots.push(i);
                locs.push(k);
                if roots.len() == deg_lambda {
                    break;
                }
            }
            k = self.modnn(k + self.iprim);
        }
        if roots.len() != deg_lambda {
            return Err(Error::UncorrectableFec);
        }

        // error evaluator omega(x) = s(x) * lambda(x) mod x^nroots, index form
        let deg_omega = deg_lambda - 1;
        let mut omega = vec![a0; deg_omega + 1];
        for (i, o) in omega.iter_mut().enumerate() {
            let mut tmp = 0usize;
            for j in (0..=i).rev() {
                if syn[i - j] != a0 && lambda[j] != a0 {
                    tmp ^= self.alpha_to[self.modnn(syn[i - j] + lambda[j])];
                }
            }
            *o = self.index_of[tmp];
        }

        // Forney
        let mut corrections = Vec::with_capacity(roots.len());
        for (root, loc) in roots.iter().zip(&locs).rev() {
            let mut num1 = 0usize;
            for (i, o) in omega.iter().enumerate().rev() {
                if *o != a0 {
                    num1 ^= self.alpha_to[self.modnn(o + i * root)];
                }
            }
            let num2 = self.alpha_to[self.modnn(root * fcr + nn - root)];

            // lambda[i+1] for i even is the formal derivative lambda_pr of lambda
            let mut den = 0usize;
            let start = deg_lambda.min(nroots - 1) & !1;
            for i in (0..=start).rev().step_by(2) {
                if lambda[i + 1] != a0 {
                    den ^= self.alpha_to[self.modnn(lambda[i + 1] + i * root)];
                }
            }
            if den == 0 {
                return Err(Error::UncorrectableFec);
            }

            if num1 != 0 {
                // error located in the virtual fill of a shortened code
                if *loc < pad {
                    return Err(Error::UncorrectableFec);
                }
                let magnitude = self.alpha_to[self.modnn(
                    self.index_of[num1] + self.index_of[num2] + nn - self.index_of[den],
                )];
                corrections.push((loc - pad, magnitude));
            }
        }

        // only modify the block once every correction is known to be valid
        for (idx, magnitude) in corrections {
            block[idx] ^= magnitude as u8;
        }
        Ok(roots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};

    fn small_code() -> ReedSolomon {
        ReedSolomon::new(ReedSolomonParams {
            nroots: 4,
            symsize: 4,
            fcr: 1,
            prim: 1,
            gfpoly: 0x13,
            pad: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_small_code_encode() {
        let rs = small_code();
        assert_eq!(rs.data_len(), 6);
        assert_eq!(rs.block_len(), 10);

        let data = [1u8, 2, 3, 4, 5, 6];
        let mut parity = [0u8; 4];
        rs.encode(&data, &mut parity).unwrap();

        assert_eq!(parity, [13, 2, 4, 14]);
    }

    #[test]
    fn test_small_code_corrects_errors() {
        let rs = small_code();
        let codeword = [1u8, 2, 3, 4, 5, 6, 13, 2, 4, 14];

        let mut block = codeword;
        assert_eq!(rs.decode(&mut block, None).unwrap(), 0);

        block[2] ^= 0x7;
        assert_eq!(rs.decode(&mut block, None).unwrap(), 1);
        assert_eq!(block, codeword);

        block[0] ^= 0x1;
        block[8] ^= 0xf;
        assert_eq!(rs.decode(&mut block, None).unwrap(), 2);
        assert_eq!(block, codeword);
    }

    #[test]
    fn test_symbol_too_large_for_symsize() {
        let rs = small_code();
        let mut parity = [0u8; 4];
        let zult = rs.encode(&[1, 2, 3, 4, 5, 0x10], &mut parity);
        assert!(matches!(zult, Err(Error::InvalidArgument(_))));
    }

    fn random_codeword(rs: &ReedSolomon, rng: &mut StdRng) -> Vec<u8> {
        let mut block: Vec<u8> = (0..rs.data_len()).map(|_| rng.gen()).collect();
        let mut parity = vec![0u8; rs.parity_len()];
        rs.encode(&block, &mut parity).unwrap();
        block.extend(parity);
        block
    }

    fn corrupt(block: &mut [u8], num: usize, rng: &mut StdRng) -> Vec<usize> {
        let positions = sample(rng, block.len(), num).into_vec();
        for idx in &positions {
            block[*idx] ^= rng.gen_range(1..=255u8);
        }
        positions
    }

    #[test]
    fn test_ccsds_corrects_up_to_capacity() {
        let rs = ReedSolomon::ccsds();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for num_errors in [1, 8, 16] {
            let codeword = random_codeword(&rs, &mut rng);
            let mut block = codeword.clone();
            corrupt(&mut block, num_errors, &mut rng);

            let corrected = rs.decode(&mut block, None).unwrap();

            assert_eq!(corrected, num_errors);
            assert_eq!(block, codeword);
        }
    }

    #[test]
    fn test_ccsds_beyond_capacity_is_uncorrectable() {
        let rs = ReedSolomon::ccsds();
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..10 {
            let codeword = random_codeword(&rs, &mut rng);
            let mut block = codeword.clone();
            corrupt(&mut block, 17, &mut rng);
            let corrupted = block.clone();

            let zult = rs.decode(&mut block, None);

            assert!(matches!(zult, Err(Error::UncorrectableFec)), "got {zult:?}");
            assert_eq!(block, corrupted, "uncorrectable block must not be modified");
        }
    }

    #[test]
    fn test_shortened_code_with_erasures() {
        let rs = ReedSolomon::new(ReedSolomonParams {
            pad: 50,
            ..ReedSolomonParams::CCSDS
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let codeword = random_codeword(&rs, &mut rng);
        assert_eq!(codeword.len(), 205);

        // 20 erasures and 6 errors use 32 roots
        let mut block = codeword.clone();
        let erased = corrupt(&mut block, 26, &mut rng);

        rs.decode(&mut block, Some(&erased[..20])).unwrap();

        assert_eq!(block, codeword);
    }

    #[test]
    fn test_duplicate_erasures_are_rejected() {
        let rs = small_code();
        let codeword = [1u8, 2, 3, 4, 5, 6, 13, 2, 4, 14];
        let mut block = codeword;
        block[3] ^= 0x2;

        let zult = rs.decode(&mut block, Some(&[3, 7, 3]));

        assert!(matches!(zult, Err(Error::InvalidArgument(_))), "got {zult:?}");
        assert_eq!(block[3], codeword[3] ^ 0x2, "block must not be modified");
    }

    #[test]
    fn test_encode_stream() {
        let rs = ReedSolomon::ccsds();
        let data = vec![0xa5u8; 300];

        let encoded = rs.encode_stream(&data).unwrap();

        assert_eq!(encoded.len(), 2 * 255);
        assert_eq!(&encoded[..223], &data[..223]);
        assert_eq!(&encoded[255..255 + 77], &data[223..]);
        assert!(encoded[255 + 77..255 + 223].iter().all(|b| *b == 0));
        for block in encoded.chunks(255) {
            let mut block = block.to_vec();
            assert_eq!(rs.decode(&mut block, None).unwrap(), 0);
        }
    }

    #[test]
    fn test_invalid_params() {
        let base = ReedSolomonParams::CCSDS;
        let cases = [
            ReedSolomonParams { symsize: 9, ..base },
            ReedSolomonParams { symsize: 1, ..base },
            ReedSolomonParams { fcr: 256, ..base },
            ReedSolomonParams { prim: 0, ..base },
            ReedSolomonParams { nroots: 255, ..base },
            ReedSolomonParams { pad: 223, ..base },
            ReedSolomonParams {
                gfpoly: 0x100,
                ..base
            },
        ];
        for params in cases {
            assert!(
                matches!(ReedSolomon::new(params), Err(Error::InvalidArgument(_))),
                "expected {params:?} to be invalid"
            );
        }
    }
}
