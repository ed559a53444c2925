//! Time code decoding for packet generation times.
//!
//! Reference: [CCSDS Time Code Formats](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
use std::io::Read;
use std::str::FromStr;

use hifitime::{Duration, Epoch, TimeScale};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of fine time octets that contribute to the decoded milliseconds.
const MAX_USED_FINE_BYTES: usize = 2;

/// Decodes an on-board time from a byte source.
pub trait TimeDecoder: Send + Sync {
    /// Decode the time as milliseconds relative to the on-board epoch.
    ///
    /// # Errors
    /// [Error::Io] if the source is exhausted before the time is complete.
    fn decode(&self, r: &mut dyn Read) -> Result<i64>;

    /// Decode the time without any unit conversion, i.e., the raw counter value.
    ///
    /// # Errors
    /// [Error::Io] if the source is exhausted before the time is complete.
    fn decode_raw(&self, r: &mut dyn Read) -> Result<i64>;
}

/// Byte order of fixed size and floating point time fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    fn u64_from(self, buf: [u8; 8]) -> u64 {
        match self {
            ByteOrder::BigEndian => u64::from_be_bytes(buf),
            ByteOrder::LittleEndian => u64::from_le_bytes(buf),
        }
    }
}

fn read_u8(r: &mut dyn Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// CCSDS Unsegmented time code (CUC) decoder.
///
/// The P-field is either implicit, i.e., configured here and not present in the data, or
/// read as the first octet of the time code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CucTimeDecoder {
    implicit_pfield: Option<u8>,
    implicit_pfield_cont: Option<u8>,
}

/// Octet counts and values read from a CUC time code.
struct CucValue {
    coarse: u64,
    coarse_len: usize,
    fine: u64,
    fine_len: usize,
    fine_used: u64,
    fine_used_len: usize,
}

impl CucTimeDecoder {
    #[must_use]
    pub fn new(implicit_pfield: Option<u8>, implicit_pfield_cont: Option<u8>) -> Self {
        Self {
            implicit_pfield,
            implicit_pfield_cont,
        }
    }

    fn read_value(&self, r: &mut dyn Read) -> Result<CucValue> {
        let pfield = match self.implicit_pfield {
            Some(p) => p,
            None => read_u8(r)?,
        };
        let mut coarse_len = 1 + ((pfield >> 2) & 0x3) as usize;
        let mut fine_len = (pfield & 0x3) as usize;

        if pfield & 0x80 != 0 {
            let ext = match self.implicit_pfield_cont {
                Some(p) => p,
                None => read_u8(r)?,
            };
            coarse_len += ((ext >> 6) & 0x3) as usize;
            fine_len += ((ext >> 2) & 0x7) as usize;
        }

        let mut coarse: u64 = 0;
        for _ in 0..coarse_len {
            coarse = (coarse << 8) | u64::from(read_u8(r)?);
        }

        let mut fine: u64 = 0;
        let mut fine_used: u64 = 0;
        let fine_used_len = fine_len.min(MAX_USED_FINE_BYTES);
        for i in 0..fine_len {
            let b = u64::from(read_u8(r)?);
            fine = (fine << 8) | b;
            if i < fine_used_len {
                fine_used = (fine_used << 8) | b;
            }
        }

        Ok(CucValue {
            coarse,
            coarse_len,
            fine,
            fine_len,
            fine_used,
            fine_used_len,
        })
    }
}

impl TimeDecoder for CucTimeDecoder {
    fn decode(&self, r: &mut dyn Read) -> Result<i64> {
        let v = self.read_value(r)?;
        let fine_ms = if v.fine_used_len == 0 {
            0
        } else {
            (1000 * v.fine_used) >> (8 * v.fine_used_len)
        };
        let millis = v
            .coarse
            .checked_mul(1000)
            .and_then(|c| c.checked_add(fine_ms))
            .ok_or(Error::Overflow)?;
        i64::try_from(millis).map_err(|_| Error::Overflow)
    }

    fn decode_raw(&self, r: &mut dyn Read) -> Result<i64> {
        let v = self.read_value(r)?;
        if v.coarse_len + v.fine_len > 8 {
            return Err(Error::Overflow);
        }
        let raw = if v.fine_len == 0 {
            v.coarse
        } else {
            (v.coarse << (8 * v.fine_len)) | v.fine
        };
        i64::try_from(raw).map_err(|_| Error::Overflow)
    }
}

/// Unsigned counter of 4 or 8 octets scaled by a multiplier to milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedSizeTimeDecoder {
    size: usize,
    multiplier: f64,
    byte_order: ByteOrder,
}

impl FixedSizeTimeDecoder {
    /// Big-endian counter of `size` octets.
    ///
    /// # Errors
    /// [Error::TimecodeConfig] if `size` is not 4 or 8.
    pub fn new(size: usize, multiplier: f64) -> Result<Self> {
        if size != 4 && size != 8 {
            return Err(Error::TimecodeConfig(format!(
                "fixed size time must be 4 or 8 bytes; got {size}"
            )));
        }
        Ok(Self {
            size,
            multiplier,
            byte_order: ByteOrder::BigEndian,
        })
    }

    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    fn read_counter(&self, r: &mut dyn Read) -> Result<u64> {
        let mut buf = [0u8; 8];
        // counter occupies the low order octets
        let dst = match self.byte_order {
            ByteOrder::BigEndian => &mut buf[8 - self.size..],
            ByteOrder::LittleEndian => &mut buf[..self.size],
        };
        r.read_exact(dst)?;
        Ok(self.byte_order.u64_from(buf))
    }
}

impl TimeDecoder for FixedSizeTimeDecoder {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn decode(&self, r: &mut dyn Read) -> Result<i64> {
        let counter = self.read_counter(r)?;
        Ok((counter as f64 * self.multiplier).round() as i64)
    }

    fn decode_raw(&self, r: &mut dyn Read) -> Result<i64> {
        let counter = self.read_counter(r)?;
        i64::try_from(counter).map_err(|_| Error::Overflow)
    }
}

/// IEEE-754 double precision seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Float64TimeDecoder {
    byte_order: ByteOrder,
}

impl Float64TimeDecoder {
    #[must_use]
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }

    fn read_bits(self, r: &mut dyn Read) -> Result<u64> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        Ok(self.byte_order.u64_from(buf))
    }
}

impl TimeDecoder for Float64TimeDecoder {
    #[allow(clippy::cast_possible_truncation)]
    fn decode(&self, r: &mut dyn Read) -> Result<i64> {
        let secs = f64::from_bits(self.read_bits(r)?);
        Ok((secs * 1000.0).round() as i64)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn decode_raw(&self, r: &mut dyn Read) -> Result<i64> {
        Ok(self.read_bits(r)? as i64)
    }
}

/// Epoch an on-board time is relative to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", tag = "type", content = "epoch")]
pub enum TimeEpoch {
    /// 1958-01-01 TAI
    Tai,
    /// 2000-01-01T12:00:00 TT
    J2000,
    /// 1970-01-01 UTC
    Unix,
    /// 1980-01-06 UTC
    Gps,
    /// A UTC date-time string parsable by hifitime, e.g., `2010-01-01T00:00:00 UTC`.
    Custom(String),
    /// No known epoch; the raw on-board time is kept uncorrelated.
    None,
}

impl TimeEpoch {
    fn epoch(&self) -> Result<Option<Epoch>> {
        Ok(match self {
            TimeEpoch::Tai => Some(Epoch::from_gregorian(
                1958,
                1,
                1,
                0,
                0,
                0,
                0,
                TimeScale::TAI,
            )),
            TimeEpoch::J2000 => Some(Epoch::from_gregorian(
                2000,
                1,
                1,
                12,
                0,
                0,
                0,
                TimeScale::TT,
            )),
            TimeEpoch::Unix => Some(Epoch::from_gregorian_utc_at_midnight(1970, 1, 1)),
            TimeEpoch::Gps => Some(Epoch::from_gpst_duration(Duration::ZERO)),
            TimeEpoch::Custom(s) => Some(Epoch::from_str(s).map_err(|err| {
                Error::TimecodeConfig(format!("invalid custom epoch {s:?}: {err}"))
            })?),
            TimeEpoch::None => None,
        })
    }

    /// Convert `millis` elapsed since this epoch into milliseconds since the Unix epoch.
    ///
    /// Leap seconds inserted after the epoch are part of the elapsed time, except for
    /// [TimeEpoch::Unix] which, like Unix time, does not count them. [TimeEpoch::None]
    /// returns `millis` unchanged.
    ///
    /// # Errors
    /// [Error::TimecodeConfig] if a custom epoch cannot be parsed.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn to_unix_millis(&self, millis: i64) -> Result<i64> {
        if *self == TimeEpoch::Unix {
            return Ok(millis);
        }
        let Some(epoch) = self.epoch()? else {
            return Ok(millis);
        };
        let t = epoch + Duration::from_milliseconds(millis as f64);
        Ok(t.to_unix_milliseconds().round() as i64)
    }

    /// Convert `millis` of UTC time since this epoch, i.e., not counting leap seconds,
    /// into milliseconds since the Unix epoch.
    ///
    /// # Errors
    /// [Error::TimecodeConfig] if a custom epoch cannot be parsed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_unix_millis_utc(&self, millis: i64) -> Result<i64> {
        let Some(epoch) = self.epoch()? else {
            return Ok(millis);
        };
        let base = epoch.to_unix_milliseconds().round() as i64;
        base.checked_add(millis).ok_or(Error::Overflow)
    }
}
