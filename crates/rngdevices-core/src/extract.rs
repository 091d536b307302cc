//! Turning raw bytes into byte-, bit- and exact-bit-sized results.
//!
//! All three shapes reduce to one serialized `raw_read`; this module only
//! validates the request and works out how many bytes to read.

use crate::error::{Result, RngError};

/// A request for entropy in one of the supported shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyRequest {
    /// `n` raw bytes.
    Bytes(usize),
    /// At least `n` bits, rounded up to whole bytes.
    Bits(usize),
    /// Exactly `n` bits; `n` must be a positive multiple of 8.
    ExactBits(usize),
    /// Unbiased integer in `[min, max)`.
    Int { min: i64, max: i64 },
}

/// Result of an [`EntropyRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntropyValue {
    Bytes(Vec<u8>),
    Int(i64),
}

impl EntropyValue {
    /// Byte payload, if this is a byte-shaped result.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bytes(_) => None,
        }
    }
}

impl EntropyRequest {
    /// Check the request without touching any device.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Int { min, max } if max <= min => Err(RngError::invalid(format!(
                "min must be less than max, got min={min}, max={max}"
            ))),
            Self::Int { .. } => Ok(()),
            _ => self.byte_len().map(|_| ()),
        }
    }

    /// Bytes a byte-shaped request reads from the device.
    ///
    /// Integer requests draw a variable number of times; see
    /// [`IntSampler`](crate::sampler::IntSampler).
    pub fn byte_len(&self) -> Result<usize> {
        match *self {
            Self::Bytes(n) => byte_count(n),
            Self::Bits(n) => bit_byte_count(n),
            Self::ExactBits(n) => exact_bit_byte_count(n),
            Self::Int { .. } => Err(RngError::invalid(
                "integer requests have no fixed byte length",
            )),
        }
    }
}

/// Validate a byte count.
pub fn byte_count(n: usize) -> Result<usize> {
    if n == 0 {
        return Err(RngError::invalid("n must be positive, got 0"));
    }
    Ok(n)
}

/// Bytes needed to carry `n_bits` bits (`ceil(n/8)`).
///
/// Bits past `n_bits` in the final byte are unspecified filler.
pub fn bit_byte_count(n_bits: usize) -> Result<usize> {
    if n_bits == 0 {
        return Err(RngError::invalid("n must be positive, got 0"));
    }
    Ok(n_bits.div_ceil(8))
}

/// Bytes for an exact, byte-aligned bit count.
pub fn exact_bit_byte_count(n_bits: usize) -> Result<usize> {
    if n_bits == 0 || n_bits % 8 != 0 {
        return Err(RngError::invalid(format!(
            "n must be a positive multiple of 8, got {n_bits}"
        )));
    }
    Ok(n_bits / 8)
}

/// Raw bytes tagged with how many of their bits are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitBuffer {
    pub fn new(bytes: Vec<u8>, bit_len: usize) -> Result<Self> {
        if bit_len > bytes.len() * 8 {
            return Err(RngError::invalid(format!(
                "bit length {bit_len} exceeds {} available bits",
                bytes.len() * 8
            )));
        }
        Ok(Self { bytes, bit_len })
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Read the buffer as a big-endian integer and keep its lowest
    /// `bit_len` bits. Only defined for `bit_len <= 64`; longer buffers
    /// keep their trailing eight bytes.
    pub fn low_bits_u64(&self) -> u64 {
        let tail = &self.bytes[self.bytes.len().saturating_sub(8)..];
        let value = tail.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        match self.bit_len {
            0 => 0,
            64.. => value,
            bits => value & ((1u64 << bits) - 1),
        }
    }
}
