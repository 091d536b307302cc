//! Unbiased bounded integers by rejection sampling.
//!
//! A candidate is the lowest `ceil(log2(range))` bits of a fresh draw.
//! Candidates `>= range` are discarded and redrawn instead of being reduced
//! modulo `range`, which would favour small values whenever `range` does not
//! divide `2^bits`. With true random input each draw is accepted with
//! probability above one half, so the attempt cap only trips on a broken
//! device.

use crate::error::{Result, RngError};
use crate::extract::BitBuffer;

/// Plan for one `random_int(min, max)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntSampler {
    min: i64,
    range: u64,
    bits_needed: u32,
    max_attempts: u32,
}

/// Per-request progress. Discarded when the request completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingState {
    pub attempts: u32,
    pub consumed_bits: u64,
}

impl IntSampler {
    pub fn new(min: i64, max: i64, max_attempts: u32) -> Result<Self> {
        if max <= min {
            return Err(RngError::invalid(format!(
                "min must be less than max, got min={min}, max={max}"
            )));
        }
        // Fits: max - min <= 2^64 - 1 for any i64 pair.
        let range = (i128::from(max) - i128::from(min)) as u64;
        let bits_needed = u64::BITS - (range - 1).leading_zeros();
        Ok(Self {
            min,
            range,
            bits_needed,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn range(&self) -> u64 {
        self.range
    }

    /// `ceil(log2(range))`; zero for a single-valued range.
    pub fn bits_needed(&self) -> u32 {
        self.bits_needed
    }

    /// The answer for a single-valued range, which needs no entropy.
    pub fn trivial(&self) -> Option<i64> {
        (self.range == 1).then_some(self.min)
    }

    /// Bytes to request per draw.
    pub fn draw_len(&self) -> usize {
        (self.bits_needed as usize).div_ceil(8).max(1)
    }

    pub fn start(&self) -> SamplingState {
        SamplingState::default()
    }

    /// Offer one draw of [`draw_len`](Self::draw_len) bytes.
    ///
    /// Returns `Ok(Some(v))` on acceptance, `Ok(None)` when the caller
    /// should draw again, and `DeviceError` once the attempt cap is spent.
    pub fn offer(&self, state: &mut SamplingState, draw: Vec<u8>) -> Result<Option<i64>> {
        state.attempts += 1;
        state.consumed_bits += draw.len() as u64 * 8;
        let candidate = BitBuffer::new(draw, self.bits_needed as usize)?.low_bits_u64();
        if candidate < self.range {
            return Ok(Some((i128::from(self.min) + i128::from(candidate)) as i64));
        }
        if state.attempts >= self.max_attempts {
            log::warn!(
                "rejection sampling gave up after {} draws ({} bits) for range {}",
                state.attempts,
                state.consumed_bits,
                self.range
            );
            return Err(RngError::device(format!(
                "no acceptable sample in {} draws; source output looks broken",
                state.attempts
            )));
        }
        Ok(None)
    }
}
