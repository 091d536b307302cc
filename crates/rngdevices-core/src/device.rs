//! Synchronous entropy API over one source.
//!
//! A [`Device`] couples an [`EntropySource`] with its access serializer.
//! Every blocking method here has an `_async` mirror in
//! [`gateway`](crate::gateway) with identical semantics.
//!
//! The blocking methods park the calling thread until the device worker
//! answers. They are safe to call from async code, but they block the
//! calling runtime thread for the duration; prefer the `_async` mirrors there.

use std::sync::Arc;

use crate::config::RngConfig;
use crate::error::Result;
use crate::extract::{self, EntropyRequest, EntropyValue};
use crate::handle::HandleState;
use crate::sampler::IntSampler;
use crate::serializer::{AccessSerializer, Op};
use crate::source::{EntropySource, SourceInfo, SourceKind};

/// One entropy source behind a single-flight request queue.
pub struct Device {
    pub(crate) source: Arc<dyn EntropySource>,
    pub(crate) serializer: AccessSerializer,
    pub(crate) sampling_attempts: u32,
}

impl Device {
    /// Wrap `source` using the access settings from `config`.
    pub fn new(source: Arc<dyn EntropySource>, config: &RngConfig) -> Self {
        let serializer = AccessSerializer::new(Arc::clone(&source), config.io_retries, config.queue_depth);
        Self {
            source,
            serializer,
            sampling_attempts: config.sampling_attempts,
        }
    }

    /// Convenience for an owned source.
    pub fn from_source<S: EntropySource + 'static>(source: S, config: &RngConfig) -> Self {
        Self::new(Arc::new(source), config)
    }

    pub fn info(&self) -> &SourceInfo {
        self.source.info()
    }

    pub fn kind(&self) -> SourceKind {
        self.source.info().kind
    }

    /// Snapshot of the cached handle state.
    pub fn state(&self) -> HandleState {
        self.serializer.state().get()
    }

    /// Side-effect-free probe. Never opens the device or consumes entropy.
    pub fn is_device_available(&self) -> bool {
        self.source.probe()
    }

    /// `n` raw bytes from one serialized read.
    pub fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        self.read(extract::byte_count(n)?)
    }

    /// `ceil(n/8)` bytes. Callers use only the first `n` bits; the rest of
    /// the final byte is unspecified.
    pub fn get_bits(&self, n: usize) -> Result<Vec<u8>> {
        self.get_bytes(extract::bit_byte_count(n)?)
    }

    /// Exactly `n/8` bytes; `n` must be a positive multiple of 8.
    pub fn get_exact_bits(&self, n: usize) -> Result<Vec<u8>> {
        self.get_bytes(extract::exact_bit_byte_count(n)?)
    }

    /// Unbiased integer in `[min, max)`.
    pub fn random_int(&self, min: i64, max: i64) -> Result<i64> {
        let sampler = IntSampler::new(min, max, self.sampling_attempts)?;
        if let Some(v) = sampler.trivial() {
            return Ok(v);
        }
        let mut state = sampler.start();
        loop {
            let draw = self.get_exact_bits(sampler.draw_len() * 8)?;
            if let Some(v) = sampler.offer(&mut state, draw)? {
                return Ok(v);
            }
        }
    }

    /// A full-width 32-bit value (big-endian over four bytes).
    pub fn random_u32(&self) -> Result<u32> {
        let bytes = self.get_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Dispatch any [`EntropyRequest`].
    pub fn fetch(&self, request: EntropyRequest) -> Result<EntropyValue> {
        match request {
            EntropyRequest::Bytes(n) => self.get_bytes(n).map(EntropyValue::Bytes),
            EntropyRequest::Bits(n) => self.get_bits(n).map(EntropyValue::Bytes),
            EntropyRequest::ExactBits(n) => self.get_exact_bits(n).map(EntropyValue::Bytes),
            EntropyRequest::Int { min, max } => self.random_int(min, max).map(EntropyValue::Int),
        }
    }

    /// Close the device. Idempotent; a later request re-opens it.
    pub fn close(&self) -> Result<()> {
        if !self.serializer.has_worker() {
            return Ok(());
        }
        self.serializer.submit_blocking(Op::Close)?.wait().map(|_| ())
    }

    fn read(&self, n: usize) -> Result<Vec<u8>> {
        self.serializer.submit_blocking(Op::Read(n))?.wait()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("source", &self.source.name())
            .field("state", &self.state())
            .finish()
    }
}
