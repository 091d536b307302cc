//! Cancellable async mirrors of the [`Device`] API.
//!
//! Each request is queued on the device's worker and awaited; the calling
//! task only suspends at that boundary, never inside a hardware read.
//!
//! Cancellation via [`CancelToken`]:
//! - before the request reaches the device it is withdrawn from the queue
//!   and nothing touches the hardware;
//! - once the read has started it runs to completion, the data is
//!   discarded, the device is shut down and its cache invalidated, and
//!   only then does the call return [`RngError::Cancelled`].
//!
//! Dropping a pending future behaves like cancelling it.

use crate::cancel::CancelToken;
use crate::device::Device;
use crate::error::{Result, RngError};
use crate::extract::{self, EntropyRequest, EntropyValue};
use crate::sampler::IntSampler;
use crate::serializer::Op;

impl Device {
    /// Async [`get_bytes`](Device::get_bytes).
    pub async fn get_bytes_async(&self, n: usize, cancel: &CancelToken) -> Result<Vec<u8>> {
        let n = extract::byte_count(n)?;
        self.read_async(n, cancel).await
    }

    /// Async [`get_bits`](Device::get_bits).
    pub async fn get_bits_async(&self, n: usize, cancel: &CancelToken) -> Result<Vec<u8>> {
        let n = extract::bit_byte_count(n)?;
        self.read_async(n, cancel).await
    }

    /// Async [`get_exact_bits`](Device::get_exact_bits).
    pub async fn get_exact_bits_async(&self, n: usize, cancel: &CancelToken) -> Result<Vec<u8>> {
        let n = extract::exact_bit_byte_count(n)?;
        self.read_async(n, cancel).await
    }

    /// Async [`random_int`](Device::random_int). Each rejection redraw is a
    /// separate queued read, so cancellation is checked between draws.
    pub async fn random_int_async(&self, min: i64, max: i64, cancel: &CancelToken) -> Result<i64> {
        let sampler = IntSampler::new(min, max, self.sampling_attempts)?;
        if let Some(v) = sampler.trivial() {
            return Ok(v);
        }
        let mut state = sampler.start();
        loop {
            let draw = match self.read_async(sampler.draw_len(), cancel).await {
                Err(e) if e.is_cancelled() && state.attempts > 0 => {
                    // Earlier draws already used the device; the request
                    // counts as started, so close before reporting.
                    self.close_after_cancel().await;
                    return Err(e);
                }
                other => other?,
            };
            if let Some(v) = sampler.offer(&mut state, draw)? {
                return Ok(v);
            }
        }
    }

    /// Async [`random_u32`](Device::random_u32).
    pub async fn random_u32_async(&self, cancel: &CancelToken) -> Result<u32> {
        let bytes = self.read_async(4, cancel).await?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Async [`fetch`](Device::fetch).
    pub async fn fetch_async(&self, request: EntropyRequest, cancel: &CancelToken) -> Result<EntropyValue> {
        match request {
            EntropyRequest::Bytes(n) => self.get_bytes_async(n, cancel).await.map(EntropyValue::Bytes),
            EntropyRequest::Bits(n) => self.get_bits_async(n, cancel).await.map(EntropyValue::Bytes),
            EntropyRequest::ExactBits(n) => {
                self.get_exact_bits_async(n, cancel).await.map(EntropyValue::Bytes)
            }
            EntropyRequest::Int { min, max } => {
                self.random_int_async(min, max, cancel).await.map(EntropyValue::Int)
            }
        }
    }

    /// Close the device, then release its worker thread.
    ///
    /// Idempotent. A later request starts a fresh worker and re-opens the
    /// device.
    pub async fn close_async(&self) -> Result<()> {
        let closed = if self.serializer.has_worker() {
            match self.serializer.submit(Op::Close).await {
                Ok(ticket) => ticket.finish(&CancelToken::new()).await.map(|_| ()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        if let Some(exited) = self.serializer.release() {
            // Resolves (as a closed channel) once the thread has exited.
            let _ = exited.await;
            log::debug!("{}: worker released", self.source.name());
        }
        closed
    }

    /// Close that cannot itself be cancelled. A no-op when the worker's
    /// deferred cleanup already closed the device.
    async fn close_after_cancel(&self) {
        let closed = match self.serializer.submit(Op::Close).await {
            Ok(ticket) => ticket.finish(&CancelToken::new()).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = closed {
            log::warn!("{}: close after cancellation failed: {e}", self.source.name());
        }
    }

    async fn read_async(&self, n: usize, cancel: &CancelToken) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(RngError::Cancelled);
        }
        let ticket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RngError::Cancelled),
            ticket = self.serializer.submit(Op::Read(n)) => ticket?,
        };
        ticket.finish(cancel).await
    }
}
