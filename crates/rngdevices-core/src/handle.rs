//! Cached open/closed state for one source instance.
//!
//! A [`DeviceHandle`] lives on its device's worker thread and is the only
//! thing that calls `raw_read`/`shutdown` on the source. Everyone else sees
//! the state through a [`StateCell`] snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Result, RngError};
use crate::source::EntropySource;

/// Lifecycle state of a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl HandleState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Opening => 1,
            Self::Open => 2,
            Self::Closing => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Opening => write!(f, "opening"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Atomic, read-only-to-outsiders view of a handle's state.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn get(&self) -> HandleState {
        HandleState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: HandleState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Per-source handle owned by the serializer worker.
pub(crate) struct DeviceHandle {
    source: Arc<dyn EntropySource>,
    state: StateCell,
    io_retries: u32,
}

impl DeviceHandle {
    pub(crate) fn new(source: Arc<dyn EntropySource>, state: StateCell, io_retries: u32) -> Self {
        Self {
            source,
            state,
            io_retries,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.source.name()
    }

    /// Read exactly `n` bytes, opening the device if needed.
    ///
    /// A failure invalidates the cache (`Closed`) and is retried at most
    /// `io_retries` more times, each retry re-opening the device.
    pub(crate) fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.read_once(n) {
                Ok(data) => return Ok(data),
                Err(e) if attempt < self.io_retries && e.invalidates_handle() => {
                    attempt += 1;
                    log::debug!(
                        "{}: read failed ({e}), re-opening (retry {attempt}/{})",
                        self.name(),
                        self.io_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_once(&mut self, n: usize) -> Result<Vec<u8>> {
        let opening = self.state.get() == HandleState::Closed;
        if opening {
            self.state.set(HandleState::Opening);
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.source.raw_read(n)
        }))
        .unwrap_or_else(|_| Err(RngError::device(format!("{} panicked during read", self.name()))));

        match result {
            Ok(data) if data.len() == n => {
                if opening {
                    log::debug!("{}: opened", self.name());
                }
                self.state.set(HandleState::Open);
                Ok(data)
            }
            Ok(data) => {
                self.invalidate();
                Err(RngError::device(format!(
                    "{}: short read, expected {n} bytes, got {}",
                    self.name(),
                    data.len()
                )))
            }
            Err(e) => {
                log::warn!("{}: read failed, invalidating handle: {e}", self.name());
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Drop cached state without calling into the source.
    fn invalidate(&mut self) {
        self.state.set(HandleState::Closed);
    }

    /// Explicit close. A no-op when already closed.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state.get() == HandleState::Closed {
            return Ok(());
        }
        self.shutdown()
    }

    /// Unconditional shutdown, used by the cancellation path.
    pub(crate) fn force_close(&mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.state.set(HandleState::Closing);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.source.shutdown()
        }))
        .unwrap_or_else(|_| {
            Err(RngError::device(format!("{} panicked during shutdown", self.name())))
        });
        self.state.set(HandleState::Closed);
        if let Err(ref e) = result {
            log::warn!("{}: shutdown failed: {e}", self.name());
        }
        result
    }
}
