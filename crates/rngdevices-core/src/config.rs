//! Runtime configuration for devices and the access layer.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RngError};

/// Default cap on rejection-sampling draws for one integer request.
pub const DEFAULT_SAMPLING_ATTEMPTS: u32 = 256;

/// Default number of transparent re-opens after a failed `raw_read`.
pub const DEFAULT_IO_RETRIES: u32 = 1;

/// Default per-device queue capacity.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Top-level configuration shared by every device in a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RngConfig {
    /// Maximum rejection-sampling draws before `random_int` gives up.
    pub sampling_attempts: u32,
    /// Extra attempts the serializer makes after a failed read.
    pub io_retries: u32,
    /// Bounded capacity of each device's request queue.
    pub queue_depth: usize,
    pub rdseed: RdseedConfig,
    pub truerng: TrueRngConfig,
    pub bitbabbler: BitBabblerConfig,
}

impl Default for RngConfig {
    fn default() -> Self {
        Self {
            sampling_attempts: DEFAULT_SAMPLING_ATTEMPTS,
            io_retries: DEFAULT_IO_RETRIES,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            rdseed: RdseedConfig::default(),
            truerng: TrueRngConfig::default(),
            bitbabbler: BitBabblerConfig::default(),
        }
    }
}

impl RngConfig {
    /// Load a configuration from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RngError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| RngError::Config(format!("failed to parse config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.sampling_attempts == 0 {
            return Err(RngError::Config("sampling_attempts must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(RngError::Config("queue_depth must be at least 1".into()));
        }
        if self.bitbabbler.folds > MAX_FOLDS {
            return Err(RngError::Config(format!(
                "bitbabbler.folds must be at most {MAX_FOLDS}, got {}",
                self.bitbabbler.folds
            )));
        }
        Ok(())
    }
}

/// RDSEED instruction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdseedConfig {
    /// Attempts per 64-bit word before the instruction is considered exhausted.
    pub retries: u32,
}

impl Default for RdseedConfig {
    fn default() -> Self {
        Self { retries: 100 }
    }
}

/// TrueRNG USB-serial settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrueRngConfig {
    /// Explicit port path. Auto-discovered when unset.
    pub port: Option<PathBuf>,
    /// Inter-byte read timeout in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for TrueRngConfig {
    fn default() -> Self {
        Self {
            port: None,
            read_timeout_ms: 10_000,
        }
    }
}

/// Largest accepted fold count (each fold doubles the raw read size).
pub const MAX_FOLDS: u32 = 8;

/// BitBabbler USB-FTDI settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitBabblerConfig {
    /// Byte stream exported by the vendor daemon (FIFO or character device).
    pub stream_path: PathBuf,
    /// Number of XOR folds applied to raw output.
    pub folds: u32,
}

impl Default for BitBabblerConfig {
    fn default() -> Self {
        Self {
            stream_path: PathBuf::from("/run/bit-babbler/stream"),
            folds: 0,
        }
    }
}
