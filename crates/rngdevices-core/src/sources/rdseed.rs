//! RdseedSource — the x86 `RDSEED` instruction.
//!
//! `RDSEED` returns conditioned output straight from the on-die entropy
//! source. It may transiently fail when the source is drained, so each
//! 64-bit word is retried a bounded number of times before the read is
//! reported as a device error.

use crate::config::RdseedConfig;
use crate::error::{Result, RngError};
use crate::source::{EntropySource, SourceInfo, SourceKind};

static RDSEED_INFO: SourceInfo = SourceInfo {
    name: "rdseed",
    description: "Intel/AMD RDSEED hardware instruction",
    kind: SourceKind::Rdseed,
};

/// Entropy from the CPU's `RDSEED` instruction.
#[derive(Debug, Clone, Default)]
pub struct RdseedSource {
    retries: u32,
}

impl RdseedSource {
    pub fn new(config: &RdseedConfig) -> Self {
        Self {
            retries: config.retries.max(1),
        }
    }
}

impl EntropySource for RdseedSource {
    fn info(&self) -> &SourceInfo {
        &RDSEED_INFO
    }

    fn probe(&self) -> bool {
        supported()
    }

    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
        if !supported() {
            return Err(RngError::DeviceUnavailable(
                "RDSEED instruction not available on this CPU".into(),
            ));
        }
        let mut out = Vec::with_capacity(n_bytes + 8);
        while out.len() < n_bytes {
            let word = next_word(self.retries).ok_or_else(|| {
                RngError::device(format!(
                    "RDSEED failed: wrote {}/{n_bytes} bytes",
                    out.len()
                ))
            })?;
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.truncate(n_bytes);
        Ok(out)
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn supported() -> bool {
    std::arch::is_x86_feature_detected!("rdseed")
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn supported() -> bool {
    false
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn next_word(retries: u32) -> Option<u64> {
    for _ in 0..retries {
        // SAFETY: only reached after `supported()` confirmed the CPU
        // implements RDSEED.
        if let Some(v) = unsafe { rdseed_step() } {
            return Some(v);
        }
        std::hint::spin_loop();
    }
    None
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn next_word(_retries: u32) -> Option<u64> {
    None
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "rdseed")]
// Newer toolchains treat the intrinsic as safe inside this fn.
#[allow(unused_unsafe)]
unsafe fn rdseed_step() -> Option<u64> {
    let mut v = 0u64;
    // SAFETY: caller guarantees RDSEED support.
    let ok = unsafe { std::arch::x86_64::_rdseed64_step(&mut v) };
    (ok == 1).then_some(v)
}

#[cfg(target_arch = "x86")]
#[target_feature(enable = "rdseed")]
// Newer toolchains treat the intrinsic as safe inside this fn.
#[allow(unused_unsafe)]
unsafe fn rdseed_step() -> Option<u64> {
    let (mut lo, mut hi) = (0u32, 0u32);
    // SAFETY: caller guarantees RDSEED support.
    let ok = unsafe {
        std::arch::x86::_rdseed32_step(&mut lo) == 1 && std::arch::x86::_rdseed32_step(&mut hi) == 1
    };
    ok.then_some((u64::from(hi) << 32) | u64::from(lo))
}
