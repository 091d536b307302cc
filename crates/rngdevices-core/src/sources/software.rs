//! SoftwareSource — the operating system CSPRNG.
//!
//! Always available. Used as the fallback when no hardware generator is
//! attached.

use crate::error::{Result, RngError};
use crate::source::{EntropySource, SourceInfo, SourceKind};

static SOFTWARE_INFO: SourceInfo = SourceInfo {
    name: "software",
    description: "Operating system CSPRNG via getrandom",
    kind: SourceKind::Software,
};

/// Entropy from the OS random number generator.
#[derive(Debug, Default)]
pub struct SoftwareSource;

impl EntropySource for SoftwareSource {
    fn info(&self) -> &SourceInfo {
        &SOFTWARE_INFO
    }

    fn probe(&self) -> bool {
        true
    }

    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n_bytes];
        getrandom::fill(&mut buf).map_err(|e| RngError::device(format!("OS CSPRNG failed: {e}")))?;
        Ok(buf)
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
