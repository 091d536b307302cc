//! The entropy source capability and its metadata.
//!
//! Every producer (CPU instruction, USB-serial device, USB-FTDI device,
//! software generator) implements [`EntropySource`]. Nothing above this
//! trait knows which variant it is talking to.

use crate::error::Result;

/// Which physical mechanism backs a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Intel/AMD `RDSEED` instruction.
    Rdseed,
    /// TrueRNG USB-serial device.
    TrueRng,
    /// BitBabbler USB-FTDI device.
    BitBabbler,
    /// Operating system CSPRNG.
    Software,
}

impl SourceKind {
    /// Every kind, in fallback order (hardware first).
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Rdseed,
        SourceKind::TrueRng,
        SourceKind::BitBabbler,
        SourceKind::Software,
    ];

    /// Whether requests may block on external hardware for a noticeable time.
    pub fn is_hardware(self) -> bool {
        !matches!(self, Self::Software)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rdseed => write!(f, "rdseed"),
            Self::TrueRng => write!(f, "truerng"),
            Self::BitBabbler => write!(f, "bitbabbler"),
            Self::Software => write!(f, "software"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = crate::error::RngError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rdseed" | "intel_seed" => Ok(Self::Rdseed),
            "truerng" => Ok(Self::TrueRng),
            "bitbabbler" | "bitbabbler_rng" => Ok(Self::BitBabbler),
            "software" | "pseudo_rng" => Ok(Self::Software),
            other => Err(crate::error::RngError::invalid(format!(
                "unknown source kind: {other}"
            ))),
        }
    }
}

/// Metadata about an entropy source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"truerng"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Physical mechanism.
    pub kind: SourceKind,
}

/// Minimal capability every entropy producer provides.
///
/// Implementations may assume that `raw_read` and `shutdown` are never
/// called concurrently on the same instance; the access serializer
/// guarantees it. `probe` may run at any time, including while a read is
/// in flight, and must not disturb device state.
pub trait EntropySource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Side-effect-free liveness check. Never consumes entropy.
    fn probe(&self) -> bool;

    /// Blocking read of exactly `n_bytes` bytes. Short reads are errors.
    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>>;

    /// Release any open resources. Idempotent.
    fn shutdown(&self) -> Result<()>;

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}
