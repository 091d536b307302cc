//! # rngdevices-core
//!
//! **One API over every random number generator on the machine.**
//!
//! `rngdevices-core` exposes hardware and software entropy sources (the x86
//! `RDSEED` instruction, TrueRNG USB-serial devices, BitBabbler USB-FTDI
//! devices, and the OS CSPRNG) behind one synchronous API with cancellable
//! async mirrors.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rngdevices_core::{Registry, SourceKind};
//!
//! let registry = Registry::default();
//! let device = registry.device(SourceKind::Software);
//!
//! let bytes = device.get_bytes(32)?;
//! assert_eq!(bytes.len(), 32);
//!
//! let roll = device.random_int(1, 7)?;
//! assert!((1..7).contains(&roll));
//!
//! registry.close_all()?;
//! # Ok::<(), rngdevices_core::RngError>(())
//! ```
//!
//! ## Architecture
//!
//! Source → DeviceHandle → AccessSerializer → Device / async gateway
//!
//! - Every source implements [`EntropySource`]: `probe`, `raw_read`,
//!   `shutdown`.
//! - Each [`Device`] owns one worker thread and a bounded FIFO queue, so a
//!   source never sees two reads at once while distinct devices run in
//!   parallel.
//! - The worker's handle caches open/closed state and re-opens after I/O
//!   errors.
//! - Async calls take a [`CancelToken`]. A request that has not started is
//!   withdrawn for free; one already running is finished, discarded, and
//!   followed by a forced close before [`RngError::Cancelled`] is returned.
//!
//! Integers come from rejection sampling, so `random_int(min, max)` is
//! exactly uniform over `[min, max)`.

pub mod cancel;
pub mod conditioning;
pub mod config;
pub mod device;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod handle;
pub mod registry;
pub mod sampler;
pub mod source;
pub mod sources;

mod serializer;

pub use cancel::CancelToken;
pub use config::{BitBabblerConfig, RdseedConfig, RngConfig, TrueRngConfig};
pub use device::Device;
pub use error::{ErrorKind, Result, RngError};
pub use extract::{BitBuffer, EntropyRequest, EntropyValue};
pub use handle::HandleState;
pub use registry::Registry;
pub use sampler::IntSampler;
pub use source::{EntropySource, SourceInfo, SourceKind};
pub use sources::{all_sources, detect_available_sources, open_source};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
