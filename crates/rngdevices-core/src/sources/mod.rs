//! The four entropy source implementations.

pub mod helpers;

pub mod bitbabbler;
pub mod rdseed;
pub mod software;
pub mod truerng;

use std::sync::Arc;

use crate::config::RngConfig;
use crate::source::{EntropySource, SourceKind};

/// Construct the source for `kind` from `config`. Never touches hardware.
pub fn open_source(kind: SourceKind, config: &RngConfig) -> Arc<dyn EntropySource> {
    match kind {
        SourceKind::Rdseed => Arc::new(rdseed::RdseedSource::new(&config.rdseed)),
        SourceKind::TrueRng => Arc::new(truerng::TrueRngSource::new(&config.truerng)),
        SourceKind::BitBabbler => Arc::new(bitbabbler::BitBabblerSource::new(&config.bitbabbler)),
        SourceKind::Software => Arc::new(software::SoftwareSource),
    }
}

/// Every source, hardware first.
pub fn all_sources(config: &RngConfig) -> Vec<Arc<dyn EntropySource>> {
    SourceKind::ALL
        .into_iter()
        .map(|kind| open_source(kind, config))
        .collect()
}

/// Sources whose probe succeeds on this machine.
pub fn detect_available_sources(config: &RngConfig) -> Vec<Arc<dyn EntropySource>> {
    all_sources(config).into_iter().filter(|s| s.probe()).collect()
}
