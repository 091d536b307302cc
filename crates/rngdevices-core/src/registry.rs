//! Caller-owned composition root.
//!
//! A [`Registry`] maps each [`SourceKind`] to at most one [`Device`],
//! created on first use. There is no global instance; build one per
//! application (or per test) and share it by reference or `Arc`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::RngConfig;
use crate::device::Device;
use crate::error::Result;
use crate::source::{EntropySource, SourceKind};
use crate::sources;

/// Owns one lazily created [`Device`] per source kind.
pub struct Registry {
    config: RngConfig,
    devices: Mutex<BTreeMap<SourceKind, Arc<Device>>>,
}

impl Registry {
    pub fn new(config: RngConfig) -> Self {
        Self {
            config,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &RngConfig {
        &self.config
    }

    /// The device for `kind`, constructing it on first request.
    ///
    /// Construction never touches hardware; the device opens on its first
    /// read.
    pub fn device(&self, kind: SourceKind) -> Arc<Device> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let device = devices.entry(kind).or_insert_with(|| {
            log::debug!("registry: creating {kind} device");
            Arc::new(Device::new(sources::open_source(kind, &self.config), &self.config))
        });
        Arc::clone(device)
    }

    /// Install a caller-supplied source for its kind, replacing any existing
    /// device. Never blocks: the replaced device's worker finishes its queue
    /// and closes the device once the last outside handle to it is dropped.
    pub fn with_source(&self, source: Arc<dyn EntropySource>) -> Arc<Device> {
        let kind = source.info().kind;
        let device = Arc::new(Device::new(source, &self.config));
        let previous = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::clone(&device));
        if previous.is_some() {
            log::debug!("registry: replaced {kind} device");
        }
        device
    }

    /// Kinds whose probe currently succeeds. Never opens a device.
    pub fn available(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|&kind| self.device(kind).is_device_available())
            .collect()
    }

    /// First available kind in fallback order (hardware before software).
    pub fn preferred(&self) -> Arc<Device> {
        let kind = self.available().into_iter().next().unwrap_or(SourceKind::Software);
        self.device(kind)
    }

    fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Close every device created so far. Returns the first error after
    /// attempting all of them.
    pub fn close_all(&self) -> Result<()> {
        let mut first_err = None;
        for device in self.snapshot() {
            if let Err(e) = device.close() {
                log::warn!("registry: closing {} failed: {e}", device.info().name);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Async [`close_all`](Self::close_all); also releases every worker thread.
    pub async fn close_all_async(&self) -> Result<()> {
        let mut first_err = None;
        for device in self.snapshot() {
            if let Err(e) = device.close_async().await {
                log::warn!("registry: closing {} failed: {e}", device.info().name);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RngConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let devices = self.snapshot();
        f.debug_struct("Registry")
            .field("devices", &devices.iter().map(|d| d.info().name).collect::<Vec<_>>())
            .finish()
    }
}
