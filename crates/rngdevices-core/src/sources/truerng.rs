//! TrueRngSource — ubld.it TrueRNG USB-serial generators.
//!
//! The device enumerates as a CDC-ACM serial port and streams random bytes
//! once DTR is asserted. The port is opened on the first read and kept open
//! until shutdown; any I/O failure drops it so the next read re-opens.
//!
//! **Raw output characteristics:** already whitened by the device firmware.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::helpers::{find_named_entry, read_attr, read_full};
use crate::config::TrueRngConfig;
use crate::error::{Result, RngError};
use crate::source::{EntropySource, SourceInfo, SourceKind};

static TRUERNG_INFO: SourceInfo = SourceInfo {
    name: "truerng",
    description: "TrueRNG USB-serial hardware generator (TrueRNG3, TrueRNGpro)",
    kind: SourceKind::TrueRng,
};

const SERIAL_BY_ID: &str = "/dev/serial/by-id";
const SYS_TTY: &str = "/sys/class/tty";

/// Entropy from a TrueRNG serial device.
pub struct TrueRngSource {
    port: Option<PathBuf>,
    read_timeout_ms: u64,
    open: Mutex<Option<File>>,
}

impl TrueRngSource {
    pub fn new(config: &TrueRngConfig) -> Self {
        Self {
            port: config.port.clone(),
            read_timeout_ms: config.read_timeout_ms,
            open: Mutex::new(None),
        }
    }

    /// The configured port, or the first auto-discovered one.
    pub fn find_port(&self) -> Option<PathBuf> {
        match &self.port {
            Some(p) => p.exists().then(|| p.clone()),
            None => discover_port(),
        }
    }

    fn open_port(&self) -> Result<File> {
        let path = self
            .find_port()
            .ok_or_else(|| RngError::DeviceUnavailable("TrueRNG device not found".into()))?;
        let file = serial::open_raw(&path, self.read_timeout_ms)?;
        log::debug!("truerng: opened {}", path.display());
        Ok(file)
    }
}

impl EntropySource for TrueRngSource {
    fn info(&self) -> &SourceInfo {
        &TRUERNG_INFO
    }

    fn probe(&self) -> bool {
        self.find_port().is_some()
    }

    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let mut slot = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(self.open_port()?);
        }
        let result = match slot.as_mut() {
            Some(file) => read_full(file, n_bytes, "truerng"),
            None => Err(RngError::device("truerng: port not open")),
        };
        if result.is_err() {
            *slot = None;
        }
        result
    }

    fn shutdown(&self) -> Result<()> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// Find a TrueRNG port via udev's by-id links, falling back to sysfs.
fn discover_port() -> Option<PathBuf> {
    if let Some(link) = find_named_entry(Path::new(SERIAL_BY_ID), "truerng") {
        return Some(link);
    }
    let entries = std::fs::read_dir(SYS_TTY).ok()?;
    let mut ports: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            // ttyACMn/device -> interface dir; product lives on the parent.
            let product = e.path().join("device/../product");
            read_attr(&product).is_some_and(|p| p.to_ascii_lowercase().contains("truerng"))
        })
        .map(|e| Path::new("/dev").join(e.file_name()))
        .collect();
    ports.sort();
    ports.into_iter().next()
}

#[cfg(unix)]
mod serial {
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use crate::error::Result;

    /// Open `path` in raw mode with DTR asserted and pending input dropped.
    pub(super) fn open_raw(path: &Path, timeout_ms: u64) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;
        let fd = file.as_raw_fd();

        // SAFETY: fd is a valid open descriptor owned by `file`; termios is
        // fully initialised by tcgetattr before use.
        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            libc::cfmakeraw(&mut tio);
            // Return whatever arrived once VTIME deciseconds pass in silence.
            tio.c_cc[libc::VMIN] = 0;
            tio.c_cc[libc::VTIME] = timeout_ms.div_ceil(100).clamp(1, 255) as libc::cc_t;
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            let dtr: libc::c_int = libc::TIOCM_DTR;
            if libc::ioctl(fd, libc::TIOCMBIS, &dtr) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if libc::tcflush(fd, libc::TCIFLUSH) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(file)
    }
}

#[cfg(not(unix))]
mod serial {
    use std::fs::File;
    use std::path::Path;

    use crate::error::{Result, RngError};

    pub(super) fn open_raw(path: &Path, _timeout_ms: u64) -> Result<File> {
        Err(RngError::DeviceUnavailable(format!(
            "serial access to {} is not supported on this platform",
            path.display()
        )))
    }
}
