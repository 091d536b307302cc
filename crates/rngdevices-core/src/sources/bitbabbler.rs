//! BitBabblerSource — BitBabbler Black/White USB-FTDI generators.
//!
//! The FTDI MPSSE protocol is driven by the vendor daemon, which exports
//! the raw bit stream through a FIFO or character device. This source
//! reads that stream and applies optional XOR folding.
//!
//! Folding reads `n << folds` raw bytes and XOR-folds them `folds` times,
//! trading throughput for reduced bias.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::helpers::{read_full, usb_device_present};
use crate::conditioning::{fold, folded_input_len};
use crate::config::BitBabblerConfig;
use crate::error::{Result, RngError};
use crate::source::{EntropySource, SourceInfo, SourceKind};

/// FTDI vendor id.
const USB_VENDOR: &str = "0403";
/// BitBabbler product id.
const USB_PRODUCT: &str = "7840";

static BITBABBLER_INFO: SourceInfo = SourceInfo {
    name: "bitbabbler",
    description: "BitBabbler USB-FTDI hardware generator with XOR folding",
    kind: SourceKind::BitBabbler,
};

/// Entropy from a BitBabbler device stream.
pub struct BitBabblerSource {
    stream_path: PathBuf,
    folds: u32,
    open: Mutex<Option<File>>,
}

impl BitBabblerSource {
    pub fn new(config: &BitBabblerConfig) -> Self {
        Self {
            stream_path: config.stream_path.clone(),
            folds: config.folds,
            open: Mutex::new(None),
        }
    }

    pub fn folds(&self) -> u32 {
        self.folds
    }

    fn open_stream(&self) -> Result<File> {
        File::open(&self.stream_path).map_err(|e| {
            RngError::DeviceUnavailable(format!(
                "BitBabbler stream {} not available: {e}",
                self.stream_path.display()
            ))
        })
    }
}

impl EntropySource for BitBabblerSource {
    fn info(&self) -> &SourceInfo {
        &BITBABBLER_INFO
    }

    fn probe(&self) -> bool {
        usb_device_present(USB_VENDOR, USB_PRODUCT) || self.stream_path.exists()
    }

    fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let raw_len = folded_input_len(n_bytes, self.folds)
            .ok_or_else(|| RngError::invalid(format!("{n_bytes} bytes with {} folds overflows", self.folds)))?;
        let mut slot = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(self.open_stream()?);
        }
        let result = match slot.as_mut() {
            Some(file) => read_full(file, raw_len, "bitbabbler"),
            None => Err(RngError::device("bitbabbler: stream not open")),
        };
        match result {
            Ok(raw) => Ok(fold(&raw, self.folds)),
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    fn shutdown(&self) -> Result<()> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn stream_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn unfolded_read_passes_through() {
        let tmp = stream_with(&[1, 2, 3, 4]);
        let src = BitBabblerSource::new(&BitBabblerConfig {
            stream_path: tmp.path().to_path_buf(),
            folds: 0,
        });
        assert!(src.probe());
        assert_eq!(src.raw_read(4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn folded_read_consumes_more_and_returns_n() {
        let tmp = stream_with(&[0x0F, 0xF0, 0xFF, 0x00, 0x01, 0x02, 0x03, 0x04]);
        let src = BitBabblerSource::new(&BitBabblerConfig {
            stream_path: tmp.path().to_path_buf(),
            folds: 1,
        });
        // 4 bytes * 2 raw; halves XORed.
        assert_eq!(src.raw_read(4).unwrap(), vec![0x0E, 0xF2, 0xFC, 0x04]);
    }

    #[test]
    fn exhausted_stream_is_short_read_and_reopens() {
        let tmp = stream_with(&[9; 3]);
        let src = BitBabblerSource::new(&BitBabblerConfig {
            stream_path: tmp.path().to_path_buf(),
            folds: 0,
        });
        let err = src.raw_read(8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceError);
        // Stream dropped; a fresh open starts from the beginning again.
        assert_eq!(src.raw_read(3).unwrap(), vec![9; 3]);
    }

    #[test]
    fn missing_stream_is_unavailable() {
        let src = BitBabblerSource::new(&BitBabblerConfig {
            stream_path: PathBuf::from("/nonexistent/bitbabbler"),
            folds: 0,
        });
        assert_eq!(src.raw_read(1).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
    }
}
