//! Shared helpers for the hardware sources.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::error::{Result, RngError};

/// Read exactly `n` bytes, reporting how far a short read got.
///
/// A zero-length read (EOF or an expired serial timeout) ends the loop.
pub fn read_full(file: &mut File, n: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(k) => filled += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled < n {
        return Err(RngError::device(format!(
            "{what}: read timeout, expected {n} bytes, got {filled}"
        )));
    }
    Ok(buf)
}

/// Read a small sysfs attribute, trimmed.
pub fn read_attr(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Whether any USB device with the given vendor/product ids is attached.
///
/// Linux only (sysfs); always false elsewhere.
pub fn usb_device_present(vendor: &str, product: &str) -> bool {
    let Ok(entries) = std::fs::read_dir("/sys/bus/usb/devices") else {
        return false;
    };
    entries.flatten().any(|entry| {
        let dir = entry.path();
        let vid = read_attr(&dir.join("idVendor"));
        let pid = read_attr(&dir.join("idProduct"));
        vid.is_some_and(|v| v.eq_ignore_ascii_case(vendor))
            && pid.is_some_and(|p| p.eq_ignore_ascii_case(product))
    })
}

/// Entries of `dir` whose file name contains `needle` (case-insensitive).
pub fn find_named_entry(dir: &Path, needle: &str) -> Option<PathBuf> {
    let needle = needle.to_ascii_lowercase();
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}
