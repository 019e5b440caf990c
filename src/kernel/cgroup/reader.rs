//! Repeated positional reads of a single counter file.

use crate::config::types::{MemuseError, Result};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Counter values are at most 20 digits plus a newline
const READ_BUF_LEN: usize = 32;

/// An open accounting counter, re-read from offset 0 on every sample.
///
/// Unlike the soft reads on [`AccountingScope`](super::AccountingScope), every
/// failure here is fatal: a counter that stops yielding bytes means the scope
/// itself is gone.
pub struct CounterReader {
    file: File,
    path: PathBuf,
}

impl CounterReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            MemuseError::Sampling(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn read(&mut self) -> Result<u64> {
        let mut buf = [0u8; READ_BUF_LEN];
        let n = self.file.read_at(&mut buf, 0).map_err(|e| {
            MemuseError::Sampling(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if n == 0 {
            return Err(MemuseError::Sampling(format!(
                "{} returned no data, accounting scope disappeared",
                self.path.display()
            )));
        }
        parse_counter(&buf[..n]).ok_or_else(|| {
            MemuseError::Sampling(format!(
                "Unparsable value in {}: {:?}",
                self.path.display(),
                String::from_utf8_lossy(&buf[..n])
            ))
        })
    }
}

/// Parse the leading decimal line of a counter file
pub fn parse_counter(raw: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(raw).ok()?;
    text.lines().next()?.trim().parse::<u64>().ok()
}
