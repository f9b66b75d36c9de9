//! File utilities for readers and summary persistence.

use std::fs;
use std::path::Path;

use crate::error::ReaderError;

/// Read raw file bytes, refusing files above `max_size`.
pub fn read_file_bytes(path: &Path, max_size: u64) -> Result<Vec<u8>, ReaderError> {
    let size = fs::metadata(path)?.len();
    if size > max_size {
        return Err(ReaderError::TooLarge {
            size,
            max: max_size,
        });
    }
    Ok(fs::read(path)?)
}

/// Write a file atomically: write a sibling temp file, then rename over the target.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
