//! Filesystem utilities.
//!
//! Helper functions for file operations.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Read a file to string, returning None if it doesn't exist.
pub fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>> {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Replace `path` with `contents` atomically.
///
/// The bytes go to a temporary file in the same directory, are synced, then
/// renamed over the target, so readers see either the old or the new file.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".vinestore-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
