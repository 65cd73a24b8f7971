//! Atomic replacement of state files.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{HarnessError, Result};

/// Write `data` to `path` so a reader only ever sees the old or the new
/// complete file.
///
/// A temp file is created in the same directory (same filesystem, so the
/// rename is atomic), written, fsynced, renamed over `path`, and the parent
/// directory is fsynced to make the rename durable.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|e| HarnessError::io(format!("create {}", parent.display()), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| HarnessError::io("create temp file", e))?;
    tmp.write_all(data)
        .map_err(|e| HarnessError::io("write temp file", e))?;
    tmp.flush()
        .map_err(|e| HarnessError::io("flush temp file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| HarnessError::io("fsync temp file", e))?;
    tmp.persist(path).map_err(|e| {
        HarnessError::io(format!("rename into {}", path.display()), e.error)
    })?;

    fsync_directory(parent)
}

#[cfg(unix)]
fn fsync_directory(dir: &Path) -> Result<()> {
    let handle = File::open(dir)
        .map_err(|e| HarnessError::io(format!("open {}", dir.display()), e))?;
    handle
        .sync_all()
        .map_err(|e| HarnessError::io(format!("fsync {}", dir.display()), e))
}

#[cfg(not(unix))]
fn fsync_directory(_: &Path) -> Result<()> {
    Ok(())
}
