//! Persistence for the manifest and the lock snapshot.

mod atomic;
mod lock;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::models::{LockSnapshot, Manifest};

pub use atomic::atomic_write;
pub use lock::EnvironmentLock;

const MANIFEST_HEADER: &str = "# Managed by envh. `envh save_env` rewrites the dependency list.\n\n";

/// Reads and writes the developer-edited manifest file.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Manifest> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HarnessError::ManifestMissing {
                    path: self.path.clone(),
                })
            }
            Err(e) => {
                return Err(HarnessError::io(
                    format!("read {}", self.path.display()),
                    e,
                ))
            }
        };

        let manifest: Manifest = toml::from_str(&text).map_err(|e| self.corrupt(e.to_string()))?;
        manifest.validate().map_err(|reason| self.corrupt(reason))?;
        Ok(manifest)
    }

    /// Persist atomically; a crash never leaves a half-written manifest.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate().map_err(|reason| self.corrupt(reason))?;
        let body = toml::to_string_pretty(manifest).map_err(|e| self.corrupt(e.to_string()))?;
        let text = format!("{}{}", MANIFEST_HEADER, body);
        atomic_write(&self.path, text.as_bytes())?;
        tracing::info!(path = %self.path.display(), "saved manifest");
        Ok(())
    }

    fn corrupt(&self, reason: String) -> HarnessError {
        HarnessError::ManifestCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Reads and writes the derived lock snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no reconciliation has completed yet.
    pub fn read(&self) -> Result<Option<LockSnapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarnessError::io(
                    format!("read {}", self.path.display()),
                    e,
                ))
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HarnessError::SnapshotCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    pub fn write(&self, snapshot: &LockSnapshot) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            HarnessError::SnapshotCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;
        json.push(b'\n');
        atomic_write(&self.path, &json)
    }
}
