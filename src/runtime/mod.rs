//! The isolated runtime environment owned by one checkout.
//!
//! [`RuntimeEnv`] is an explicit handle on a directory rather than a global,
//! so tests point it at a temp dir. Besides whatever the installer
//! materializes there, the harness keeps two things inside it:
//!
//! - a marker file, written once the environment has been created;
//! - one receipt per installed dependency, holding the installed version.
//!
//! Receipts are written as each install succeeds, so an interrupted
//! reconciliation resumes from what actually landed.

mod installer;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::models::Dependency;

pub use installer::{CommandInstaller, Installer};

const MARKER_FILE: &str = ".envh-runtime";
const RECEIPTS_DIR: &str = ".envh-receipts";

#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    root: PathBuf,
}

impl RuntimeEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// True once the environment has been created and marked.
    pub fn is_present(&self) -> bool {
        self.root.join(MARKER_FILE).is_file()
    }

    /// Create the environment with `installer` unless it is already present.
    pub fn ensure_created(&self, installer: &dyn Installer) -> Result<bool> {
        if self.is_present() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root)
            .map_err(|e| HarnessError::io(format!("create {}", self.root.display()), e))?;
        installer.create(self)?;
        fs::write(self.root.join(MARKER_FILE), env!("CARGO_PKG_VERSION"))
            .map_err(|e| HarnessError::io("write runtime marker", e))?;
        tracing::info!(path = %self.root.display(), "created runtime environment");
        Ok(true)
    }

    /// Installed dependencies according to receipts, keyed by name.
    pub fn installed(&self) -> Result<BTreeMap<String, String>> {
        let dir = self.receipts_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(HarnessError::io(format!("read {}", dir.display()), e)),
        };

        let mut installed = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| HarnessError::io("read receipt entry", e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let version = fs::read_to_string(entry.path())
                .map_err(|e| HarnessError::io(format!("read receipt {}", name), e))?;
            installed.insert(name, version.trim().to_string());
        }
        Ok(installed)
    }

    pub fn installed_dependencies(&self) -> Result<Vec<Dependency>> {
        Ok(self
            .installed()?
            .into_iter()
            .map(|(name, version)| Dependency::new(name, version))
            .collect())
    }

    pub fn record_install(&self, dep: &Dependency) -> Result<()> {
        let dir = self.receipts_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| HarnessError::io(format!("create {}", dir.display()), e))?;
        fs::write(dir.join(&dep.name), &dep.version)
            .map_err(|e| HarnessError::io(format!("write receipt {}", dep.name), e))
    }

    pub fn forget(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.receipts_dir().join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::io(format!("remove receipt {}", name), e)),
        }
    }

    /// Make receipts describe exactly `deps`.
    pub fn replace_receipts(&self, deps: &[Dependency]) -> Result<()> {
        for name in self.installed()?.keys() {
            if !deps.iter().any(|d| &d.name == name) {
                self.forget(name)?;
            }
        }
        for dep in deps {
            self.record_install(dep)?;
        }
        Ok(())
    }

    /// Variables that place the environment first on the lookup path.
    pub fn activation_vars(&self, inherited_path: Option<OsString>) -> Vec<(String, OsString)> {
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = inherited_path {
            paths.extend(std::env::split_paths(&existing));
        }
        let path = std::env::join_paths(paths)
            .unwrap_or_else(|_| self.bin_dir().into_os_string());

        vec![
            ("VIRTUAL_ENV".to_string(), self.root.clone().into_os_string()),
            ("PATH".to_string(), path),
        ]
    }

    fn receipts_dir(&self) -> PathBuf {
        self.root.join(RECEIPTS_DIR)
    }
}
