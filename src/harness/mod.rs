//! The environment harness: reconcile the runtime environment against the
//! manifest, then run commands or servers inside it.
//!
//! # Reconciliation
//!
//! 1. Resolve declared variables (secrets first, so a missing secret fails
//!    before any install work).
//! 2. Fast path: if the lock snapshot's hash equals the manifest hash and
//!    the runtime is present, nothing is installed.
//! 3. Otherwise take the environment lock, re-check, create the runtime if
//!    needed, install what receipts say is missing or stale, remove what is
//!    no longer declared.
//! 4. Write the new snapshot. Any earlier failure leaves the previous
//!    snapshot untouched.

mod env;
mod exec;
mod launch;

use std::sync::Arc;

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::models::{diff_dependencies, Dependency, LockSnapshot, Manifest, ManifestDiff};
use crate::runtime::{CommandInstaller, Installer, RuntimeEnv};
use crate::secrets::Secrets;
use crate::store::{EnvironmentLock, ManifestStore, SnapshotStore};

pub use env::ProcessEnv;
pub use exec::exit_code;
pub use launch::{LaunchMode, LaunchOutcome, LaunchState, Launcher};

/// Work done by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// True when no install work was needed.
    pub fast_path: bool,
    pub created_runtime: bool,
    pub installed: Vec<Dependency>,
    pub removed: Vec<String>,
}

/// A reconciled environment, ready to run commands in.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub manifest: Manifest,
    pub env: ProcessEnv,
    pub report: ReconcileReport,
}

/// Whether the checkout is in sync, without changing anything.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub manifest_hash: String,
    pub snapshot_hash: Option<String>,
    pub runtime_present: bool,
    /// Installed (per receipts) versus declared.
    pub pending: ManifestDiff,
}

impl Status {
    pub fn in_sync(&self) -> bool {
        self.runtime_present
            && self.snapshot_hash.as_deref() == Some(self.manifest_hash.as_str())
    }
}

/// Result of capturing the runtime's installed set into the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    /// Manifest dependency changes made by the capture.
    pub changes: ManifestDiff,
    pub dependencies: usize,
}

#[derive(Clone)]
pub struct Harness {
    config: HarnessConfig,
    manifests: ManifestStore,
    snapshots: SnapshotStore,
    runtime: RuntimeEnv,
    installer: Option<Arc<dyn Installer + Send + Sync>>,
    inherit_env: bool,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            manifests: ManifestStore::new(&config.manifest_path),
            snapshots: SnapshotStore::new(&config.snapshot_path),
            runtime: RuntimeEnv::new(&config.runtime_dir),
            installer: None,
            inherit_env: true,
            config,
        }
    }

    /// Use `installer` instead of the manifest's `[installer]` commands.
    pub fn with_installer(mut self, installer: Arc<dyn Installer + Send + Sync>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Start children from an empty environment instead of inheriting ours.
    pub fn without_inherited_env(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeEnv {
        &self.runtime
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Bring the runtime environment into agreement with the manifest.
    pub fn reconcile(&self) -> Result<Reconciled> {
        let manifest = self.manifests.load()?;
        let env = self.resolve_env(&manifest)?;

        let report = if self.in_sync(&manifest) {
            tracing::debug!("environment in sync, skipping installs");
            ReconcileReport {
                fast_path: true,
                ..Default::default()
            }
        } else {
            self.apply(&manifest)?
        };

        Ok(Reconciled {
            manifest,
            env,
            report,
        })
    }

    /// Resolve the variables a command would see, without reconciling.
    pub fn environment(&self) -> Result<ProcessEnv> {
        let manifest = self.manifests.load()?;
        self.resolve_env(&manifest)
    }

    /// Reconcile, then run `program` with `args` and return its exit code.
    pub async fn execute(&self, program: &str, args: &[String]) -> Result<i32> {
        let reconciled = self.reconcile_blocking().await?;
        tracing::debug!(program, ?args, "executing");
        let mut child = exec::spawn(&reconciled.env, program, args)?;
        exec::wait(&mut child).await
    }

    pub fn status(&self) -> Result<Status> {
        let manifest = self.manifests.load()?;
        let snapshot = self.read_snapshot()?;
        let installed = self.runtime.installed_dependencies()?;
        Ok(Status {
            manifest_hash: manifest.content_hash(),
            snapshot_hash: snapshot.map(|s| s.manifest_hash),
            runtime_present: self.runtime.is_present(),
            pending: diff_dependencies(&installed, &manifest.dependencies),
        })
    }

    /// Regenerate the manifest's dependency list from what is actually
    /// installed, and record the result as reconciled.
    ///
    /// Variables and other manifest sections are kept. Dependencies that
    /// were already declared keep their position; new ones are appended in
    /// the installer's order.
    pub fn save_env(&self) -> Result<SaveReport> {
        let _lock = EnvironmentLock::acquire(&self.config.guard_path, self.config.lock_timeout)?;

        let mut manifest = if self.manifests.exists() {
            self.manifests.load()?
        } else {
            Manifest::default()
        };

        if !self.runtime.is_present() {
            return Err(HarnessError::RuntimeMissing {
                path: self.runtime.root().to_path_buf(),
            });
        }

        let installer = self.installer_for(&manifest);
        let captured = match installer.freeze(&self.runtime)? {
            Some(deps) => deps,
            None => self.runtime.installed_dependencies()?,
        };

        // Installers may report a different spelling (`Flask` for `flask`);
        // declared entries keep theirs.
        let mut ordered: Vec<Dependency> = manifest
            .dependencies
            .iter()
            .filter_map(|d| {
                let key = d.canonical_name();
                captured
                    .iter()
                    .find(|c| c.canonical_name() == key)
                    .map(|c| Dependency::new(&d.name, &c.version))
            })
            .collect();
        for dep in &captured {
            let key = dep.canonical_name();
            if !ordered.iter().any(|o| o.canonical_name() == key) {
                ordered.push(dep.clone());
            }
        }

        let changes = diff_dependencies(&manifest.dependencies, &ordered);
        manifest.dependencies = ordered;

        self.runtime.replace_receipts(&manifest.dependencies)?;
        self.manifests.save(&manifest)?;
        self.snapshots
            .write(&LockSnapshot::new(&manifest, self.runtime.installed()?))?;

        tracing::info!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            changed = changes.changed.len(),
            "captured installed set into manifest"
        );

        Ok(SaveReport {
            dependencies: manifest.dependencies.len(),
            changes,
        })
    }

    /// [`Harness::reconcile`] on the blocking pool: lock waits and installer
    /// subprocesses never run on the async runtime's threads.
    pub(crate) async fn reconcile_blocking(&self) -> Result<Reconciled> {
        let harness = self.clone();
        tokio::task::spawn_blocking(move || harness.reconcile())
            .await
            .map_err(|e| HarnessError::io("reconcile task", std::io::Error::other(e)))?
    }

    fn resolve_env(&self, manifest: &Manifest) -> Result<ProcessEnv> {
        let secrets = Secrets::load(&self.config.secrets_path)?;
        let env = ProcessEnv::resolve(manifest, &secrets, &self.runtime, self.inherit_env)?;
        env.check(&manifest.checks)?;
        Ok(env)
    }

    fn in_sync(&self, manifest: &Manifest) -> bool {
        match self.read_snapshot() {
            Ok(Some(snapshot)) => snapshot.matches(manifest) && self.runtime.is_present(),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("ignoring unreadable lock snapshot: {}", err);
                false
            }
        }
    }

    fn read_snapshot(&self) -> Result<Option<LockSnapshot>> {
        match self.snapshots.read() {
            Err(HarnessError::SnapshotCorrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), "lock snapshot is corrupt: {}", reason);
                Ok(None)
            }
            other => other,
        }
    }

    fn installer_for(&self, manifest: &Manifest) -> Arc<dyn Installer + Send + Sync> {
        match &self.installer {
            Some(installer) => Arc::clone(installer),
            None => Arc::new(CommandInstaller::new(manifest.installer.clone())),
        }
    }

    fn apply(&self, manifest: &Manifest) -> Result<ReconcileReport> {
        let _lock = EnvironmentLock::acquire(&self.config.guard_path, self.config.lock_timeout)?;

        // Another invocation may have finished while we waited.
        if self.in_sync(manifest) {
            tracing::debug!("environment reconciled by another invocation");
            return Ok(ReconcileReport {
                fast_path: true,
                ..Default::default()
            });
        }

        let installer = self.installer_for(manifest);
        let mut report = ReconcileReport {
            created_runtime: self.runtime.ensure_created(installer.as_ref())?,
            ..Default::default()
        };

        let installed = self.runtime.installed_dependencies()?;
        let plan = diff_dependencies(&installed, &manifest.dependencies);

        for dep in plan.to_install() {
            tracing::info!(dependency = %dep, "installing");
            let version = installer.install(&self.runtime, &dep)?;
            let landed = Dependency::new(&dep.name, version);
            self.runtime.record_install(&landed)?;
            report.installed.push(landed);
        }

        for dep in &plan.removed {
            tracing::info!(dependency = %dep.name, "removing");
            installer.remove(&self.runtime, &dep.name)?;
            self.runtime.forget(&dep.name)?;
            report.removed.push(dep.name.clone());
        }

        self.snapshots
            .write(&LockSnapshot::new(manifest, self.runtime.installed()?))?;

        tracing::info!(
            installed = report.installed.len(),
            removed = report.removed.len(),
            "environment reconciled"
        );
        Ok(report)
    }
}
