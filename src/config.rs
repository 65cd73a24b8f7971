//! Harness configuration: where a checkout keeps its persisted state and how
//! long to wait on shared resources.
//!
//! Loaded from environment variables by [`HarnessConfig::from_env`]:
//! - `ENVH_ROOT` - project root (default: current directory)
//! - `ENVH_LOCK_TIMEOUT_SECS` - how long to wait for the reconcile lock (default: 30)
//! - `ENVH_LAUNCH_GRACE_MS` - supervisor startup grace period (default: 2000)

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MANIFEST_FILE: &str = "envh.toml";
pub const SNAPSHOT_FILE: &str = "envh.lock";
pub const GUARD_FILE: &str = "envh.lock.guard";
pub const SECRETS_FILE: &str = ".env";
pub const RUNTIME_DIR: &str = ".envh";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LAUNCH_GRACE: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Advisory lock target. The snapshot itself is replaced by rename, so the
    /// lock lives on a sibling file whose inode never changes.
    pub guard_path: PathBuf,
    /// Git-ignored dotenv file holding secret values.
    pub secrets_path: PathBuf,
    pub runtime_dir: PathBuf,
    pub lock_timeout: Duration,
    pub launch_grace: Duration,
}

impl HarnessConfig {
    /// Standard layout rooted at `root`.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            manifest_path: root.join(MANIFEST_FILE),
            snapshot_path: root.join(SNAPSHOT_FILE),
            guard_path: root.join(GUARD_FILE),
            secrets_path: root.join(SECRETS_FILE),
            runtime_dir: root.join(RUNTIME_DIR),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            launch_grace: DEFAULT_LAUNCH_GRACE,
            root,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> std::io::Result<Self> {
        let root = match std::env::var_os("ENVH_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir()?,
        };

        let lock_timeout = std::env::var("ENVH_LOCK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT);

        let launch_grace = std::env::var("ENVH_LAUNCH_GRACE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LAUNCH_GRACE);

        Ok(Self::for_root(root)
            .with_lock_timeout(lock_timeout)
            .with_launch_grace(launch_grace))
    }

    /// Same timeouts, different project root.
    pub fn rooted_at(self, root: impl AsRef<Path>) -> Self {
        Self::for_root(root)
            .with_lock_timeout(self.lock_timeout)
            .with_launch_grace(self.launch_grace)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }
}
