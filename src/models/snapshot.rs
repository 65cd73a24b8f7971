use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manifest::{Dependency, Manifest};

/// The last successfully materialized state of the runtime environment.
///
/// Written only after a reconciliation (or `save_env` capture) completes in
/// full. When `manifest_hash` equals the current manifest's hash the next
/// invocation may skip installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub manifest_hash: String,
    /// Dependency name to exact installed version.
    pub resolved: BTreeMap<String, String>,
    pub reconciled_at: DateTime<Utc>,
}

impl LockSnapshot {
    pub fn new(manifest: &Manifest, resolved: BTreeMap<String, String>) -> Self {
        Self {
            manifest_hash: manifest.content_hash(),
            resolved,
            reconciled_at: Utc::now(),
        }
    }

    pub fn matches(&self, manifest: &Manifest) -> bool {
        self.manifest_hash == manifest.content_hash()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.resolved
            .iter()
            .map(|(name, version)| Dependency::new(name, version))
            .collect()
    }
}
