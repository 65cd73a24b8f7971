use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::manifest::{Dependency, Manifest};

/// Dependency-level difference between two states.
///
/// Used both to compare manifests and to plan reconciliation work against
/// what is actually installed: `added` and `changed` need installing,
/// `removed` needs removing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub added: Vec<Dependency>,
    pub removed: Vec<Dependency>,
    pub changed: Vec<DependencyChange>,
}

/// A dependency present on both sides at different versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyChange {
    pub name: String,
    pub from: String,
    pub to: String,
}

impl DependencyChange {
    pub fn target(&self) -> Dependency {
        Dependency::new(&self.name, &self.to)
    }
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Dependencies that must be installed to reach the new side: additions
    /// first, then version changes.
    pub fn to_install(&self) -> Vec<Dependency> {
        self.added
            .iter()
            .cloned()
            .chain(self.changed.iter().map(DependencyChange::target))
            .collect()
    }
}

/// Compare the dependency lists of two manifests.
pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
    diff_dependencies(&old.dependencies, &new.dependencies)
}

/// Compare two dependency lists keyed by name.
///
/// `added` and `changed` follow `new`'s order; `removed` follows `old`'s.
pub fn diff_dependencies(old: &[Dependency], new: &[Dependency]) -> ManifestDiff {
    let old_by_name: BTreeMap<&str, &Dependency> =
        old.iter().map(|d| (d.name.as_str(), d)).collect();
    let new_by_name: BTreeMap<&str, &Dependency> =
        new.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut result = ManifestDiff::default();

    for dep in new {
        match old_by_name.get(dep.name.as_str()) {
            None => result.added.push(dep.clone()),
            Some(prev) if prev.version != dep.version => result.changed.push(DependencyChange {
                name: dep.name.clone(),
                from: prev.version.clone(),
                to: dep.version.clone(),
            }),
            Some(_) => {}
        }
    }

    for dep in old {
        if !new_by_name.contains_key(dep.name.as_str()) {
            result.removed.push(dep.clone());
        }
    }

    result
}
