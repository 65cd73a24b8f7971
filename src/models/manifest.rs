use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Declared desired state of a checkout: dependencies, exported variables,
/// and how to launch and install.
///
/// The manifest is the single source of truth for what the runtime
/// environment should contain. Automated tooling only rewrites it through an
/// explicit `save_env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Ordered dependency list, serialized as `[[dependency]]` entries.
    #[serde(default, rename = "dependency", skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, VariableCheck>,
    #[serde(default, skip_serializing_if = "LaunchConfig::is_default")]
    pub launch: LaunchConfig,
    #[serde(default, skip_serializing_if = "InstallerConfig::is_default")]
    pub installer: InstallerConfig,
}

/// A dependency pinned to an exact version. There is no resolver: the
/// version string is handed to the installer verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Name folded for comparison with installer output: lowercase, with
    /// runs of `-`, `_` and `.` collapsed to a single `-`.
    pub fn canonical_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut in_separator = false;
        for c in self.name.chars() {
            if matches!(c, '-' | '_' | '.') {
                if !in_separator {
                    out.push('-');
                }
                in_separator = true;
            } else {
                out.extend(c.to_lowercase());
                in_separator = false;
            }
        }
        out
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// The value of a manifest-declared variable.
///
/// ```toml
/// [env]
/// DEBUG = "1"
/// DATABASE_URL = { secret = true }
/// REDIS_URL = { secret = "HEROKU_REDIS_URL" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Secret { secret: SecretSource },
}

/// Where a secret-backed variable takes its value from in the secrets file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretSource {
    /// `secret = true`: look up the variable's own name.
    SameName(bool),
    /// `secret = "KEY"`: look up a differently named key.
    Key(String),
}

impl EnvValue {
    pub fn secret() -> Self {
        Self::Secret {
            secret: SecretSource::SameName(true),
        }
    }

    /// The secrets-file key this value resolves from, if secret-backed.
    ///
    /// `secret = false` is treated as an empty literal.
    pub fn secret_key<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        match self {
            Self::Literal(_) => None,
            Self::Secret {
                secret: SecretSource::SameName(true),
            } => Some(name),
            Self::Secret {
                secret: SecretSource::SameName(false),
            } => None,
            Self::Secret {
                secret: SecretSource::Key(key),
            } => Some(key),
        }
    }
}

/// Validation applied to a variable after it has been exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableCheck {
    /// Boolean-ish debug switch: empty, `0`, `1`, `true`, `false`, `yes`, `no`.
    Flag,
    /// Connection-pool style limit: an integer greater than zero.
    PositiveInt,
    /// Connection string with a scheme and a host, e.g. `redis://host:6379`.
    Url,
}

impl VariableCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::PositiveInt => "positive-int",
            Self::Url => "url",
        }
    }
}

/// Server command lines for the two launch modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Foreground development server.
    #[serde(default = "default_dev_command")]
    pub dev: Vec<String>,
    /// External process manager that owns restart policy.
    #[serde(default = "default_supervisor_command")]
    pub supervisor: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            dev: default_dev_command(),
            supervisor: default_supervisor_command(),
        }
    }
}

impl LaunchConfig {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

fn default_dev_command() -> Vec<String> {
    vec!["flask".to_string(), "run".to_string()]
}

fn default_supervisor_command() -> Vec<String> {
    vec!["honcho".to_string(), "start".to_string()]
}

/// Command templates used to materialize dependencies.
///
/// Each template may reference `{env}` (runtime directory), `{name}` and
/// `{version}`. An empty `create` only makes the directory; an empty
/// `freeze` makes `save_env` fall back to install receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_create_command")]
    pub create: Vec<String>,
    #[serde(default = "default_install_command")]
    pub install: Vec<String>,
    #[serde(default = "default_remove_command")]
    pub remove: Vec<String>,
    #[serde(default = "default_freeze_command")]
    pub freeze: Vec<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            create: default_create_command(),
            install: default_install_command(),
            remove: default_remove_command(),
            freeze: default_freeze_command(),
        }
    }
}

impl InstallerConfig {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_create_command() -> Vec<String> {
    strings(&["python3", "-m", "venv", "{env}"])
}

fn default_install_command() -> Vec<String> {
    strings(&["{env}/bin/pip", "install", "{name}=={version}"])
}

fn default_remove_command() -> Vec<String> {
    strings(&["{env}/bin/pip", "uninstall", "-y", "{name}"])
}

fn default_freeze_command() -> Vec<String> {
    strings(&["{env}/bin/pip", "freeze"])
}

impl Manifest {
    /// Content hash of the parsed manifest (hex SHA-256).
    ///
    /// Computed over the canonical JSON form, so reformatting or commenting
    /// the TOML file leaves the hash unchanged.
    pub fn content_hash(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("manifest has only string map keys");
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Check structural rules that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err("dependency with empty name".to_string());
            }
            if matches!(dep.name.as_str(), "." | "..")
                || dep
                    .name
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '=' | '/' | '\\'))
            {
                return Err(format!("invalid dependency name {:?}", dep.name));
            }
            if dep.version.trim().is_empty() {
                return Err(format!("dependency {} has no version", dep.name));
            }
            if !seen.insert(dep.name.as_str()) {
                return Err(format!("dependency {} declared twice", dep.name));
            }
        }
        for name in self.env.keys().chain(self.checks.keys()) {
            if !is_variable_name(name) {
                return Err(format!("invalid variable name {:?}", name));
            }
        }
        if self.launch.dev.is_empty() || self.launch.supervisor.is_empty() {
            return Err("launch commands must not be empty".to_string());
        }
        if self.installer.install.is_empty() {
            return Err("installer.install must not be empty".to_string());
        }
        Ok(())
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let mut manifest = Manifest {
            dependencies: vec![
                Dependency::new("flask", "3.0.0"),
                Dependency::new("redis", "5.0.1"),
            ],
            ..Default::default()
        };
        manifest
            .env
            .insert("DEBUG".to_string(), EnvValue::Literal("1".to_string()));
        manifest
            .env
            .insert("DATABASE_URL".to_string(), EnvValue::secret());
        manifest
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);

        b.dependencies.push(Dependency::new("gunicorn", "21.2.0"));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_ignores_toml_formatting() {
        let compact = r#"
[[dependency]]
name = "flask"
version = "3.0.0"
"#;
        let commented = r#"
# web framework
[[dependency]]
version = "3.0.0"   # pinned
name    = "flask"
"#;
        let a: Manifest = toml::from_str(compact).unwrap();
        let b: Manifest = toml::from_str(commented).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn parses_secret_forms() {
        let manifest: Manifest = toml::from_str(
            r#"
[env]
DEBUG = "1"
DATABASE_URL = { secret = true }
REDIS_URL = { secret = "HEROKU_REDIS_URL" }
"#,
        )
        .unwrap();

        assert_eq!(manifest.env["DEBUG"].secret_key("DEBUG"), None);
        assert_eq!(
            manifest.env["DATABASE_URL"].secret_key("DATABASE_URL"),
            Some("DATABASE_URL")
        );
        assert_eq!(
            manifest.env["REDIS_URL"].secret_key("REDIS_URL"),
            Some("HEROKU_REDIS_URL")
        );
    }

    #[test]
    fn missing_sections_take_defaults() {
        let manifest: Manifest = toml::from_str("").unwrap();
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.launch, LaunchConfig::default());
        assert_eq!(manifest.installer, InstallerConfig::default());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicates() {
        let mut manifest = sample();
        manifest
            .dependencies
            .push(Dependency::new("flask", "2.0.0"));
        let err = manifest.validate().unwrap_err();
        assert!(err.contains("flask"));
    }

    #[test]
    fn validate_rejects_dot_names() {
        for name in [".", ".."] {
            let mut manifest = sample();
            manifest.dependencies.push(Dependency::new(name, "1.0"));
            let err = manifest.validate().unwrap_err();
            assert!(err.contains("invalid dependency name"), "{name}: {err}");
        }
    }

    #[test]
    fn canonical_names_fold_case_and_separators() {
        assert_eq!(Dependency::new("Flask", "3.0.0").canonical_name(), "flask");
        assert_eq!(
            Dependency::new("Typing_Extensions", "4").canonical_name(),
            Dependency::new("typing.extensions", "4").canonical_name()
        );
        assert_eq!(
            Dependency::new("zope--interface", "6").canonical_name(),
            "zope-interface"
        );
    }

    #[test]
    fn validate_rejects_bad_variable_names() {
        let mut manifest = sample();
        manifest
            .env
            .insert("1BAD".to_string(), EnvValue::Literal(String::new()));
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn parses_checks() {
        let manifest: Manifest = toml::from_str(
            r#"
[checks]
DEBUG = "flag"
REDIS_MAX_CONNECTIONS = "positive-int"
REDIS_URL = "url"
"#,
        )
        .unwrap();
        assert_eq!(
            manifest.checks["REDIS_MAX_CONNECTIONS"],
            VariableCheck::PositiveInt
        );
        assert_eq!(manifest.checks["REDIS_URL"].as_str(), "url");
    }
}
