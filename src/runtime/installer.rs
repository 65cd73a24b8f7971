use std::process::{Command, Output, Stdio};

use crate::error::{HarnessError, Result};
use crate::models::{Dependency, InstallerConfig};

use super::RuntimeEnv;

/// Materializes dependencies into a [`RuntimeEnv`].
///
/// The harness owns receipts and the lock snapshot; an installer only does
/// the external work. Implementations must not retry on their own.
pub trait Installer {
    /// Populate a freshly created environment directory.
    fn create(&self, env: &RuntimeEnv) -> Result<()>;

    /// Install `dep` and return the exact version that landed.
    fn install(&self, env: &RuntimeEnv, dep: &Dependency) -> Result<String>;

    fn remove(&self, env: &RuntimeEnv, name: &str) -> Result<()>;

    /// Report what is actually installed, including ad-hoc installs the
    /// harness never saw. `None` means the installer cannot tell, and the
    /// caller should fall back to receipts.
    fn freeze(&self, env: &RuntimeEnv) -> Result<Option<Vec<Dependency>>>;
}

/// Installer driven by the manifest's `[installer]` command templates.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    config: InstallerConfig,
}

impl CommandInstaller {
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    fn render(template: &[String], env: &RuntimeEnv, dep: Option<&Dependency>) -> Vec<String> {
        let env_path = env.root().to_string_lossy();
        template
            .iter()
            .map(|part| {
                let mut part = part.replace("{env}", &env_path);
                if let Some(dep) = dep {
                    part = part
                        .replace("{name}", &dep.name)
                        .replace("{version}", &dep.version);
                }
                part
            })
            .collect()
    }

    fn run(argv: &[String]) -> std::result::Result<Output, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty command template".to_string())?;
        tracing::debug!(command = ?argv, "running installer command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => format!("{} not found", program),
                _ => format!("failed to spawn {}: {}", program, e),
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                tail(&output.stderr)
            ))
        }
    }
}

impl Installer for CommandInstaller {
    fn create(&self, env: &RuntimeEnv) -> Result<()> {
        if self.config.create.is_empty() {
            return Ok(());
        }
        let argv = Self::render(&self.config.create, env, None);
        Self::run(&argv).map(|_| ()).map_err(|reason| {
            HarnessError::DependencyInstallFailed {
                name: "<runtime>".to_string(),
                version: String::new(),
                reason,
            }
        })
    }

    fn install(&self, env: &RuntimeEnv, dep: &Dependency) -> Result<String> {
        let argv = Self::render(&self.config.install, env, Some(dep));
        Self::run(&argv)
            .map(|_| dep.version.clone())
            .map_err(|reason| HarnessError::DependencyInstallFailed {
                name: dep.name.clone(),
                version: dep.version.clone(),
                reason,
            })
    }

    fn remove(&self, env: &RuntimeEnv, name: &str) -> Result<()> {
        if self.config.remove.is_empty() {
            return Ok(());
        }
        let placeholder = Dependency::new(name, "");
        let argv = Self::render(&self.config.remove, env, Some(&placeholder));
        Self::run(&argv)
            .map(|_| ())
            .map_err(|reason| HarnessError::DependencyRemoveFailed {
                name: name.to_string(),
                reason,
            })
    }

    fn freeze(&self, env: &RuntimeEnv) -> Result<Option<Vec<Dependency>>> {
        if self.config.freeze.is_empty() {
            return Ok(None);
        }
        let argv = Self::render(&self.config.freeze, env, None);
        let output = Self::run(&argv).map_err(|reason| {
            HarnessError::io(
                "freeze installed set",
                std::io::Error::new(std::io::ErrorKind::Other, reason),
            )
        })?;
        Ok(Some(parse_freeze(&String::from_utf8_lossy(&output.stdout))))
    }
}

/// Parse `name==version` lines. Editable installs, URL requirements and
/// comments cannot be pinned by name and version, so they are skipped.
pub(crate) fn parse_freeze(text: &str) -> Vec<Dependency> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| match line.split_once("==") {
            Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
                Some(Dependency::new(name.trim(), version.trim()))
            }
            _ => {
                tracing::warn!(line, "skipping unpinned entry in freeze output");
                None
            }
        })
        .collect()
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}
