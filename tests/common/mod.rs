//! Shared fixtures for the integration specs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use envharness::models::Dependency;
use envharness::runtime::{Installer, RuntimeEnv};
use envharness::{Harness, HarnessConfig, HarnessError, Result};

/// Installer that records what it was asked to do instead of running
/// package tooling.
#[derive(Default)]
pub struct FakeInstaller {
    installs: Mutex<Vec<Dependency>>,
    removals: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
    frozen: Mutex<Option<Vec<Dependency>>>,
    delay: Duration,
}

impl FakeInstaller {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn installs(&self) -> Vec<Dependency> {
        self.installs.lock().unwrap().clone()
    }

    pub fn install_count(&self) -> usize {
        self.installs.lock().unwrap().len()
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    pub fn fail_on(&self, name: Option<&str>) {
        *self.fail_on.lock().unwrap() = name.map(str::to_string);
    }

    /// Pretend the runtime reports exactly `deps` when frozen.
    pub fn freeze_as(&self, deps: Vec<Dependency>) {
        *self.frozen.lock().unwrap() = Some(deps);
    }
}

impl Installer for FakeInstaller {
    fn create(&self, _env: &RuntimeEnv) -> Result<()> {
        Ok(())
    }

    fn install(&self, _env: &RuntimeEnv, dep: &Dependency) -> Result<String> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail_on.lock().unwrap().as_deref() == Some(dep.name.as_str()) {
            return Err(HarnessError::DependencyInstallFailed {
                name: dep.name.clone(),
                version: dep.version.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        self.installs.lock().unwrap().push(dep.clone());
        Ok(dep.version.clone())
    }

    fn remove(&self, _env: &RuntimeEnv, name: &str) -> Result<()> {
        self.removals.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn freeze(&self, _env: &RuntimeEnv) -> Result<Option<Vec<Dependency>>> {
        Ok(self.frozen.lock().unwrap().clone())
    }
}

pub fn config_for(root: &Path) -> HarnessConfig {
    HarnessConfig::for_root(root)
        .with_lock_timeout(Duration::from_millis(200))
        .with_launch_grace(Duration::from_millis(500))
}

pub fn harness_with(root: &Path, installer: &Arc<FakeInstaller>) -> Harness {
    Harness::new(config_for(root)).with_installer(installer.clone())
}

pub fn write_manifest(root: &Path, toml: &str) {
    std::fs::write(root.join("envh.toml"), toml).expect("Failed to write manifest");
}

pub fn write_secrets(root: &Path, dotenv: &str) {
    std::fs::write(root.join(".env"), dotenv).expect("Failed to write secrets");
}

pub const BASE_MANIFEST: &str = r#"
[[dependency]]
name = "flask"
version = "3.0.0"

[[dependency]]
name = "redis"
version = "5.0.1"

[env]
DEBUG = "1"
REDIS_MAX_CONNECTIONS = "50"
"#;
