//! The explicit process environment handed to spawned commands.
//!
//! Variables are layered: the inherited environment (unless disabled), then
//! the runtime's activation variables, then every manifest-declared
//! variable. Nothing is exported by sourcing a script.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};

use tokio::process::Command;

use crate::error::{HarnessError, Result};
use crate::models::{EnvValue, Manifest, VariableCheck};
use crate::runtime::RuntimeEnv;
use crate::secrets::Secrets;

#[derive(Debug, Clone)]
pub struct ProcessEnv {
    vars: BTreeMap<String, OsString>,
    secret_names: BTreeSet<String>,
    inherit: bool,
}

impl ProcessEnv {
    /// Resolve every declared variable; secret-backed values come from
    /// `secrets` and fail with `SecretMissing` when absent.
    pub fn resolve(
        manifest: &Manifest,
        secrets: &Secrets,
        runtime: &RuntimeEnv,
        inherit: bool,
    ) -> Result<Self> {
        let inherited_path = if inherit {
            std::env::var_os("PATH")
        } else {
            None
        };

        let mut vars: BTreeMap<String, OsString> =
            runtime.activation_vars(inherited_path).into_iter().collect();
        let mut secret_names = BTreeSet::new();

        for (name, value) in &manifest.env {
            let resolved = match value.secret_key(name) {
                Some(key) => {
                    secret_names.insert(name.clone());
                    secrets.require(name, key)?.to_string()
                }
                None => match value {
                    EnvValue::Literal(s) => s.clone(),
                    EnvValue::Secret { .. } => String::new(),
                },
            };
            vars.insert(name.clone(), OsString::from(resolved));
        }

        Ok(Self {
            vars,
            secret_names,
            inherit,
        })
    }

    /// Value as the child will see it, including inherited variables.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.vars.get(name) {
            Some(value) => Some(value.to_string_lossy().into_owned()),
            None if self.inherit => std::env::var(name).ok(),
            None => None,
        }
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secret_names.contains(name)
    }

    /// Variables set on top of the inherited environment.
    pub fn overlay(&self) -> impl Iterator<Item = (&str, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str()))
    }

    /// Run every `[checks]` entry against the resolved values.
    pub fn check(&self, checks: &BTreeMap<String, VariableCheck>) -> Result<()> {
        for (name, check) in checks {
            let value = self.get(name).ok_or_else(|| HarnessError::InvalidVariable {
                name: name.clone(),
                reason: "not set".to_string(),
            })?;
            validate(*check, &value).map_err(|reason| HarnessError::InvalidVariable {
                name: name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    pub(crate) fn apply(&self, cmd: &mut Command) {
        if !self.inherit {
            cmd.env_clear();
        }
        cmd.envs(self.overlay());
    }
}

fn validate(check: VariableCheck, value: &str) -> std::result::Result<(), String> {
    match check {
        VariableCheck::Flag => match value.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "1" | "true" | "false" | "yes" | "no" | "on" | "off" => Ok(()),
            _ => Err(format!("{:?} is not a flag", value)),
        },
        VariableCheck::PositiveInt => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(format!("{:?} must be a positive integer", value)),
        },
        VariableCheck::Url => validate_url(value),
    }
}

/// `scheme://[user[:password]@]host[:port][/path]` with a non-empty host.
fn validate_url(value: &str) -> std::result::Result<(), String> {
    let (scheme, rest) = value
        .split_once("://")
        .ok_or_else(|| format!("{:?} has no scheme", value))?;
    let scheme_ok = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok {
        return Err(format!("{:?} has an invalid scheme", value));
    }

    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let (host, port) = match host_port.strip_prefix('[') {
        Some(v6) => {
            let (host, after) = v6
                .split_once(']')
                .ok_or_else(|| format!("{:?} has an unterminated IPv6 host", value))?;
            (host, after.strip_prefix(':'))
        }
        None => match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        },
    };
    if host.is_empty() {
        return Err(format!("{:?} has no host", value));
    }
    if let Some(port) = port {
        if !port.is_empty() && port.parse::<u16>().is_err() {
            return Err(format!("{:?} has an invalid port", value));
        }
    }
    Ok(())
}
