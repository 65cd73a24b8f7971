//! The local, git-ignored secrets file.
//!
//! Dotenv format (`KEY=value`, `#` comments, optional quoting), the same file
//! a Heroku-style process manager reads. A missing file is an empty mapping:
//! only variables the manifest marks as secret-backed ever need it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                tracing::debug!(path = %path.display(), "no secrets file");
                return Ok(Self {
                    path: path.to_path_buf(),
                    values: BTreeMap::new(),
                });
            }
            Err(e) => return Err(parse_error(path, e)),
        };

        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| parse_error(path, e))?;
            values.insert(key, value);
        }

        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn from_pairs<I, K, V>(path: impl Into<PathBuf>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, or `SecretMissing` naming the declared `variable`.
    pub fn require(&self, variable: &str, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| HarnessError::SecretMissing {
            name: if key == variable {
                variable.to_string()
            } else {
                format!("{} (key {})", variable, key)
            },
            secrets_path: self.path.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_error(path: &Path, e: dotenvy::Error) -> HarnessError {
    match e {
        dotenvy::Error::Io(source) => {
            HarnessError::io(format!("read {}", path.display()), source)
        }
        other => HarnessError::SecretsCorrupt {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}
