use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the harness.
///
/// Every variant is terminal for the invocation. Only
/// [`HarnessError::EnvironmentLocked`] is produced after a bounded retry;
/// nothing else is retried.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("manifest not found at {}", path.display())]
    ManifestMissing { path: PathBuf },

    #[error("manifest at {} is corrupt: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("secret {name} has no value in {}", secrets_path.display())]
    SecretMissing { name: String, secrets_path: PathBuf },

    #[error("secrets file at {} is corrupt: {reason}", path.display())]
    SecretsCorrupt { path: PathBuf, reason: String },

    #[error("failed to install {name}=={version}: {reason}")]
    DependencyInstallFailed {
        name: String,
        version: String,
        reason: String,
    },

    #[error("failed to remove {name}: {reason}")]
    DependencyRemoveFailed { name: String, reason: String },

    #[error("environment is locked by another invocation (waited {waited_ms}ms on {})", path.display())]
    EnvironmentLocked { path: PathBuf, waited_ms: u128 },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("supervisor {command} failed to launch: {reason}")]
    SupervisorLaunchFailed { command: String, reason: String },

    #[error("no runtime environment at {}; run init_env first", path.display())]
    RuntimeMissing { path: PathBuf },

    #[error("variable {name} is invalid: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("lock snapshot at {} is corrupt: {reason}", path.display())]
    SnapshotCorrupt { path: PathBuf, reason: String },

    #[error("invalid launch transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Convenience constructor for I/O errors with context.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status reported for this error.
    ///
    /// `CommandNotFound` follows the shell convention of 127.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandNotFound { .. } => 127,
            Self::EnvironmentLocked { .. } => 75,
            Self::ManifestMissing { .. }
            | Self::ManifestCorrupt { .. }
            | Self::SecretsCorrupt { .. }
            | Self::SnapshotCorrupt { .. } => 78,
            _ => 1,
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = HarnessError::DependencyInstallFailed {
            name: "flask".to_string(),
            version: "3.0.0".to_string(),
            reason: "exit status 1".to_string(),
        };
        assert!(err.to_string().contains("flask==3.0.0"));

        let err = HarnessError::SecretMissing {
            name: "DATABASE_URL".to_string(),
            secrets_path: PathBuf::from(".env"),
        };
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn exit_codes_are_non_zero() {
        let errors = [
            HarnessError::CommandNotFound {
                command: "nope".to_string(),
            },
            HarnessError::ManifestMissing {
                path: PathBuf::from("envh.toml"),
            },
            HarnessError::EnvironmentLocked {
                path: PathBuf::from("envh.lock.guard"),
                waited_ms: 10,
            },
            HarnessError::InvalidVariable {
                name: "X".to_string(),
                reason: "bad".to_string(),
            },
        ];
        for err in &errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
        assert_eq!(errors[0].exit_code(), 127);
    }
}
