//! Advisory lock serializing reconciliation across invocations.
//!
//! # Synchronization protocol
//!
//! - **What is protected**: the runtime environment directory and the lock
//!   snapshot of one checkout.
//! - **Who can mutate**: only the holder of the exclusive `flock` on the
//!   guard file.
//! - **Lock ordering**: a single lock per checkout; never nested.
//! - **Release**: dropping [`EnvironmentLock`] closes the descriptor, which
//!   releases the lock (also on crash).

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs4::FileExt;

use crate::error::{HarnessError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Held exclusive lock on a guard file.
#[derive(Debug)]
pub struct EnvironmentLock {
    file: File,
    path: PathBuf,
}

impl EnvironmentLock {
    /// Acquire the lock, retrying with exponential backoff until `timeout`
    /// has elapsed. A zero timeout tries exactly once.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| HarnessError::io(format!("create {}", parent.display()), e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| HarnessError::io(format!("open lock {}", path.display()), e))?;

        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "acquired environment lock");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if is_contended(&err) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(HarnessError::EnvironmentLocked {
                            path: path.to_path_buf(),
                            waited_ms: waited.as_millis(),
                        });
                    }
                    tracing::info!(
                        path = %path.display(),
                        "environment locked by another invocation, waiting"
                    );
                    // Blocks the calling thread; async callers reconcile on
                    // the blocking pool.
                    thread::sleep(backoff.min(timeout - waited));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => {
                    return Err(HarnessError::io(
                        format!("lock {}", path.display()),
                        err,
                    ))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EnvironmentLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), "failed to release lock: {}", err);
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    if err.kind() == ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EWOULDBLOCK)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
