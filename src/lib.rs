//! envharness: keep a checkout's isolated runtime environment in agreement
//! with its manifest, and run commands and servers inside it.
//!
//! - [`store`]: manifest and lock snapshot persistence, advisory locking.
//! - [`runtime`]: the runtime environment handle and the installer seam.
//! - [`harness`]: reconciliation, command execution, launch modes.

pub mod config;
pub mod error;
pub mod harness;
pub mod models;
pub mod runtime;
pub mod secrets;
pub mod store;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use harness::Harness;
