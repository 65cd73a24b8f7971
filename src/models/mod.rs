//! Data model for envharness.
//!
//! - [`Manifest`]: declared dependencies and variables, the desired state.
//! - [`LockSnapshot`]: the last state that was fully materialized.
//! - [`ManifestDiff`]: dependency-level difference between two states, used
//!   to plan the minimal reconciliation work.

mod diff;
mod manifest;
mod snapshot;

pub use diff::*;
pub use manifest::*;
pub use snapshot::*;
