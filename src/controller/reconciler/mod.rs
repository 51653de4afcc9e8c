//! # Reconciler
//!
//! Drives entities toward their desired children.
//!
//! - `types`: context, errors and per-resource backoff state
//! - `reconcile`: the reconciliation pass

mod reconcile;
mod types;

pub use reconcile::{reconcile, reconcile_entity};
pub use types::{BackoffState, PassOutcome, Reconciler, ReconcilerError};
