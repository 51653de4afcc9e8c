//! # Controller
//!
//! Reconciliation engine for the operator's entities.
//!
//! - `backoff`: exponential backoff for failed passes
//! - `cascade`: release of cluster-scoped children on deletion
//! - `clock`: time source for status timestamps
//! - `defaults`: per-kind defaulting tables
//! - `drift`: per-kind drift detection
//! - `entity`: the trait every entity kind implements
//! - `graph`: dependency, composition and sync-order tables
//! - `object`: typed object model
//! - `owned`: record of the workload entries the operator wrote
//! - `reconciler`: the reconciliation pass
//! - `requeue`: requeue policy
//! - `state`: lifecycle state computation
//! - `store`: object store seam (Kubernetes and in-memory)
//! - `sync`: per-child resource synchronizer

pub mod backoff;
pub mod cascade;
pub mod clock;
pub mod defaults;
pub mod drift;
pub mod entity;
pub mod graph;
pub mod object;
pub mod owned;
pub mod reconciler;
pub mod requeue;
pub mod state;
pub mod store;
pub mod sync;
