//! Aqua Operator Library
//!
//! Reconciles a multi-tier security platform (database, gateway, server,
//! enforcers) from custom resources.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use aqua_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod manifests;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
