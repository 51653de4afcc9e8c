//! # Runtime
//!
//! - `initialization`: startup sequence
//! - `watch_loop`: one controller per entity kind
//! - `error_policy`: reconcile error backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::{run_controllers, WatchContext};
