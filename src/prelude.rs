//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use aqua_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Engine
pub use crate::controller::clock::{Clock, FixedClock, SystemClock};
pub use crate::controller::entity::Entity;
pub use crate::controller::graph::EntityKind;
pub use crate::controller::object::{Object, ObjectKey, ObjectKind};
pub use crate::controller::reconciler::{
    reconcile, reconcile_entity, BackoffState, PassOutcome, Reconciler, ReconcilerError,
};
pub use crate::controller::store::{
    KubeStore, MemoryStore, ObjectStore, Selector, StoreError, WatchEvent,
};

// Config types
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
