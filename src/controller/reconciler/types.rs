//! # Types
//!
//! Core types for the reconciler.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::clock::Clock;
use crate::controller::defaults::PlatformDefaults;
use crate::controller::object::{ObjectKey, ObjectKind};
use crate::controller::requeue::{RequeuePolicy, RequeueReason};
use crate::controller::store::{ObjectStore, StoreError};
use crate::crd::LifecycleState;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("expected {kind} at {key}, store returned {found}")]
    UnexpectedObject {
        kind: ObjectKind,
        key: ObjectKey,
        found: ObjectKind,
    },
    #[error("finalizer failed: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ReconcilerError>>),
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciliation context shared by every controller
///
/// Everything a pass touches arrives through here; the engine holds no
/// process-wide state of its own.
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
    pub policy: RequeuePolicy,
    pub platform: PlatformDefaults,
    /// Per-resource error backoff, keyed by `Kind/namespace/name`
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        policy: RequeuePolicy,
        platform: PlatformDefaults,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            platform,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Key used for per-resource backoff tracking
    pub fn backoff_key(kind: ObjectKind, key: &ObjectKey) -> String {
        format!("{kind}/{key}")
    }

    /// Forget the error history of a resource
    ///
    /// Called after every successful pass, which includes the pass that finds
    /// the resource gone, and after finalizer cleanup.
    pub fn forget_backoff(&self, backoff_key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(backoff_key);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }

    /// Number of resources currently carrying error history
    pub fn tracked_backoffs(&self) -> usize {
        self.backoff_states.lock().map_or(0, |states| states.len())
    }

    /// Delay before retrying a failed resource, plus its consecutive error count
    pub fn next_error_backoff(&self, backoff_key: &str) -> (std::time::Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(backoff_key.to_string())
                    .or_insert_with(|| BackoffState::new(self.policy.error_backoff()));
                state.increment_error();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!(
                    "Failed to lock backoff_states: {}, using default backoff",
                    e
                );
                (
                    std::time::Duration::from_secs(self.policy.error_backoff_start_secs),
                    0,
                )
            }
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// State computed this pass, `None` when the entity is gone
    pub state: Option<LifecycleState>,
    pub reason: RequeueReason,
    pub action: Action,
}

impl PassOutcome {
    pub(crate) fn deleted() -> Self {
        Self {
            state: None,
            reason: RequeueReason::Deleted,
            action: Action::await_change(),
        }
    }

    pub(crate) fn settled(policy: &RequeuePolicy, state: LifecycleState) -> Self {
        Self {
            state: Some(state),
            reason: RequeuePolicy::reason_for(state),
            action: policy.action_for(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::SystemClock;
    use crate::controller::store::MemoryStore;
    use std::time::Duration;

    fn reconciler() -> Reconciler {
        Reconciler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            RequeuePolicy {
                error_backoff_start_secs: 5,
                error_backoff_max_secs: 20,
                ..RequeuePolicy::default()
            },
            PlatformDefaults::default(),
        )
    }

    #[test]
    fn test_error_backoff_grows_per_resource_and_resets() {
        let ctx = reconciler();
        let key = Reconciler::backoff_key(
            ObjectKind::AquaCsp,
            &ObjectKey::namespaced("aqua", "aqua"),
        );
        let other = Reconciler::backoff_key(
            ObjectKind::AquaCsp,
            &ObjectKey::namespaced("aqua", "other"),
        );

        assert_eq!(ctx.next_error_backoff(&key), (Duration::from_secs(5), 1));
        assert_eq!(ctx.next_error_backoff(&key), (Duration::from_secs(10), 2));
        assert_eq!(ctx.next_error_backoff(&other), (Duration::from_secs(5), 1));

        ctx.forget_backoff(&key);
        assert_eq!(ctx.tracked_backoffs(), 1);
        assert_eq!(ctx.next_error_backoff(&key), (Duration::from_secs(5), 1));
    }

    #[test]
    fn test_deleted_outcome_awaits_change() {
        let outcome = PassOutcome::deleted();
        assert_eq!(outcome.state, None);
        assert_eq!(outcome.action, Action::await_change());
    }
}
