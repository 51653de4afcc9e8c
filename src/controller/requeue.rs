//! # Requeue Policy
//!
//! Maps the outcome of a pass to the controller action that schedules the next
//! one. Errors are handled separately by the runtime error policy, which keeps
//! a per-key [`ExponentialBackoff`].

use crate::constants::{
    DEFAULT_DEPENDENCY_POLL_SECS, DEFAULT_ERROR_BACKOFF_MAX_SECS, DEFAULT_ERROR_BACKOFF_START_SECS,
    DEFAULT_STEADY_STATE_REQUEUE_SECS,
};
use crate::controller::backoff::ExponentialBackoff;
use crate::crd::LifecycleState;
use kube_runtime::controller::Action;
use std::fmt;
use std::time::Duration;

/// Requeue intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Drift-detection heartbeat for converged entities
    pub steady_state: Duration,
    /// Re-check interval while converging
    pub dependency_poll: Duration,
    pub error_backoff_start_secs: u64,
    pub error_backoff_max_secs: u64,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            steady_state: Duration::from_secs(DEFAULT_STEADY_STATE_REQUEUE_SECS),
            dependency_poll: Duration::from_secs(DEFAULT_DEPENDENCY_POLL_SECS),
            error_backoff_start_secs: DEFAULT_ERROR_BACKOFF_START_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
        }
    }
}

/// Why the next pass was scheduled (metrics label)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    SteadyState,
    Converging,
    PendingApproval,
    Error,
    Deleted,
}

impl RequeueReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RequeueReason::SteadyState => "steady_state",
            RequeueReason::Converging => "converging",
            RequeueReason::PendingApproval => "pending_approval",
            RequeueReason::Error => "error",
            RequeueReason::Deleted => "deleted",
        }
    }
}

impl fmt::Display for RequeueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequeuePolicy {
    /// Reason for requeueing an entity left in `state`
    pub fn reason_for(state: LifecycleState) -> RequeueReason {
        match state {
            LifecycleState::Running => RequeueReason::SteadyState,
            // the grant arrives as a spec change event
            LifecycleState::UpdatePendingApproval => RequeueReason::PendingApproval,
            LifecycleState::Pending
            | LifecycleState::WaitingForDependency
            | LifecycleState::WaitingForPeers
            | LifecycleState::UpdateInProgress => RequeueReason::Converging,
        }
    }

    /// Delay before the next pass for an entity left in `state`
    pub fn interval_for(&self, state: LifecycleState) -> Duration {
        match Self::reason_for(state) {
            RequeueReason::SteadyState | RequeueReason::PendingApproval => self.steady_state,
            _ => self.dependency_poll,
        }
    }

    pub fn action_for(&self, state: LifecycleState) -> Action {
        Action::requeue(self.interval_for(state))
    }

    /// Fresh per-key error backoff
    pub fn error_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.error_backoff_start_secs, self.error_backoff_max_secs)
    }
}
