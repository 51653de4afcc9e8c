//! # Lifecycle State
//!
//! The state reported on an entity is a pure function of what one pass
//! observed. Precedence, highest first:
//!
//! 1. configuration problem: `Pending` with a message
//! 2. upstream sibling not `Running`: `WaitingForDependency` / `WaitingForPeers`
//! 3. gated workload drift held: `UpdatePendingApproval`
//! 4. workload rollout incomplete: `UpdateInProgress`
//! 5. readiness-gating sub-entity not `Running`: wait state for its kind
//! 6. `Running`

use crate::controller::graph::{gates_parent_readiness, wait_state_for, EntityKind};
use crate::controller::object::Object;
use crate::crd::{EntityStatus, LifecycleState};
use std::collections::BTreeMap;

/// Rollout progress of one workload child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadProgress {
    /// `Kind/name`
    pub name: String,
    pub ready: i32,
    pub desired: i32,
    /// Whether the workload controller has seen the latest generation
    pub observed_current: bool,
}

impl WorkloadProgress {
    /// Progress of a Deployment or DaemonSet, `None` for other kinds
    pub fn of(object: &Object) -> Option<Self> {
        let generation = object.meta().generation;
        let observed = |observed: Option<i64>| match (observed, generation) {
            (Some(observed), Some(generation)) => observed >= generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        match object {
            Object::Deployment(deployment) => {
                let desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|s| s.replicas)
                    .unwrap_or(1);
                let status = deployment.status.as_ref();
                Some(Self {
                    name: object.display_name(),
                    ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
                    desired,
                    observed_current: observed(status.and_then(|s| s.observed_generation)),
                })
            }
            Object::DaemonSet(daemon_set) => {
                let status = daemon_set.status.as_ref();
                Some(Self {
                    name: object.display_name(),
                    ready: status.map_or(0, |s| s.number_ready),
                    desired: status.map_or(1, |s| s.desired_number_scheduled),
                    observed_current: observed(status.and_then(|s| s.observed_generation)),
                })
            }
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.observed_current && self.ready >= self.desired
    }
}

/// A composed sub-entity as observed this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubEntityState {
    pub kind: EntityKind,
    pub name: String,
    pub state: LifecycleState,
}

/// Everything the state depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateInputs {
    pub config_error: Option<String>,
    /// First upstream sibling found not `Running`
    pub blocking_upstream: Option<(EntityKind, String)>,
    /// Children whose drift is held by a closed approval gate
    pub held: Vec<String>,
    pub workloads: Vec<WorkloadProgress>,
    /// Composed sub-entities in dependency order (not yet synthesized ones included as `Pending`)
    pub sub_entities: Vec<SubEntityState>,
}

/// Computed state plus its reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDecision {
    pub state: LifecycleState,
    pub message: Option<String>,
}

impl StateDecision {
    fn new(state: LifecycleState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
        }
    }
}

pub fn compute_state(inputs: &StateInputs) -> StateDecision {
    if let Some(problem) = &inputs.config_error {
        return StateDecision::new(LifecycleState::Pending, problem.clone());
    }

    if let Some((kind, name)) = &inputs.blocking_upstream {
        return StateDecision::new(wait_state_for(*kind), format!("waiting for {kind}/{name}"));
    }

    if !inputs.held.is_empty() {
        return StateDecision::new(
            LifecycleState::UpdatePendingApproval,
            format!("update of {} awaiting approval", inputs.held.join(", ")),
        );
    }

    if let Some(rollout) = inputs.workloads.iter().find(|w| !w.is_complete()) {
        return StateDecision::new(
            LifecycleState::UpdateInProgress,
            format!(
                "{} has {}/{} ready replicas",
                rollout.name, rollout.ready, rollout.desired
            ),
        );
    }

    if let Some(sub) = inputs
        .sub_entities
        .iter()
        .find(|s| gates_parent_readiness(s.kind) && !s.state.is_running())
    {
        return StateDecision::new(
            wait_state_for(sub.kind),
            format!("waiting for {}/{} ({})", sub.kind, sub.name, sub.state),
        );
    }

    StateDecision {
        state: LifecycleState::Running,
        message: None,
    }
}

/// `Kind/name -> ready/desired` for workloads and `Kind/name -> state` for sub-entities
pub fn child_readiness(inputs: &StateInputs) -> BTreeMap<String, String> {
    let workloads = inputs
        .workloads
        .iter()
        .map(|w| (w.name.clone(), format!("{}/{}", w.ready, w.desired)));
    let subs = inputs
        .sub_entities
        .iter()
        .map(|s| (format!("{}/{}", s.kind, s.name), s.state.to_string()));
    workloads.chain(subs).collect()
}

/// Status to write after a pass
///
/// `lastTransitionTime` moves only when the state changes.
pub fn next_status(
    previous: Option<&EntityStatus>,
    decision: StateDecision,
    inputs: &StateInputs,
    nodes: Vec<String>,
    observed_generation: Option<i64>,
    now: &str,
) -> EntityStatus {
    let last_transition_time = match previous {
        Some(prev) if prev.state == decision.state && prev.last_transition_time.is_some() => {
            prev.last_transition_time.clone()
        }
        _ => Some(now.to_string()),
    };
    EntityStatus {
        state: decision.state,
        nodes,
        child_readiness: child_readiness(inputs),
        message: decision.message,
        observed_generation,
        last_transition_time,
    }
}
