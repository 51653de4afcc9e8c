//! # Entity Status
//!
//! Observed status shared by every entity kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state reported on an entity
///
/// Recomputed on every reconciliation pass from observed child state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum LifecycleState {
    #[default]
    Pending,
    WaitingForDependency,
    WaitingForPeers,
    UpdateInProgress,
    UpdatePendingApproval,
    Running,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "Pending",
            LifecycleState::WaitingForDependency => "WaitingForDependency",
            LifecycleState::WaitingForPeers => "WaitingForPeers",
            LifecycleState::UpdateInProgress => "UpdateInProgress",
            LifecycleState::UpdatePendingApproval => "UpdatePendingApproval",
            LifecycleState::Running => "Running",
        }
    }

    pub fn is_running(self) -> bool {
        self == LifecycleState::Running
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an entity resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: LifecycleState,
    /// Pods backing the entity's workload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    /// Readiness summary per child (`Kind/name` -> `ready/desired` or entity state)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub child_readiness: BTreeMap<String, String>,
    /// Human-readable reason for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Generation of the spec the state was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// When the state last changed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl EntityStatus {
    /// State of an optional status, `Pending` when absent
    pub fn state_of(status: Option<&EntityStatus>) -> LifecycleState {
        status.map(|s| s.state).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_status_is_pending() {
        assert_eq!(EntityStatus::state_of(None), LifecycleState::Pending);
    }

    #[test]
    fn test_state_serializes_as_plain_name() {
        let status = EntityStatus {
            state: LifecycleState::WaitingForPeers,
            ..EntityStatus::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "WaitingForPeers");
        assert!(value.get("nodes").is_none());
    }
}
