//! # AquaEnforcer
//!
//! Host enforcers running as a DaemonSet on every node.

use crate::crd::{CommonSpec, DeploymentSpec, GatewayAddress, InfrastructureSpec, SecretRef};
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaEnforcer",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "aquaenf",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaEnforcerSpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    /// Gateway the enforcers report to
    #[serde(default)]
    pub gateway: GatewayAddress,
    /// Enforcer group token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Existing secret holding the enforcer group token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default)]
    pub mtls: bool,
    /// Approval gate for DaemonSet updates (unset: no gate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_approved: Option<bool>,
}
