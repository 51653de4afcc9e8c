//! # AquaKubeEnforcer
//!
//! The admission-control enforcer: webhook configurations, RBAC and the
//! enforcer deployment, optionally followed by a Starboard sidecar entity.

use crate::crd::{
    CommonSpec, DeploymentSpec, GatewayAddress, InfrastructureSpec, SecretRef, StarboardDetails,
};
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaKubeEnforcer",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "aquake",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaKubeEnforcerSpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default)]
    pub gateway: GatewayAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    /// Webhook serving certificates (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<WebhookCertificates>,
    /// Deploy Starboard once the enforcer is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starboard: Option<StarboardDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    /// Approval gate for Deployment updates (unset: no gate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_approved: Option<bool>,
}

/// Webhook serving certificates, base64 encoded PEM
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCertificates {
    pub ca_bundle: String,
    pub server_cert: String,
    pub server_key: String,
}
