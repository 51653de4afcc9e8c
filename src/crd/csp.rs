//! # AquaCsp
//!
//! The top-level composite: one resource describing the whole platform.
//! The operator splits it into Database, Gateway, Server, Enforcer and
//! KubeEnforcer entities of the same name.

use crate::crd::{
    CommonSpec, DeploymentSpec, ExternalDbSpec, InfrastructureSpec, SecretRef, StarboardDetails,
    WebhookCertificates,
};
use serde::{Deserialize, Serialize};

/// AquaCsp Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.aquasec.com/v1alpha1
/// kind: AquaCsp
/// metadata:
///   name: aqua
///   namespace: aqua
/// spec:
///   infra:
///     version: "2022.4"
///   database:
///     replicas: 1
///   enforcer:
///     token: enforcer-group-token
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaCsp",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "csp",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaCspSpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    /// Managed database settings (ignored when `externalDb` is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<DeploymentSpec>,
    /// Use a database not managed by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_db: Option<ExternalDbSpec>,
    /// Initial console administrator password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    /// License token installed into the console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_token: Option<String>,
    /// Deploy host enforcers once gateway and server are running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcer: Option<CspEnforcerSpec>,
    /// Deploy the admission-control enforcer once gateway and server are running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_enforcer: Option<CspKubeEnforcerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default)]
    pub mtls: bool,
    /// Approval gate propagated to the enforcer tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcer_update_approved: Option<bool>,
}

/// Host enforcer settings embedded in the composite
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CspEnforcerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
}

/// Admission-control enforcer settings embedded in the composite
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CspKubeEnforcerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<WebhookCertificates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starboard: Option<StarboardDetails>,
}

impl AquaCspSpec {
    /// Whether the platform database is managed by the operator
    pub fn manages_database(&self) -> bool {
        self.external_db.is_none()
    }
}
