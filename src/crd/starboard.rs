//! # AquaStarboard
//!
//! The report-scanning operator deployed beside the KubeEnforcer.

use crate::crd::{CommonSpec, DeploymentSpec, InfrastructureSpec};
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaStarboard",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "aquasb",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaStarboardSpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default)]
    pub config: StarboardConfig,
    /// Deprecated: use `config.batchDeleteDelay`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_delete_delay: Option<String>,
}

/// Starboard operator settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StarboardConfig {
    /// Maximum number of scan jobs deleted per batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_delete_limit: Option<i32>,
    /// Delay between delete batches (duration string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_delete_delay: Option<String>,
    /// Vulnerability scanner plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerability_scanner: Option<String>,
}

/// Starboard settings embedded in a KubeEnforcer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StarboardDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default)]
    pub config: StarboardConfig,
}
