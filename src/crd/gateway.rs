//! # AquaGateway
//!
//! The gateway tier enforcers connect to.

use crate::crd::{CommonSpec, DeploymentSpec, ExternalDbSpec, InfrastructureSpec};
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaGateway",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "aquagw",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaGatewaySpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_db: Option<ExternalDbSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default)]
    pub mtls: bool,
}
