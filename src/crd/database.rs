//! # AquaDatabase
//!
//! The platform database tier: password secret, volume, service and
//! PostgreSQL deployment.

use crate::crd::{CommonSpec, DeploymentSpec, InfrastructureSpec};
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AquaDatabase",
    group = "operator.aquasec.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::EntityStatus",
    derive = "PartialEq",
    shortname = "aquadb",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AquaDatabaseSpec {
    #[serde(default)]
    pub infra: InfrastructureSpec,
    #[serde(default)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
}
