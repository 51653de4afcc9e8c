//! # Shared Specification Types
//!
//! Building blocks embedded in every entity specification: infrastructure
//! parameters, image selection, per-workload deployment settings, feature
//! toggles and secret references.

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, Probe, ResourceRequirements, Toleration, Volume, VolumeMount,
};
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Infrastructure parameters shared by all tiers
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Service account the platform workloads run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Namespace the platform is deployed to (defaults to the entity namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Platform version, used as the default image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Platform flavour (kubernetes, openshift, eks, gke, aks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Create the service account and RBAC objects the tier needs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<bool>,
}

/// Feature toggles and shared settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    /// Image pull secret attached to every workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
    /// Secret holding the database password used by gateway and server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret: Option<SecretRef>,
    /// Database volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_disk_size: Option<i32>,
    /// Storage class for the database volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Deploy versions outside the supported set
    #[serde(default)]
    pub allow_any_version: bool,
    /// Keep audit data in a separate database
    #[serde(default, rename = "splitDB")]
    pub split_db: bool,
    /// Run gateway and server in active-active mode
    #[serde(default)]
    pub active_active: bool,
}

/// Reference to a key inside a Secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Image selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

impl ImageSpec {
    /// Full image reference (`registry/repository:tag`)
    #[must_use]
    pub fn reference(&self) -> String {
        let repository = self.repository.as_deref().unwrap_or_default();
        let tag = self.tag.as_deref().unwrap_or("latest");
        match self.registry.as_deref() {
            Some(registry) if !registry.is_empty() => format!("{registry}/{repository}:{tag}"),
            _ => format!("{repository}:{tag}"),
        }
    }
}

/// Per-workload deployment settings
///
/// Kubernetes-native fields (resources, probes, affinity, tolerations, extra
/// volumes/mounts/env) are passed through to the pod template unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Service type (ClusterIP, NodePort, LoadBalancer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object_list")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object_list")]
    pub extra_volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object_list")]
    pub extra_mounts: Option<Vec<VolumeMount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object_list")]
    pub extra_env: Option<Vec<EnvVar>>,
}

impl DeploymentSpec {
    /// Replica count, treating an unset value as one
    #[must_use]
    pub fn replica_count(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

/// Connection settings for a database not managed by the operator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDbSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Plain password, stored by the operator in the database secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Existing secret holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<SecretRef>,
}

/// Address of the gateway enforcers connect to
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl GatewayAddress {
    /// `host:port` form used in enforcer configuration
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or_default(),
            self.port.unwrap_or(crate::constants::GATEWAY_PORT)
        )
    }
}

pub(crate) fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

pub(crate) fn preserve_unknown_object_list(_: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
