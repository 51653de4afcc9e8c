//! # Manifest Builders
//!
//! Pure functions turning a normalized entity spec into the desired form of
//! every child object it owns, plus the sub-entities it composes.
//!
//! - `csp.rs` - Composite: service account, RBAC, credentials, sub-entities
//! - `database.rs` - Password secret, volume, service and deployment
//! - `gateway.rs` - Gateway service and deployment
//! - `server.rs` - Console configuration, service and deployment
//! - `enforcer.rs` - Host enforcer daemon set
//! - `kube_enforcer.rs` - Admission webhooks, RBAC and deployment
//! - `starboard.rs` - Starboard operator RBAC and deployment
//!
//! Builders never talk to the store. Configuration problems surface as
//! [`ConfigError`] and are reported on the entity's status.

pub mod csp;
pub mod database;
pub mod enforcer;
pub mod gateway;
pub mod kube_enforcer;
pub mod server;
pub mod starboard;

use crate::constants::{DATABASE_PORT, MANAGED_BY, SUPPORTED_VERSIONS};
use crate::controller::defaults::{database_secret_name, DATABASE_SECRET_KEY};
use crate::controller::drift::canonical_digest;
use crate::controller::graph::{sync_priority, topological_order, EntityKind};
use crate::controller::object::Object;
use crate::controller::sync::UpdateGate;
use crate::crd::{CommonSpec, DeploymentSpec, ExternalDbSpec, InfrastructureSpec, SecretRef};
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec as WorkloadSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, EnvFromSource, EnvVar, EnvVarSource,
    LocalObjectReference, PodSecurityContext, PodSpec, PodTemplateSpec, Secret,
    SecretKeySelector, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use thiserror::Error;

/// Problems in an entity spec that only the user can fix
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("external database requires a password or a password secret reference")]
    ExternalDbPasswordMissing,
    #[error("{entity} requires webhook certificates")]
    CertificatesMissing { entity: EntityKind },
    #[error("certificate field {field} is not valid base64")]
    CertificateEncoding { field: &'static str },
    #[error("{entity} requires an enforcer token or a token secret reference")]
    TokenMissing { entity: EntityKind },
    #[error("version {version} is not supported (set allowAnyVersion to deploy it)")]
    UnsupportedVersion { version: String },
    #[error("activeActive requires an external database or splitDB")]
    ActiveActiveWithoutSharedDatabase,
}

/// One owned child and the update policy it is synchronized under
#[derive(Debug, Clone)]
pub struct DesiredChild {
    pub object: Object,
    pub gate: UpdateGate,
}

impl DesiredChild {
    pub fn open(object: impl Into<Object>) -> Self {
        Self {
            object: object.into(),
            gate: UpdateGate::Open,
        }
    }

    pub fn gated(object: impl Into<Object>, approval: Option<bool>) -> Self {
        Self {
            object: object.into(),
            gate: UpdateGate::Approval(approval),
        }
    }

    pub fn create_only(object: impl Into<Object>) -> Self {
        Self {
            object: object.into(),
            gate: UpdateGate::CreateOnly,
        }
    }
}

/// Everything one entity wants to exist
#[derive(Debug, Clone, Default)]
pub struct TierPlan {
    /// Owned children, in synchronization order
    pub children: Vec<DesiredChild>,
    /// Sub-entities, in dependency order
    pub composed: Vec<Object>,
    /// Labels selecting the pods of the entity's workloads
    pub pod_selector: Option<BTreeMap<String, String>>,
}

impl TierPlan {
    /// Put children and sub-entities into the order they are synchronized in
    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.children
            .sort_by_key(|child| sync_priority(child.object.kind()));

        let kinds: Vec<EntityKind> = self
            .composed
            .iter()
            .filter_map(|o| EntityKind::from_object_kind(o.kind()))
            .collect();
        if let Some(order) = topological_order(&kinds) {
            self.composed.sort_by_key(|o| {
                EntityKind::from_object_kind(o.kind())
                    .and_then(|k| order.iter().position(|x| *x == k))
                    .unwrap_or(order.len())
            });
        }
        self
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children
            .iter()
            .map(|c| c.object.display_name())
            .collect()
    }
}

/// Reject versions outside the supported set unless explicitly allowed
pub fn check_version(infra: &InfrastructureSpec, common: &CommonSpec) -> Result<(), ConfigError> {
    match infra.version.as_deref() {
        Some(version) if !common.allow_any_version && !SUPPORTED_VERSIONS.contains(&version) => {
            Err(ConfigError::UnsupportedVersion {
                version: version.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Active-active needs a database both replicas can share
pub fn check_active_active(
    common: &CommonSpec,
    external_db: Option<&ExternalDbSpec>,
) -> Result<(), ConfigError> {
    if common.active_active && external_db.is_none() && !common.split_db {
        return Err(ConfigError::ActiveActiveWithoutSharedDatabase);
    }
    Ok(())
}

/// Labels carried by every object of one tier
pub fn tier_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), app.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
        ("app.kubernetes.io/part-of".to_string(), "aqua".to_string()),
    ])
}

/// Labels selecting the pods of one tier
pub fn selector_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

pub fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        ..ObjectMeta::default()
    }
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub fn secret_env(name: &str, secret: &SecretRef) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.name.clone(),
                key: secret.key.clone(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

pub fn config_map_env_from(name: &str) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: name.to_string(),
            optional: None,
        }),
        ..EnvFromSource::default()
    }
}

pub fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

pub fn service(
    name: &str,
    namespace: &str,
    app: &str,
    service_type: Option<&str>,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        spec: Some(ServiceSpec {
            type_: Some(service_type.unwrap_or("ClusterIP").to_string()),
            selector: Some(selector_labels(app)),
            ports: Some(ports),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

pub fn service_account(name: &str, namespace: &str, app: &str, common: &CommonSpec) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        image_pull_secrets: pull_secrets(common),
        ..ServiceAccount::default()
    }
}

/// Opaque secret from raw values
pub fn secret(
    name: &str,
    namespace: &str,
    app: &str,
    data: impl IntoIterator<Item = (String, Vec<u8>)>,
) -> Secret {
    Secret {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        type_: Some("Opaque".to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v)))
                .collect(),
        ),
        ..Secret::default()
    }
}

pub fn config_map(
    name: &str,
    namespace: &str,
    app: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        data: Some(data),
        ..ConfigMap::default()
    }
}

pub fn policy_rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(api_groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..PolicyRule::default()
    }
}

pub fn cluster_role(name: &str, app: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: object_meta(name, None, tier_labels(app)),
        rules: Some(rules),
        ..ClusterRole::default()
    }
}

pub fn role(name: &str, namespace: &str, app: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        rules: Some(rules),
    }
}

fn service_account_subject(service_account: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }
}

pub fn cluster_role_binding(
    name: &str,
    app: &str,
    cluster_role: &str,
    service_account: &str,
    namespace: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: object_meta(name, None, tier_labels(app)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    }
}

pub fn role_binding(
    name: &str,
    namespace: &str,
    app: &str,
    role: &str,
    service_account: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    }
}

pub fn pull_secrets(common: &CommonSpec) -> Option<Vec<LocalObjectReference>> {
    common.image_pull_secret.as_ref().map(|name| {
        vec![LocalObjectReference {
            name: name.clone(),
        }]
    })
}

/// Non-root pod security context
pub fn security_context(run_as_non_root: Option<bool>) -> Option<PodSecurityContext> {
    run_as_non_root.filter(|enabled| *enabled).map(|_| PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(11431),
        run_as_group: Some(11433),
        fs_group: Some(11433),
        ..PodSecurityContext::default()
    })
}

/// Container with the image and user overrides of `deploy` applied
pub fn container(name: &str, deploy: Option<&DeploymentSpec>, mut base: Container) -> Container {
    base.name = name.to_string();
    if let Some(deploy) = deploy {
        if let Some(image) = &deploy.image {
            base.image = Some(image.reference());
            base.image_pull_policy.clone_from(&image.pull_policy);
        }
        if deploy.resources.is_some() {
            base.resources.clone_from(&deploy.resources);
        }
        if deploy.liveness_probe.is_some() {
            base.liveness_probe.clone_from(&deploy.liveness_probe);
        }
        if deploy.readiness_probe.is_some() {
            base.readiness_probe.clone_from(&deploy.readiness_probe);
        }
        if let Some(extra) = &deploy.extra_env {
            base.env.get_or_insert_with(Vec::new).extend(extra.iter().cloned());
        }
        if let Some(extra) = &deploy.extra_mounts {
            base.volume_mounts
                .get_or_insert_with(Vec::new)
                .extend(extra.iter().cloned());
        }
    }
    base
}

/// Pod spec scheduling and identity settings shared by every workload
pub fn pod_spec(
    service_account: Option<&str>,
    common: &CommonSpec,
    run_as_non_root: Option<bool>,
    deploy: Option<&DeploymentSpec>,
    mut base: PodSpec,
) -> PodSpec {
    base.service_account_name = service_account.map(str::to_string);
    base.image_pull_secrets = pull_secrets(common);
    if base.security_context.is_none() {
        base.security_context = security_context(run_as_non_root);
    }
    if let Some(deploy) = deploy {
        base.node_selector.clone_from(&deploy.node_selector);
        base.affinity.clone_from(&deploy.affinity);
        base.tolerations.clone_from(&deploy.tolerations);
        if let Some(extra) = &deploy.extra_volumes {
            base.volumes.get_or_insert_with(Vec::new).extend(extra.iter().cloned());
        }
    }
    base
}

pub fn pod_template(
    app: &str,
    annotations: Option<BTreeMap<String, String>>,
    spec: PodSpec,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(tier_labels(app)),
            annotations,
            ..ObjectMeta::default()
        }),
        spec: Some(spec),
    }
}

pub fn deployment(
    name: &str,
    namespace: &str,
    app: &str,
    replicas: i32,
    template: PodTemplateSpec,
) -> Deployment {
    Deployment {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        spec: Some(WorkloadSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(app)),
                ..LabelSelector::default()
            },
            template,
            ..WorkloadSpec::default()
        }),
        ..Deployment::default()
    }
}

pub fn daemon_set(name: &str, namespace: &str, app: &str, template: PodTemplateSpec) -> DaemonSet {
    DaemonSet {
        metadata: object_meta(name, Some(namespace), tier_labels(app)),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(app)),
                ..LabelSelector::default()
            },
            template,
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    }
}

/// Pod template annotations rolling the workload when mounted config changes
pub fn checksum_annotations(config: &[&Object]) -> BTreeMap<String, String> {
    let payload: Vec<serde_json::Value> = config
        .iter()
        .map(|object| {
            object
                .to_value()
                .get("data")
                .cloned()
                .unwrap_or(serde_json::Value::Null)
        })
        .collect();
    BTreeMap::from([(
        crate::constants::CONFIG_CHECKSUM_ANNOTATION.to_string(),
        canonical_digest(&payload),
    )])
}

/// How the gateway and server reach their database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub host: String,
    pub port: i32,
    pub user: String,
    pub password: SecretRef,
    pub audit_host: String,
}

impl DatabaseConnection {
    /// Connection for the entity `name`: the external database when set,
    /// otherwise the managed one
    pub fn resolve(
        name: &str,
        common: &CommonSpec,
        external_db: Option<&ExternalDbSpec>,
    ) -> Result<Self, ConfigError> {
        let password = common.database_secret.clone().unwrap_or_else(|| SecretRef {
            name: database_secret_name(name),
            key: DATABASE_SECRET_KEY.to_string(),
        });
        match external_db {
            Some(db) => {
                if db.password.is_none() && db.password_secret.is_none() {
                    return Err(ConfigError::ExternalDbPasswordMissing);
                }
                Ok(Self {
                    host: db.host.clone(),
                    port: db.port.unwrap_or(DATABASE_PORT),
                    user: db.username.clone().unwrap_or_else(|| "postgres".to_string()),
                    password: db.password_secret.clone().unwrap_or(password),
                    audit_host: db.host.clone(),
                })
            }
            None => {
                let host = format!("{name}-database");
                let audit_host = if common.split_db {
                    format!("{name}-audit-database")
                } else {
                    host.clone()
                };
                Ok(Self {
                    host,
                    port: DATABASE_PORT,
                    user: "postgres".to_string(),
                    password,
                    audit_host,
                })
            }
        }
    }

    pub fn env(&self) -> Vec<EnvVar> {
        vec![
            env("SCALOCK_DBHOST", self.host.clone()),
            env("SCALOCK_DBPORT", self.port.to_string()),
            env("SCALOCK_DBUSER", self.user.clone()),
            env("SCALOCK_DBNAME", "scalock"),
            secret_env("SCALOCK_DBPASSWORD", &self.password),
            env("SCALOCK_AUDIT_DBHOST", self.audit_host.clone()),
            env("SCALOCK_AUDIT_DBPORT", self.port.to_string()),
            env("SCALOCK_AUDIT_DBUSER", self.user.clone()),
            env("SCALOCK_AUDIT_DBNAME", "slk_audit"),
            secret_env("SCALOCK_AUDIT_DBPASSWORD", &self.password),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_version() {
        let common = CommonSpec::default();
        let infra = InfrastructureSpec {
            version: Some("1.0".to_string()),
            ..InfrastructureSpec::default()
        };
        assert_eq!(
            check_version(&infra, &common),
            Err(ConfigError::UnsupportedVersion {
                version: "1.0".to_string()
            })
        );
        let permissive = CommonSpec {
            allow_any_version: true,
            ..CommonSpec::default()
        };
        assert!(check_version(&infra, &permissive).is_ok());
    }

    #[test]
    fn test_active_active_needs_shared_database() {
        let common = CommonSpec {
            active_active: true,
            ..CommonSpec::default()
        };
        assert_eq!(
            check_active_active(&common, None),
            Err(ConfigError::ActiveActiveWithoutSharedDatabase)
        );
        let split = CommonSpec {
            split_db: true,
            ..common.clone()
        };
        assert!(check_active_active(&split, None).is_ok());
    }

    #[test]
    fn test_external_database_without_password_is_rejected() {
        let db = ExternalDbSpec {
            host: "db.example.com".to_string(),
            ..ExternalDbSpec::default()
        };
        assert_eq!(
            DatabaseConnection::resolve("aqua", &CommonSpec::default(), Some(&db)),
            Err(ConfigError::ExternalDbPasswordMissing)
        );
    }

    #[test]
    fn test_managed_database_connection() {
        let common = CommonSpec {
            split_db: true,
            ..CommonSpec::default()
        };
        let conn = DatabaseConnection::resolve("aqua", &common, None).unwrap();
        assert_eq!(conn.host, "aqua-database");
        assert_eq!(conn.audit_host, "aqua-audit-database");
        assert_eq!(conn.password.name, "aqua-database-password");
    }

    #[test]
    fn test_checksum_follows_config_data() {
        let a: Object = config_map(
            "c",
            "ns",
            "app",
            BTreeMap::from([("k".to_string(), "v1".to_string())]),
        )
        .into();
        let b: Object = config_map(
            "c",
            "ns",
            "app",
            BTreeMap::from([("k".to_string(), "v2".to_string())]),
        )
        .into();
        assert_ne!(checksum_annotations(&[&a]), checksum_annotations(&[&b]));
        assert_eq!(checksum_annotations(&[&a]), checksum_annotations(&[&a.clone()]));
    }
}
