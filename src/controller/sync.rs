//! # Resource Synchronizer
//!
//! `synchronize` makes one owned child match its desired form with at most one
//! create-or-update call:
//!
//! - absent: adopt (owner reference and owner labels), create, `Created`
//! - present without drift: no write, `Unchanged`
//! - present with drift and a closed approval gate: no write, `Held`
//! - present with drift: merge the desired fields over the live object
//!   (keeping its `resourceVersion`), update, `Updated`
//!
//! The synchronizer takes no locks. A stale `resourceVersion` surfaces as a
//! [`StoreError::Conflict`] and the pass is retried.

use crate::constants::{API_GROUP, API_VERSION, OWNER_KIND_LABEL, OWNER_NAME_LABEL, OWNER_UID_LABEL};
use crate::controller::drift;
use crate::controller::graph::EntityKind;
use crate::controller::object::Object;
use crate::controller::owned::OwnedEntries;
use crate::controller::store::{ObjectStore, StoreError};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// The entity a child belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub kind: EntityKind,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl Owner {
    pub fn new(kind: EntityKind, meta: &ObjectMeta) -> Self {
        Self {
            kind,
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
        }
    }

    /// Controller owner reference pointing at this entity
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{API_GROUP}/{API_VERSION}"),
            kind: self.kind.as_str().to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Back-reference labels carried by every child
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_UID_LABEL.to_string(), self.uid.clone()),
            (OWNER_KIND_LABEL.to_string(), self.kind.as_str().to_string()),
            (
                OWNER_NAME_LABEL.to_string(),
                format!("{}.{}", self.namespace, self.name),
            ),
        ])
    }

    /// Tie `object` to this entity
    ///
    /// Namespaced children get exactly one controller owner reference so the
    /// garbage collector cascades deletes. Cluster-scoped children cannot hold
    /// a namespaced owner reference and carry the owner labels only.
    pub fn adopt(&self, object: &mut Object) {
        let cluster_scoped = object.kind().is_cluster_scoped();
        let meta = object.meta_mut();
        meta.labels.get_or_insert_with(BTreeMap::new).extend(self.labels());
        if !cluster_scoped {
            meta.owner_references = Some(vec![self.owner_reference()]);
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Update policy for one child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateGate {
    /// Drift is always corrected
    #[default]
    Open,
    /// Drift is corrected only when approval is unset or granted
    Approval(Option<bool>),
    /// Created when absent, never updated (e.g. generated credentials)
    CreateOnly,
}

impl UpdateGate {
    fn holds(self) -> bool {
        matches!(self, UpdateGate::Approval(Some(false)))
    }
}

/// What a synchronization did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    /// Drift found but the approval gate is closed
    Held,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Held => "held",
        }
    }

    pub fn wrote(self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

/// Outcome plus the live object after synchronization
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub outcome: SyncOutcome,
    pub live: Object,
}

/// Ensure the live child matches `desired`
pub async fn synchronize(
    store: &dyn ObjectStore,
    owner: &Owner,
    mut desired: Object,
    gate: UpdateGate,
) -> Result<SyncResult, StoreError> {
    owner.adopt(&mut desired);
    OwnedEntries::stamp(&mut desired);
    let kind = desired.kind();
    let key = desired.key();

    let found = match store.get(kind, &key).await {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            let live = store.create(desired).await?;
            info!(owner = %owner, child = %live.display_name(), "Created child");
            return Ok(SyncResult {
                outcome: SyncOutcome::Created,
                live,
            });
        }
        Err(e) => return Err(e),
    };

    if gate == UpdateGate::CreateOnly {
        return Ok(SyncResult {
            outcome: SyncOutcome::Unchanged,
            live: found,
        });
    }

    let drifted = drift::drifted_fields(&found, &desired);
    if drifted.is_empty() {
        return Ok(SyncResult {
            outcome: SyncOutcome::Unchanged,
            live: found,
        });
    }

    if gate.holds() {
        info!(
            owner = %owner,
            child = %found.display_name(),
            fields = ?drifted,
            "Drift detected, update awaiting approval"
        );
        return Ok(SyncResult {
            outcome: SyncOutcome::Held,
            live: found,
        });
    }

    debug!(owner = %owner, child = %found.display_name(), fields = ?drifted, "Drift detected");
    let merged = merge_for_update(&found, desired);
    let live = store.update(merged).await?;
    info!(owner = %owner, child = %live.display_name(), fields = ?drifted, "Updated child");
    Ok(SyncResult {
        outcome: SyncOutcome::Updated,
        live,
    })
}

/// Lay the operator-owned fields of `desired` over `found`
///
/// Keeps the live identity (`resourceVersion`, uid, creation timestamp),
/// labels and annotations added by others, server-assigned service addresses,
/// and the status subresource. Workload env vars, mounts and volumes absent
/// from `desired` are kept only when the live owned-entries record does not
/// list them.
pub fn merge_for_update(found: &Object, mut desired: Object) -> Object {
    let found_meta = found.meta().clone();
    let owned = OwnedEntries::recorded(&found_meta);
    {
        let meta = desired.meta_mut();
        let labels = union(found_meta.labels.clone(), meta.labels.take());
        let annotations = union(found_meta.annotations.clone(), meta.annotations.take());
        let owner_references = meta
            .owner_references
            .take()
            .or(found_meta.owner_references.clone());
        *meta = ObjectMeta {
            labels,
            annotations,
            owner_references,
            ..found_meta
        };
    }

    match (&mut desired, found) {
        (Object::Service(d), Object::Service(f)) => {
            if let (Some(ds), Some(fs)) = (d.spec.as_mut(), f.spec.as_ref()) {
                ds.cluster_ip = fs.cluster_ip.clone();
                ds.cluster_ips = fs.cluster_ips.clone();
                for port in ds.ports.iter_mut().flatten() {
                    if port.node_port.is_none() {
                        port.node_port = fs
                            .ports
                            .iter()
                            .flatten()
                            .find(|p| p.name == port.name && p.port == port.port)
                            .and_then(|p| p.node_port);
                    }
                }
            }
        }
        (Object::Deployment(d), Object::Deployment(f)) => {
            if let (Some(ds), Some(fs)) = (d.spec.as_mut(), f.spec.as_ref()) {
                keep_template_extras(&mut ds.template, &fs.template, &owned);
            }
        }
        (Object::DaemonSet(d), Object::DaemonSet(f)) => {
            if let (Some(ds), Some(fs)) = (d.spec.as_mut(), f.spec.as_ref()) {
                keep_template_extras(&mut ds.template, &fs.template, &owned);
            }
        }
        _ => {}
    }

    desired.carry_status(found);
    desired
}

fn union(
    base: Option<BTreeMap<String, String>>,
    overlay: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (base, overlay) {
        (None, None) => None,
        (base, overlay) => {
            let mut merged = base.unwrap_or_default();
            merged.extend(overlay.unwrap_or_default());
            Some(merged)
        }
    }
}

fn keep_template_extras(
    desired: &mut PodTemplateSpec,
    found: &PodTemplateSpec,
    owned: &OwnedEntries,
) {
    let (Some(ds), Some(fs)) = (desired.spec.as_mut(), found.spec.as_ref()) else {
        return;
    };
    keep_volume_extras(ds, fs, owned);
    for container in ds.containers.iter_mut() {
        if let Some(live) = fs.containers.iter().find(|c| c.name == container.name) {
            keep_container_extras(container, live, owned);
        }
    }
}

fn keep_volume_extras(desired: &mut PodSpec, found: &PodSpec, owned: &OwnedEntries) {
    let extras: Vec<_> = found
        .volumes
        .iter()
        .flatten()
        .filter(|fv| !owned.owns_volume(&fv.name))
        .filter(|fv| !desired.volumes.iter().flatten().any(|dv| dv.name == fv.name))
        .cloned()
        .collect();
    if !extras.is_empty() {
        desired.volumes.get_or_insert_with(Vec::new).extend(extras);
    }
}

fn keep_container_extras(desired: &mut Container, found: &Container, owned: &OwnedEntries) {
    let extra_env: Vec<_> = found
        .env
        .iter()
        .flatten()
        .filter(|fe| !owned.owns_env(&found.name, &fe.name))
        .filter(|fe| !desired.env.iter().flatten().any(|de| de.name == fe.name))
        .cloned()
        .collect();
    if !extra_env.is_empty() {
        desired.env.get_or_insert_with(Vec::new).extend(extra_env);
    }

    let extra_mounts: Vec<_> = found
        .volume_mounts
        .iter()
        .flatten()
        .filter(|fm| !owned.owns_mount(&found.name, &fm.mount_path))
        .filter(|fm| {
            !desired
                .volume_mounts
                .iter()
                .flatten()
                .any(|dm| dm.mount_path == fm.mount_path)
        })
        .cloned()
        .collect();
    if !extra_mounts.is_empty() {
        desired
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(extra_mounts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::object::{ObjectKey, ObjectKind};
    use crate::controller::store::{MemoryStore, MockObjectStore};
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, EnvVar};
    use k8s_openapi::api::rbac::v1::ClusterRole;

    fn owner() -> Owner {
        Owner {
            kind: EntityKind::Gateway,
            name: "aqua".to_string(),
            namespace: "aqua".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    fn config_map(value: &str) -> Object {
        Object::from(ConfigMap {
            metadata: ObjectMeta {
                name: Some("aqua-gateway-config".to_string()),
                namespace: Some("aqua".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("mode".to_string(), value.to_string())])),
            ..ConfigMap::default()
        })
    }

    fn gateway_deployment(image: &str) -> Object {
        Object::from(Deployment {
            metadata: ObjectMeta {
                name: Some("aqua-gateway".to_string()),
                namespace: Some("aqua".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "gateway".to_string(),
                            image: Some(image.to_string()),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            status: None,
        })
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let store = MemoryStore::new();
        let first = synchronize(&store, &owner(), config_map("a"), UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(first.outcome, SyncOutcome::Created);
        let refs = first.live.meta().owner_references.clone().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));

        store.reset_call_counts();
        let second = synchronize(&store, &owner(), config_map("a"), UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(second.outcome, SyncOutcome::Unchanged);
        assert_eq!(store.call_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_drift_is_updated_in_place() {
        let store = MemoryStore::new();
        synchronize(&store, &owner(), config_map("a"), UpdateGate::Open)
            .await
            .unwrap();
        let result = synchronize(&store, &owner(), config_map("b"), UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Updated);
        let Object::ConfigMap(live) = result.live else {
            panic!("expected a config map");
        };
        assert_eq!(live.data.unwrap()["mode"], "b");
    }

    #[tokio::test]
    async fn test_closed_gate_holds_drift() {
        let store = MemoryStore::new();
        synchronize(&store, &owner(), gateway_deployment("gateway:6.5"), UpdateGate::Open)
            .await
            .unwrap();

        let held = synchronize(
            &store,
            &owner(),
            gateway_deployment("gateway:2022.4"),
            UpdateGate::Approval(Some(false)),
        )
        .await
        .unwrap();
        assert_eq!(held.outcome, SyncOutcome::Held);
        let key = ObjectKey::namespaced("aqua", "aqua-gateway");
        let Some(Object::Deployment(live)) = store.peek(ObjectKind::Deployment, &key) else {
            panic!("deployment missing");
        };
        let image = live.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("gateway:6.5"));

        let applied = synchronize(
            &store,
            &owner(),
            gateway_deployment("gateway:2022.4"),
            UpdateGate::Approval(Some(true)),
        )
        .await
        .unwrap();
        assert_eq!(applied.outcome, SyncOutcome::Updated);
    }

    #[tokio::test]
    async fn test_create_only_never_updates() {
        let store = MemoryStore::new();
        synchronize(&store, &owner(), config_map("generated"), UpdateGate::CreateOnly)
            .await
            .unwrap();
        let result = synchronize(&store, &owner(), config_map("regenerated"), UpdateGate::CreateOnly)
            .await
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_unchanged_issues_no_update_call() {
        let mut desired = config_map("a");
        owner().adopt(&mut desired);
        let live = desired.clone();

        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .times(1)
            .returning(move |_, _| Ok(live.clone()));
        store.expect_update().never();
        store.expect_create().never();

        let result = synchronize(&store, &owner(), config_map("a"), UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_store_errors_are_propagated() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|kind, key| {
            Err(StoreError::Conflict {
                kind,
                key: key.clone(),
            })
        });
        let err = synchronize(&store, &owner(), config_map("a"), UpdateGate::Open)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_cluster_scoped_child_gets_labels_only() {
        let mut role = Object::from(ClusterRole {
            metadata: ObjectMeta {
                name: Some("aqua-aqua-kube-enforcer".to_string()),
                ..ObjectMeta::default()
            },
            ..ClusterRole::default()
        });
        owner().adopt(&mut role);
        assert!(role.meta().owner_references.is_none());
        assert_eq!(role.meta().labels.as_ref().unwrap()[OWNER_UID_LABEL], "uid-1");
    }

    #[test]
    fn test_merge_keeps_user_env_and_resource_version() {
        let mut found = gateway_deployment("gateway:6.5");
        found.meta_mut().resource_version = Some("42".to_string());
        if let Object::Deployment(d) = &mut found {
            d.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
                Some(vec![EnvVar {
                    name: "HTTP_PROXY".to_string(),
                    value: Some("http://proxy".to_string()),
                    value_from: None,
                }]);
        }

        let merged = merge_for_update(&found, gateway_deployment("gateway:2022.4"));
        assert_eq!(merged.meta().resource_version.as_deref(), Some("42"));
        let Object::Deployment(merged) = merged else {
            panic!("expected a deployment");
        };
        let container = &merged.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("gateway:2022.4"));
        assert_eq!(container.env.as_ref().unwrap()[0].name, "HTTP_PROXY");
    }

    fn with_env(mut object: Object, names: &[&str]) -> Object {
        if let Object::Deployment(d) = &mut object {
            d.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env = Some(
                names
                    .iter()
                    .map(|name| EnvVar {
                        name: (*name).to_string(),
                        value: Some("1".to_string()),
                        value_from: None,
                    })
                    .collect(),
            );
        }
        object
    }

    fn env_names(object: &Object) -> Vec<String> {
        let Object::Deployment(d) = object else {
            panic!("expected a deployment");
        };
        d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .iter()
            .flatten()
            .map(|e| e.name.clone())
            .collect()
    }

    #[test]
    fn test_merge_drops_env_the_operator_no_longer_wants() {
        let mut found = with_env(gateway_deployment("gateway:2022.4"), &["AQUA_ROOT_CA"]);
        OwnedEntries::stamp(&mut found);
        let found = with_env(found, &["AQUA_ROOT_CA", "HTTP_PROXY"]);

        let merged = merge_for_update(&found, gateway_deployment("gateway:2022.4"));
        assert_eq!(env_names(&merged), vec!["HTTP_PROXY"]);
    }

    #[tokio::test]
    async fn test_dropped_env_is_removed_from_live_workload() {
        let store = MemoryStore::new();
        let desired = with_env(
            gateway_deployment("gateway:2022.4"),
            &["AQUA_ROOT_CA", "AQUA_VERIFY_ENFORCER"],
        );
        synchronize(&store, &owner(), desired, UpdateGate::Open)
            .await
            .unwrap();

        let wanted = gateway_deployment("gateway:2022.4");
        let result = synchronize(&store, &owner(), wanted.clone(), UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(result.outcome, SyncOutcome::Updated);
        assert!(env_names(&result.live).is_empty());

        let again = synchronize(&store, &owner(), wanted, UpdateGate::Open)
            .await
            .unwrap();
        assert_eq!(again.outcome, SyncOutcome::Unchanged);
    }
}
