//! # Memory Store
//!
//! In-process [`ObjectStore`] with the semantics the reconciler relies on:
//! resource versions with conflict detection, generation bumps on spec
//! changes, a status subresource, owner-reference cascade on delete and a
//! broadcast watch stream.
//!
//! Used by the test suites and for dry runs. It also records per-operation
//! call counts so tests can assert that a pass issued no writes.

use super::{ObjectStore, Selector, StoreError, WatchEvent};
use crate::constants::OWNER_UID_LABEL;
use crate::controller::object::{Object, ObjectKey, ObjectKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Number of calls made against a [`MemoryStore`], per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl CallCounts {
    /// Create, update and delete calls (status writes excluded)
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(ObjectKind, ObjectKey), Object>,
    resource_version: u64,
    calls: CallCounts,
}

impl Inner {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-memory object store
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<(ObjectKind, WatchEvent)>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the map consistent; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, kind: ObjectKind, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send((kind, event));
    }

    /// Calls made so far
    pub fn call_counts(&self) -> CallCounts {
        self.lock().calls
    }

    /// Reset the call counters
    pub fn reset_call_counts(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Snapshot of every stored object of `kind`
    pub fn objects_of(&self, kind: ObjectKind) -> Vec<Object> {
        self.lock()
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Total number of stored objects
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored object without touching the call counters
    pub fn peek(&self, kind: ObjectKind, key: &ObjectKey) -> Option<Object> {
        self.lock().objects.get(&(kind, key.clone())).cloned()
    }

    /// Report every Deployment and DaemonSet as fully rolled out
    ///
    /// Stands in for the cluster's workload controllers.
    pub fn mark_workloads_ready(&self) {
        let keys: Vec<_> = {
            let inner = self.lock();
            inner
                .objects
                .keys()
                .filter(|(kind, _)| matches!(kind, ObjectKind::Deployment | ObjectKind::DaemonSet))
                .cloned()
                .collect()
        };
        for (kind, key) in keys {
            self.set_workload_ready(kind, &key, true);
        }
    }

    /// Set the rollout status of one workload
    ///
    /// When `ready` is false the workload reports zero ready replicas.
    pub fn set_workload_ready(&self, kind: ObjectKind, key: &ObjectKey, ready: bool) {
        let mut inner = self.lock();
        let resource_version = inner.next_resource_version();
        let Some(object) = inner.objects.get_mut(&(kind, key.clone())) else {
            return;
        };
        let generation = object.meta().generation;
        match object {
            Object::Deployment(deployment) => {
                let desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|s| s.replicas)
                    .unwrap_or(1);
                let ready_count = if ready { desired } else { 0 };
                deployment.status = Some(DeploymentStatus {
                    observed_generation: generation,
                    replicas: Some(desired),
                    ready_replicas: Some(ready_count),
                    updated_replicas: Some(ready_count),
                    available_replicas: Some(ready_count),
                    ..DeploymentStatus::default()
                });
            }
            Object::DaemonSet(daemon_set) => {
                let ready_count = if ready { 1 } else { 0 };
                daemon_set.status = Some(DaemonSetStatus {
                    observed_generation: generation,
                    desired_number_scheduled: 1,
                    current_number_scheduled: 1,
                    number_ready: ready_count,
                    updated_number_scheduled: Some(ready_count),
                    number_available: Some(ready_count),
                    number_misscheduled: 0,
                    ..DaemonSetStatus::default()
                });
            }
            _ => return,
        }
        object.meta_mut().resource_version = Some(resource_version);
        let event = WatchEvent::Applied(object.clone());
        drop(inner);
        self.publish(kind, event);
    }

    /// Insert a running pod with the given labels
    pub fn insert_pod(&self, namespace: &str, name: &str, labels: BTreeMap<String, String>) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..PodStatus::default()
            }),
        };
        let mut inner = self.lock();
        let mut object = Object::from(pod);
        let resource_version = inner.next_resource_version();
        let meta = object.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(resource_version);
        inner.objects.insert((ObjectKind::Pod, object.key()), object);
    }

    /// Uids of `root` and everything it transitively owns
    fn collect_cascade(inner: &Inner, root: &Object) -> Vec<(ObjectKind, ObjectKey)> {
        let mut doomed = vec![(root.kind(), root.key())];
        let mut owners: BTreeSet<String> = root.meta().uid.iter().cloned().collect();
        loop {
            let mut found_new = false;
            for ((kind, key), object) in &inner.objects {
                if doomed.iter().any(|(k, n)| k == kind && n == key) {
                    continue;
                }
                if is_owned_by_any(object.meta(), &owners) {
                    doomed.push((*kind, key.clone()));
                    if let Some(uid) = &object.meta().uid {
                        owners.insert(uid.clone());
                    }
                    found_new = true;
                }
            }
            if !found_new {
                return doomed;
            }
        }
    }
}

/// Whether `meta` points back at any of `owners`, by owner reference or owner label
fn is_owned_by_any(meta: &ObjectMeta, owners: &BTreeSet<String>) -> bool {
    let by_reference = meta
        .owner_references
        .iter()
        .flatten()
        .any(|r| owners.contains(&r.uid));
    let by_label = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(OWNER_UID_LABEL))
        .is_some_and(|uid| owners.contains(uid));
    by_reference || by_label
}

fn validate_key(object: &Object) -> Result<(), StoreError> {
    let kind = object.kind();
    let meta = object.meta();
    if !kind.is_cluster_scoped() && meta.namespace.is_none() {
        return Err(StoreError::MissingNamespace {
            kind,
            name: meta.name.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> Result<Object, StoreError> {
        let mut inner = self.lock();
        inner.calls.gets += 1;
        inner
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })
    }

    async fn create(&self, mut object: Object) -> Result<Object, StoreError> {
        validate_key(&object)?;
        let kind = object.kind();
        let key = object.key();
        let mut inner = self.lock();
        inner.calls.creates += 1;
        if inner.objects.contains_key(&(kind, key.clone())) {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        let resource_version = inner.next_resource_version();
        let meta = object.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(resource_version);
        meta.generation = Some(1);
        inner.objects.insert((kind, key), object.clone());
        drop(inner);
        self.publish(kind, WatchEvent::Applied(object.clone()));
        Ok(object)
    }

    async fn update(&self, mut object: Object) -> Result<Object, StoreError> {
        validate_key(&object)?;
        let kind = object.kind();
        let key = object.key();
        let mut inner = self.lock();
        inner.calls.updates += 1;
        let Some(found) = inner.objects.get(&(kind, key.clone())).cloned() else {
            return Err(StoreError::NotFound { kind, key });
        };
        if let Some(requested) = &object.meta().resource_version {
            if found.meta().resource_version.as_ref() != Some(requested) {
                return Err(StoreError::Conflict { kind, key });
            }
        }
        let generation = found.meta().generation.unwrap_or(1);
        let spec_changed = found.spec_value() != object.spec_value();
        let resource_version = inner.next_resource_version();

        object.carry_status(&found);
        let meta = object.meta_mut();
        meta.uid = found.meta().uid.clone();
        meta.creation_timestamp = found.meta().creation_timestamp.clone();
        meta.resource_version = Some(resource_version);
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });

        inner.objects.insert((kind, key), object.clone());
        drop(inner);
        self.publish(kind, WatchEvent::Applied(object.clone()));
        Ok(object)
    }

    async fn update_status(&self, object: Object) -> Result<Object, StoreError> {
        let kind = object.kind();
        let key = object.key();
        let mut inner = self.lock();
        inner.calls.status_updates += 1;
        let resource_version = inner.next_resource_version();
        let Some(stored) = inner.objects.get_mut(&(kind, key.clone())) else {
            return Err(StoreError::NotFound { kind, key });
        };
        stored.carry_status(&object);
        stored.meta_mut().resource_version = Some(resource_version);
        let updated = stored.clone();
        drop(inner);
        self.publish(kind, WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.deletes += 1;
        let Some(root) = inner.objects.get(&(kind, key.clone())).cloned() else {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        };
        let doomed = Self::collect_cascade(&inner, &root);
        let removed: Vec<_> = doomed
            .into_iter()
            .filter_map(|entry| inner.objects.remove(&entry))
            .collect();
        drop(inner);
        for object in removed {
            self.publish(object.kind(), WatchEvent::Deleted(object));
        }
        Ok(())
    }

    async fn list(&self, kind: ObjectKind, selector: &Selector) -> Result<Vec<Object>, StoreError> {
        let mut inner = self.lock();
        inner.calls.lists += 1;
        Ok(inner
            .objects
            .iter()
            .filter(|((k, _), o)| *k == kind && selector.matches(o.meta()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    fn watch(&self, kind: ObjectKind) -> BoxStream<'static, Result<WatchEvent, StoreError>> {
        let receiver = self.events.subscribe();
        futures::stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((event_kind, event)) if event_kind == kind => {
                        return Some((Ok(event), receiver));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        return Some((
                            Err(StoreError::Watch(format!("watcher lagged by {skipped} events"))),
                            receiver,
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn config_map(name: &str, value: &str) -> Object {
        Object::from(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("aqua".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..ConfigMap::default()
        })
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let created = store.create(config_map("cfg", "a")).await.unwrap();
        assert!(created.meta().uid.is_some());
        assert_eq!(created.meta().generation, Some(1));
        assert!(matches!(
            store.create(config_map("cfg", "a")).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(config_map("cfg", "a")).await.unwrap();

        let mut first = config_map("cfg", "b");
        first.meta_mut().resource_version = created.meta().resource_version.clone();
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.meta().generation, Some(2));

        let mut stale = config_map("cfg", "c");
        stale.meta_mut().resource_version = created.meta().resource_version.clone();
        let err = store.update(stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_cascades_through_owner_references() {
        let store = MemoryStore::new();
        let parent = store.create(config_map("parent", "a")).await.unwrap();
        let parent_uid = parent.meta().uid.clone().unwrap();

        let mut child = config_map("child", "b");
        child.meta_mut().owner_references = Some(vec![OwnerReference {
            uid: parent_uid,
            name: "parent".to_string(),
            kind: "ConfigMap".to_string(),
            api_version: "v1".to_string(),
            controller: Some(true),
            ..OwnerReference::default()
        }]);
        let child = store.create(child).await.unwrap();
        let child_uid = child.meta().uid.clone().unwrap();

        let mut grandchild = config_map("grandchild", "c");
        grandchild.meta_mut().labels =
            Some(BTreeMap::from([(OWNER_UID_LABEL.to_string(), child_uid)]));
        store.create(grandchild).await.unwrap();
        store.create(config_map("unrelated", "d")).await.unwrap();

        store
            .delete(ObjectKind::ConfigMap, &ObjectKey::namespaced("aqua", "parent"))
            .await
            .unwrap();

        let remaining = store.objects_of(ObjectKind::ConfigMap);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name(), "unrelated");
    }

    #[tokio::test]
    async fn test_update_preserves_status() {
        let store = MemoryStore::new();
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("aqua".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..DeploymentSpec::default()
            }),
            status: None,
        };
        store.create(Object::from(deployment.clone())).await.unwrap();
        store.mark_workloads_ready();

        let key = ObjectKey::namespaced("aqua", "web");
        let updated = store.update(Object::from(deployment)).await.unwrap();
        let Object::Deployment(updated) = updated else {
            panic!("expected a deployment");
        };
        assert_eq!(updated.status.unwrap().ready_replicas, Some(2));
        assert_eq!(store.peek(ObjectKind::Deployment, &key).unwrap().meta().generation, Some(1));
    }

    #[tokio::test]
    async fn test_watch_filters_by_kind() {
        let store = MemoryStore::new();
        let mut events = store.watch(ObjectKind::ConfigMap);
        store
            .create(Object::from(Pod {
                metadata: ObjectMeta {
                    name: Some("pod".to_string()),
                    namespace: Some("aqua".to_string()),
                    ..ObjectMeta::default()
                },
                ..Pod::default()
            }))
            .await
            .unwrap();
        store.create(config_map("cfg", "a")).await.unwrap();

        let event = events.next().await.unwrap().unwrap();
        assert!(matches!(event, WatchEvent::Applied(Object::ConfigMap(_))));
    }
}
