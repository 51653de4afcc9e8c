//! # Kubernetes Store
//!
//! [`ObjectStore`] backed by the Kubernetes API through one typed `Api` per kind.
//! Updates use `replace`, so the `resourceVersion` carried by the object makes
//! every write optimistic. Status writes are merge patches on the status
//! subresource.

use super::{ObjectStore, Selector, StoreError, WatchEvent};
use crate::constants::FIELD_MANAGER;
use crate::controller::object::{Object, ObjectKey, ObjectKind};
use crate::crd::{
    AquaCsp, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer, AquaServer, AquaStarboard,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use kube_runtime::watcher;
use serde_json::json;

/// Object store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn namespaced_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn cluster_api<K>(client: &Client, _namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    Api::all(client.clone())
}

/// Expand `$body` once per kind with `$K` bound to the typed resource and
/// `$api` to its `Api`
macro_rules! for_kind {
    ($kind:expr, $client:expr, $ns:expr, |$K:ident, $api:ident| $body:expr) => {
        match $kind {
            ObjectKind::ServiceAccount => for_kind!(@arm namespaced_api, ServiceAccount, $client, $ns, $K, $api, $body),
            ObjectKind::Secret => for_kind!(@arm namespaced_api, Secret, $client, $ns, $K, $api, $body),
            ObjectKind::ConfigMap => for_kind!(@arm namespaced_api, ConfigMap, $client, $ns, $K, $api, $body),
            ObjectKind::PersistentVolumeClaim => for_kind!(@arm namespaced_api, PersistentVolumeClaim, $client, $ns, $K, $api, $body),
            ObjectKind::Service => for_kind!(@arm namespaced_api, Service, $client, $ns, $K, $api, $body),
            ObjectKind::Role => for_kind!(@arm namespaced_api, Role, $client, $ns, $K, $api, $body),
            ObjectKind::RoleBinding => for_kind!(@arm namespaced_api, RoleBinding, $client, $ns, $K, $api, $body),
            ObjectKind::ClusterRole => for_kind!(@arm cluster_api, ClusterRole, $client, $ns, $K, $api, $body),
            ObjectKind::ClusterRoleBinding => for_kind!(@arm cluster_api, ClusterRoleBinding, $client, $ns, $K, $api, $body),
            ObjectKind::ValidatingWebhookConfiguration => for_kind!(@arm cluster_api, ValidatingWebhookConfiguration, $client, $ns, $K, $api, $body),
            ObjectKind::MutatingWebhookConfiguration => for_kind!(@arm cluster_api, MutatingWebhookConfiguration, $client, $ns, $K, $api, $body),
            ObjectKind::Deployment => for_kind!(@arm namespaced_api, Deployment, $client, $ns, $K, $api, $body),
            ObjectKind::DaemonSet => for_kind!(@arm namespaced_api, DaemonSet, $client, $ns, $K, $api, $body),
            ObjectKind::Pod => for_kind!(@arm namespaced_api, Pod, $client, $ns, $K, $api, $body),
            ObjectKind::AquaCsp => for_kind!(@arm namespaced_api, AquaCsp, $client, $ns, $K, $api, $body),
            ObjectKind::AquaDatabase => for_kind!(@arm namespaced_api, AquaDatabase, $client, $ns, $K, $api, $body),
            ObjectKind::AquaGateway => for_kind!(@arm namespaced_api, AquaGateway, $client, $ns, $K, $api, $body),
            ObjectKind::AquaServer => for_kind!(@arm namespaced_api, AquaServer, $client, $ns, $K, $api, $body),
            ObjectKind::AquaEnforcer => for_kind!(@arm namespaced_api, AquaEnforcer, $client, $ns, $K, $api, $body),
            ObjectKind::AquaKubeEnforcer => for_kind!(@arm namespaced_api, AquaKubeEnforcer, $client, $ns, $K, $api, $body),
            ObjectKind::AquaStarboard => for_kind!(@arm namespaced_api, AquaStarboard, $client, $ns, $K, $api, $body),
        }
    };
    (@arm $scope:ident, $ty:ty, $client:expr, $ns:expr, $K:ident, $api:ident, $body:expr) => {{
        #[allow(dead_code)]
        type $K = $ty;
        let $api: Api<$ty> = $scope(&$client, $ns);
        $body
    }};
}

fn require_namespace(kind: ObjectKind, key: &ObjectKey) -> Result<(), StoreError> {
    if !kind.is_cluster_scoped() && key.namespace.is_none() {
        return Err(StoreError::MissingNamespace {
            kind,
            name: key.name.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> Result<Object, StoreError> {
        require_namespace(kind, key)?;
        let ns = key.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            api.get(&key.name)
                .await
                .map(Object::from)
                .map_err(|e| StoreError::from_kube(e, kind, key))
        })
    }

    async fn create(&self, object: Object) -> Result<Object, StoreError> {
        let kind = object.kind();
        let key = object.key();
        require_namespace(kind, &key)?;
        let ns = key.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            let typed = K::try_from(object).map_err(|o| StoreError::KindMismatch {
                expected: kind,
                found: o.kind(),
            })?;
            api.create(&PostParams::default(), &typed)
                .await
                .map(Object::from)
                .map_err(|e| StoreError::from_kube(e, kind, &key))
        })
    }

    async fn update(&self, object: Object) -> Result<Object, StoreError> {
        let kind = object.kind();
        let key = object.key();
        require_namespace(kind, &key)?;
        let ns = key.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            let typed = K::try_from(object).map_err(|o| StoreError::KindMismatch {
                expected: kind,
                found: o.kind(),
            })?;
            api.replace(&key.name, &PostParams::default(), &typed)
                .await
                .map(Object::from)
                .map_err(|e| StoreError::from_kube(e, kind, &key))
        })
    }

    async fn update_status(&self, object: Object) -> Result<Object, StoreError> {
        let kind = object.kind();
        let key = object.key();
        require_namespace(kind, &key)?;
        let status = object
            .to_value()
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = json!({ "status": status });
        let ns = key.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            api.patch_status(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map(Object::from)
            .map_err(|e| StoreError::from_kube(e, kind, &key))
        })
    }

    async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> Result<(), StoreError> {
        require_namespace(kind, key)?;
        let ns = key.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            api.delete(&key.name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(e, kind, key))
        })
    }

    async fn list(&self, kind: ObjectKind, selector: &Selector) -> Result<Vec<Object>, StoreError> {
        let params = if selector.labels.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector.label_selector())
        };
        let key = ObjectKey {
            namespace: selector.namespace.clone(),
            name: String::new(),
        };
        let ns = selector.namespace.as_deref();
        for_kind!(kind, self.client, ns, |K, api| {
            api.list(&params)
                .await
                .map(|list| list.items.into_iter().map(Object::from).collect())
                .map_err(|e| StoreError::from_kube(e, kind, &key))
        })
    }

    fn watch(&self, kind: ObjectKind) -> BoxStream<'static, Result<WatchEvent, StoreError>> {
        for_kind!(kind, self.client, None, |K, api| {
            watcher(api, watcher::Config::default().any_semantic())
                .filter_map(|event| async move {
                    match event {
                        Ok(watcher::Event::Apply(o)) | Ok(watcher::Event::InitApply(o)) => {
                            Some(Ok(WatchEvent::Applied(Object::from(o))))
                        }
                        Ok(watcher::Event::Delete(o)) => {
                            Some(Ok(WatchEvent::Deleted(Object::from(o))))
                        }
                        Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                        Err(e) => Some(Err(StoreError::Watch(e.to_string()))),
                    }
                })
                .boxed()
        })
    }
}
