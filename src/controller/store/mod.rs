//! # Object Store
//!
//! The boundary between the reconciliation engine and the cluster. Every
//! entity and owned child round-trips through [`ObjectStore`]; the engine
//! issues no other I/O.
//!
//! - `kube_store.rs` - Kubernetes API implementation
//! - `memory.rs` - In-process implementation for tests and dry runs

mod kube_store;
mod memory;

pub use self::kube_store::KubeStore;
pub use self::memory::{CallCounts, MemoryStore};

use crate::controller::object::{Object, ObjectKey, ObjectKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors returned by an [`ObjectStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ObjectKind, key: ObjectKey },
    #[error("conflict writing {kind} {key}: resource version is stale")]
    Conflict { kind: ObjectKind, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ObjectKind, key: ObjectKey },
    #[error("{kind} {name} requires a namespace")]
    MissingNamespace { kind: ObjectKind, name: String },
    #[error("expected a {expected} object, got {found}")]
    KindMismatch {
        expected: ObjectKind,
        found: ObjectKind,
    },
    #[error("watch stream failed: {0}")]
    Watch(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Kubernetes API error: {0}")]
    Api(#[source] ::kube::Error),
}

impl StoreError {
    /// Map a Kubernetes API error, classifying not-found and conflict responses
    pub fn from_kube(error: ::kube::Error, kind: ObjectKind, key: &ObjectKey) -> Self {
        match &error {
            ::kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                kind,
                key: key.clone(),
            },
            ::kube::Error::Api(response) if response.code == 409 => {
                if response.reason == "AlreadyExists" {
                    StoreError::AlreadyExists {
                        kind,
                        key: key.clone(),
                    }
                } else {
                    StoreError::Conflict {
                        kind,
                        key: key.clone(),
                    }
                }
            }
            _ => StoreError::Api(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Change notification delivered by [`ObjectStore::watch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Applied(Object),
    Deleted(Object),
}

/// Namespace and label filter for [`ObjectStore::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Restrict to one namespace (`None` lists across all namespaces)
    pub namespace: Option<String>,
    /// Equality-based label requirements
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Label selector string in Kubernetes syntax (`a=b,c=d`)
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if let Some(namespace) = &self.namespace {
            if meta.namespace.as_ref() != Some(namespace) {
                return false;
            }
        }
        let labels = meta.labels.as_ref();
        self.labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Remote object store
///
/// `update` is optimistic: an object whose `resourceVersion` is stale fails
/// with [`StoreError::Conflict`]. `update_status` writes only the status
/// subresource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> Result<Object, StoreError>;

    async fn create(&self, object: Object) -> Result<Object, StoreError>;

    async fn update(&self, object: Object) -> Result<Object, StoreError>;

    async fn update_status(&self, object: Object) -> Result<Object, StoreError>;

    async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> Result<(), StoreError>;

    async fn list(&self, kind: ObjectKind, selector: &Selector) -> Result<Vec<Object>, StoreError>;

    fn watch(&self, kind: ObjectKind) -> BoxStream<'static, Result<WatchEvent, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(namespace: &str, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn test_selector_matches_namespace_and_labels() {
        let selector = Selector::in_namespace("aqua").with_label("app", "aqua-gateway");
        assert!(selector.matches(&meta("aqua", &[("app", "aqua-gateway"), ("tier", "x")])));
        assert!(!selector.matches(&meta("other", &[("app", "aqua-gateway")])));
        assert!(!selector.matches(&meta("aqua", &[("app", "aqua-server")])));
    }

    #[test]
    fn test_label_selector_string_is_sorted() {
        let selector = Selector::default()
            .with_label("b", "2")
            .with_label("a", "1");
        assert_eq!(selector.label_selector(), "a=1,b=2");
    }
}
