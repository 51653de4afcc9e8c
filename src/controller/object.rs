//! # Object Model
//!
//! A tagged variant over every resource kind the operator reads or writes.
//! The store, drift detector and synchronizer all dispatch on [`ObjectKind`]
//! instead of reflecting over untyped documents.

use crate::crd::{
    AquaCsp, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer, AquaServer, AquaStarboard,
    EntityStatus,
};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::fmt;

/// Namespaced name of an object (`namespace` is `None` for cluster-scoped kinds)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

macro_rules! object_kinds {
    ($($variant:ident => $ty:ty, cluster_scoped = $cluster:expr;)*) => {
        /// Every resource kind handled by the operator
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum ObjectKind {
            $($variant,)*
        }

        /// A typed object of any handled kind
        #[derive(Debug, Clone, PartialEq)]
        pub enum Object {
            $($variant($ty),)*
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$variant,)*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => stringify!($variant),)*
                }
            }

            pub fn is_cluster_scoped(self) -> bool {
                match self {
                    $(ObjectKind::$variant => $cluster,)*
                }
            }
        }

        impl Object {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Object::$variant(_) => ObjectKind::$variant,)*
                }
            }

            pub fn meta(&self) -> &ObjectMeta {
                match self {
                    $(Object::$variant(o) => o.meta(),)*
                }
            }

            pub fn meta_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(Object::$variant(o) => o.meta_mut(),)*
                }
            }

            /// Full JSON document of the object
            pub fn to_value(&self) -> serde_json::Value {
                let value = match self {
                    $(Object::$variant(o) => serde_json::to_value(o),)*
                };
                value.unwrap_or(serde_json::Value::Null)
            }
        }

        $(
            impl From<$ty> for Object {
                fn from(object: $ty) -> Self {
                    Object::$variant(object)
                }
            }

            impl TryFrom<Object> for $ty {
                type Error = Object;

                fn try_from(object: Object) -> Result<Self, Self::Error> {
                    match object {
                        Object::$variant(o) => Ok(o),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

object_kinds! {
    ServiceAccount => ServiceAccount, cluster_scoped = false;
    Secret => Secret, cluster_scoped = false;
    ConfigMap => ConfigMap, cluster_scoped = false;
    PersistentVolumeClaim => PersistentVolumeClaim, cluster_scoped = false;
    Service => Service, cluster_scoped = false;
    Role => Role, cluster_scoped = false;
    RoleBinding => RoleBinding, cluster_scoped = false;
    ClusterRole => ClusterRole, cluster_scoped = true;
    ClusterRoleBinding => ClusterRoleBinding, cluster_scoped = true;
    ValidatingWebhookConfiguration => ValidatingWebhookConfiguration, cluster_scoped = true;
    MutatingWebhookConfiguration => MutatingWebhookConfiguration, cluster_scoped = true;
    Deployment => Deployment, cluster_scoped = false;
    DaemonSet => DaemonSet, cluster_scoped = false;
    Pod => Pod, cluster_scoped = false;
    AquaCsp => AquaCsp, cluster_scoped = false;
    AquaDatabase => AquaDatabase, cluster_scoped = false;
    AquaGateway => AquaGateway, cluster_scoped = false;
    AquaServer => AquaServer, cluster_scoped = false;
    AquaEnforcer => AquaEnforcer, cluster_scoped = false;
    AquaKubeEnforcer => AquaKubeEnforcer, cluster_scoped = false;
    AquaStarboard => AquaStarboard, cluster_scoped = false;
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ObjectKind {
    /// Whether this kind is one of the operator's own entity kinds
    pub fn is_entity(self) -> bool {
        matches!(
            self,
            ObjectKind::AquaCsp
                | ObjectKind::AquaDatabase
                | ObjectKind::AquaGateway
                | ObjectKind::AquaServer
                | ObjectKind::AquaEnforcer
                | ObjectKind::AquaKubeEnforcer
                | ObjectKind::AquaStarboard
        )
    }

    /// Cluster-scoped kinds an entity may own
    pub fn cluster_scoped_kinds() -> impl Iterator<Item = ObjectKind> {
        ObjectKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.is_cluster_scoped())
    }
}

impl Object {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.meta())
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// `Kind/name` label used in logs and readiness summaries
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }

    /// The document without metadata and status (what generation tracks)
    pub fn spec_value(&self) -> serde_json::Value {
        let mut value = self.to_value();
        if let Some(map) = value.as_object_mut() {
            map.remove("metadata");
            map.remove("status");
            map.remove("apiVersion");
            map.remove("kind");
        }
        value
    }

    /// Status of an entity object
    pub fn entity_status(&self) -> Option<&EntityStatus> {
        match self {
            Object::AquaCsp(o) => o.status.as_ref(),
            Object::AquaDatabase(o) => o.status.as_ref(),
            Object::AquaGateway(o) => o.status.as_ref(),
            Object::AquaServer(o) => o.status.as_ref(),
            Object::AquaEnforcer(o) => o.status.as_ref(),
            Object::AquaKubeEnforcer(o) => o.status.as_ref(),
            Object::AquaStarboard(o) => o.status.as_ref(),
            _ => None,
        }
    }

    /// Copy the status subresource of `source` onto this object
    ///
    /// Kinds without a status subresource are left untouched.
    pub fn carry_status(&mut self, source: &Object) {
        match (self, source) {
            (Object::Deployment(o), Object::Deployment(s)) => o.status = s.status.clone(),
            (Object::DaemonSet(o), Object::DaemonSet(s)) => o.status = s.status.clone(),
            (Object::Service(o), Object::Service(s)) => o.status = s.status.clone(),
            (Object::PersistentVolumeClaim(o), Object::PersistentVolumeClaim(s)) => {
                o.status = s.status.clone()
            }
            (Object::Pod(o), Object::Pod(s)) => o.status = s.status.clone(),
            (Object::AquaCsp(o), Object::AquaCsp(s)) => o.status = s.status.clone(),
            (Object::AquaDatabase(o), Object::AquaDatabase(s)) => o.status = s.status.clone(),
            (Object::AquaGateway(o), Object::AquaGateway(s)) => o.status = s.status.clone(),
            (Object::AquaServer(o), Object::AquaServer(s)) => o.status = s.status.clone(),
            (Object::AquaEnforcer(o), Object::AquaEnforcer(s)) => o.status = s.status.clone(),
            (Object::AquaKubeEnforcer(o), Object::AquaKubeEnforcer(s)) => {
                o.status = s.status.clone()
            }
            (Object::AquaStarboard(o), Object::AquaStarboard(s)) => o.status = s.status.clone(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::namespaced("aqua", "aqua-db").to_string(), "aqua/aqua-db");
        assert_eq!(ObjectKey::cluster("aqua-role").to_string(), "aqua-role");
    }

    #[test]
    fn test_cluster_scoped_kinds() {
        let kinds: Vec<_> = ObjectKind::cluster_scoped_kinds().collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ClusterRole,
                ObjectKind::ClusterRoleBinding,
                ObjectKind::ValidatingWebhookConfiguration,
                ObjectKind::MutatingWebhookConfiguration,
            ]
        );
    }

    #[test]
    fn test_spec_value_strips_metadata_and_status() {
        let mut deployment = Deployment::default();
        deployment.metadata.name = Some("aqua-gateway".to_string());
        deployment.status = Some(Default::default());
        let object = Object::from(deployment);

        let value = object.spec_value();
        assert!(value.get("metadata").is_none());
        assert!(value.get("status").is_none());
        assert_eq!(object.display_name(), "Deployment/aqua-gateway");
    }

    #[test]
    fn test_try_from_wrong_kind_returns_object() {
        let object = Object::from(ConfigMap::default());
        let result = Secret::try_from(object);
        assert_eq!(result.unwrap_err().kind(), ObjectKind::ConfigMap);
    }
}
