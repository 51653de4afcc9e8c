//! # Cluster-Scoped Cascade
//!
//! Namespaced children are deleted by the Kubernetes garbage collector through
//! their owner references. Cluster-scoped children (cluster roles, bindings,
//! webhook configurations) cannot reference a namespaced owner, so they carry
//! the owner uid label instead and are released here when the owning entity
//! is finalized.

use crate::constants::OWNER_UID_LABEL;
use crate::controller::graph::EntityKind;
use crate::controller::object::ObjectKind;
use crate::controller::store::{ObjectStore, Selector, StoreError};
use tracing::info;

/// Whether entities of `kind` create cluster-scoped children
pub fn owns_cluster_scoped(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Csp | EntityKind::KubeEnforcer | EntityKind::Starboard
    )
}

/// Delete every cluster-scoped object labelled with `owner_uid`
///
/// Objects already gone are skipped. Returns the number deleted.
pub async fn release_cluster_scoped(
    store: &dyn ObjectStore,
    owner_uid: &str,
) -> Result<usize, StoreError> {
    let selector = Selector::default().with_label(OWNER_UID_LABEL, owner_uid);
    let mut released = 0;
    for kind in ObjectKind::cluster_scoped_kinds() {
        for object in store.list(kind, &selector).await? {
            match store.delete(kind, &object.key()).await {
                Ok(()) => {
                    info!(child = %object.display_name(), "Released cluster-scoped child");
                    released += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::object::{Object, ObjectKey};
    use crate::controller::store::MemoryStore;
    use k8s_openapi::api::rbac::v1::ClusterRole;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn cluster_role(name: &str, owner_uid: &str) -> Object {
        Object::from(ClusterRole {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    OWNER_UID_LABEL.to_string(),
                    owner_uid.to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..ClusterRole::default()
        })
    }

    #[tokio::test]
    async fn test_release_only_touches_owned_objects() {
        let store = MemoryStore::new();
        store.create(cluster_role("mine", "uid-1")).await.unwrap();
        store.create(cluster_role("theirs", "uid-2")).await.unwrap();

        let released = release_cluster_scoped(&store, "uid-1").await.unwrap();

        assert_eq!(released, 1);
        assert!(store
            .peek(ObjectKind::ClusterRole, &ObjectKey::cluster("mine"))
            .is_none());
        assert!(store
            .peek(ObjectKind::ClusterRole, &ObjectKey::cluster("theirs"))
            .is_some());
    }

    #[test]
    fn test_kinds_with_cluster_children() {
        assert!(owns_cluster_scoped(EntityKind::Csp));
        assert!(owns_cluster_scoped(EntityKind::KubeEnforcer));
        assert!(!owns_cluster_scoped(EntityKind::Gateway));
    }
}
