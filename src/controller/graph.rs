//! # Dependency Graph
//!
//! Static ordering data consulted by the orchestrator:
//!
//! - [`DEPENDENCY_EDGES`]: which entity kinds must be `Running` before another
//!   kind is synthesized
//! - [`COMPOSITION`]: which entity kinds an entity synthesizes as sub-entities
//! - [`CHILD_SYNC_ORDER`]: the order owned child objects are synchronized in
//!
//! Everything here is fixed at compile time and checked acyclic by tests.

use crate::controller::object::ObjectKind;
use crate::crd::LifecycleState;
use std::fmt;

/// The operator's entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Csp,
    Database,
    Gateway,
    Server,
    Enforcer,
    KubeEnforcer,
    Starboard,
}

impl EntityKind {
    pub const ALL: &'static [EntityKind] = &[
        EntityKind::Csp,
        EntityKind::Database,
        EntityKind::Gateway,
        EntityKind::Server,
        EntityKind::Enforcer,
        EntityKind::KubeEnforcer,
        EntityKind::Starboard,
    ];

    /// Object kind of the entity's custom resource
    pub fn object_kind(self) -> ObjectKind {
        match self {
            EntityKind::Csp => ObjectKind::AquaCsp,
            EntityKind::Database => ObjectKind::AquaDatabase,
            EntityKind::Gateway => ObjectKind::AquaGateway,
            EntityKind::Server => ObjectKind::AquaServer,
            EntityKind::Enforcer => ObjectKind::AquaEnforcer,
            EntityKind::KubeEnforcer => ObjectKind::AquaKubeEnforcer,
            EntityKind::Starboard => ObjectKind::AquaStarboard,
        }
    }

    pub fn from_object_kind(kind: ObjectKind) -> Option<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.object_kind() == kind)
    }

    pub fn as_str(self) -> &'static str {
        self.object_kind().as_str()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(upstream, downstream)`: downstream is not synthesized until upstream is `Running`
pub const DEPENDENCY_EDGES: &[(EntityKind, EntityKind)] = &[
    (EntityKind::Database, EntityKind::Gateway),
    (EntityKind::Database, EntityKind::Server),
    (EntityKind::Gateway, EntityKind::Enforcer),
    (EntityKind::Server, EntityKind::Enforcer),
    (EntityKind::Gateway, EntityKind::KubeEnforcer),
    (EntityKind::Server, EntityKind::KubeEnforcer),
    (EntityKind::KubeEnforcer, EntityKind::Starboard),
];

/// `(parent, child)`: parent synthesizes child as a sub-entity of the same name
pub const COMPOSITION: &[(EntityKind, EntityKind)] = &[
    (EntityKind::Csp, EntityKind::Database),
    (EntityKind::Csp, EntityKind::Gateway),
    (EntityKind::Csp, EntityKind::Server),
    (EntityKind::Csp, EntityKind::Enforcer),
    (EntityKind::Csp, EntityKind::KubeEnforcer),
    (EntityKind::KubeEnforcer, EntityKind::Starboard),
];

/// Order in which owned child objects are synchronized within one pass
pub const CHILD_SYNC_ORDER: &[ObjectKind] = &[
    ObjectKind::ServiceAccount,
    ObjectKind::ClusterRole,
    ObjectKind::Role,
    ObjectKind::ClusterRoleBinding,
    ObjectKind::RoleBinding,
    ObjectKind::Secret,
    ObjectKind::ConfigMap,
    ObjectKind::PersistentVolumeClaim,
    ObjectKind::Service,
    ObjectKind::ValidatingWebhookConfiguration,
    ObjectKind::MutatingWebhookConfiguration,
    ObjectKind::Deployment,
    ObjectKind::DaemonSet,
];

/// Position of `kind` in [`CHILD_SYNC_ORDER`] (unknown kinds sort last)
pub fn sync_priority(kind: ObjectKind) -> usize {
    CHILD_SYNC_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(CHILD_SYNC_ORDER.len())
}

/// Kinds that must be `Running` before `kind` is synthesized
pub fn upstream_of(kind: EntityKind) -> Vec<EntityKind> {
    DEPENDENCY_EDGES
        .iter()
        .filter(|(_, down)| *down == kind)
        .map(|(up, _)| *up)
        .collect()
}

/// Kinds synthesized by `kind`
pub fn composed_by(kind: EntityKind) -> Vec<EntityKind> {
    COMPOSITION
        .iter()
        .filter(|(parent, _)| *parent == kind)
        .map(|(_, child)| *child)
        .collect()
}

/// Topological order of `kinds` under [`DEPENDENCY_EDGES`] (Kahn's algorithm)
///
/// Ties are broken by declaration order in [`EntityKind`], so the result is
/// deterministic. Returns `None` if the edges restricted to `kinds` contain a cycle.
pub fn topological_order(kinds: &[EntityKind]) -> Option<Vec<EntityKind>> {
    let mut remaining: Vec<EntityKind> = kinds.to_vec();
    remaining.sort();
    remaining.dedup();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|candidate| {
            upstream_of(*candidate)
                .iter()
                .all(|up| !remaining.contains(up))
        })?;
        ordered.push(remaining.remove(ready));
    }
    Some(ordered)
}

/// State reported while waiting on an entity of kind `upstream`
pub fn wait_state_for(upstream: EntityKind) -> LifecycleState {
    match upstream {
        EntityKind::Database => LifecycleState::WaitingForDependency,
        _ => LifecycleState::WaitingForPeers,
    }
}

/// Whether a composed sub-entity of this kind must be `Running` for its parent to be `Running`
pub fn gates_parent_readiness(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Database | EntityKind::Gateway | EntityKind::Server
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_edges_are_acyclic() {
        assert!(topological_order(EntityKind::ALL).is_some());
    }

    #[test]
    fn test_database_precedes_gateway_and_server() {
        let order = topological_order(&composed_by(EntityKind::Csp)).unwrap();
        assert_eq!(
            order,
            vec![
                EntityKind::Database,
                EntityKind::Gateway,
                EntityKind::Server,
                EntityKind::Enforcer,
                EntityKind::KubeEnforcer,
            ]
        );
    }

    #[test]
    fn test_upstream_of_enforcers() {
        assert_eq!(
            upstream_of(EntityKind::Enforcer),
            vec![EntityKind::Gateway, EntityKind::Server]
        );
        assert_eq!(
            upstream_of(EntityKind::Starboard),
            vec![EntityKind::KubeEnforcer]
        );
        assert!(upstream_of(EntityKind::Database).is_empty());
        assert!(upstream_of(EntityKind::Csp).is_empty());
    }

    #[test]
    fn test_composition() {
        assert_eq!(
            composed_by(EntityKind::KubeEnforcer),
            vec![EntityKind::Starboard]
        );
        assert!(composed_by(EntityKind::Gateway).is_empty());
    }

    #[test]
    fn test_child_sync_order_puts_workloads_last() {
        assert_eq!(sync_priority(ObjectKind::ServiceAccount), 0);
        assert!(sync_priority(ObjectKind::ClusterRole) < sync_priority(ObjectKind::ClusterRoleBinding));
        assert!(sync_priority(ObjectKind::Secret) < sync_priority(ObjectKind::Deployment));
        assert!(sync_priority(ObjectKind::Service) < sync_priority(ObjectKind::DaemonSet));
        assert_eq!(sync_priority(ObjectKind::Pod), CHILD_SYNC_ORDER.len());
    }

    #[test]
    fn test_wait_states() {
        assert_eq!(
            wait_state_for(EntityKind::Database),
            LifecycleState::WaitingForDependency
        );
        assert_eq!(
            wait_state_for(EntityKind::Gateway),
            LifecycleState::WaitingForPeers
        );
        assert!(gates_parent_readiness(EntityKind::Server));
        assert!(!gates_parent_readiness(EntityKind::Enforcer));
    }

    #[test]
    fn test_entity_kind_object_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_object_kind(kind.object_kind()), Some(*kind));
        }
        assert_eq!(EntityKind::from_object_kind(ObjectKind::Secret), None);
    }
}
