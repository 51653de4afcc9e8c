//! # Convergence Tests
//!
//! Whole-platform reconciliation against the in-memory store:
//! - an empty store converges to exactly the children the composite implies
//! - converged passes write nothing
//! - sub-entities are never synthesized ahead of their upstreams
//! - deleting the composite removes everything through ownership alone
//! - a full convergence runs within the default 2 MiB thread stack

mod common;

use aqua_operator::controller::graph::EntityKind;
use aqua_operator::controller::object::{ObjectKey, ObjectKind};
use aqua_operator::controller::store::ObjectStore;
use aqua_operator::crd::LifecycleState;
use common::{csp_with_enforcer, Harness, NAMESPACE};

#[tokio::test]
async fn test_empty_store_converges_to_implied_children() {
    let harness = Harness::new();
    harness.create(csp_with_enforcer("aqua")).await;

    harness.converge(EntityKind::Enforcer, "aqua").await;

    for kind in [
        ObjectKind::AquaDatabase,
        ObjectKind::AquaGateway,
        ObjectKind::AquaServer,
        ObjectKind::AquaEnforcer,
    ] {
        assert_eq!(harness.names_of(kind), vec!["aqua"], "{kind}");
    }
    assert!(harness.names_of(ObjectKind::AquaKubeEnforcer).is_empty());
    assert_eq!(
        harness.names_of(ObjectKind::Deployment),
        vec!["aqua-database", "aqua-gateway", "aqua-server"]
    );
    assert_eq!(harness.names_of(ObjectKind::DaemonSet), vec!["aqua-enforcer"]);
    assert_eq!(harness.names_of(ObjectKind::ClusterRole).len(), 1);
    assert_eq!(harness.names_of(ObjectKind::ClusterRoleBinding).len(), 1);

    for kind in EntityKind::ALL.iter().copied() {
        if harness
            .store
            .peek(kind.object_kind(), &ObjectKey::namespaced(NAMESPACE, "aqua"))
            .is_some()
        {
            assert_eq!(harness.state_of(kind, "aqua"), LifecycleState::Running, "{kind}");
        }
    }
}

#[tokio::test]
async fn test_converged_passes_issue_no_writes() {
    let harness = Harness::new();
    harness.create(csp_with_enforcer("aqua")).await;
    harness.converge(EntityKind::Enforcer, "aqua").await;
    harness.round().await;
    let objects = harness.store.len();

    harness.store.reset_call_counts();
    harness.round().await;
    harness.round().await;

    let calls = harness.store.call_counts();
    assert_eq!(calls.writes(), 0, "{calls:?}");
    assert_eq!(calls.status_updates, 0, "{calls:?}");
    assert_eq!(harness.store.len(), objects);
}

#[tokio::test]
async fn test_recomputed_status_is_stable() {
    let harness = Harness::new();
    harness.create(csp_with_enforcer("aqua")).await;
    harness.converge(EntityKind::Enforcer, "aqua").await;
    harness.round().await;

    let before: Vec<_> = EntityKind::ALL
        .iter()
        .map(|kind| harness.status_of(*kind, "aqua"))
        .collect();
    harness.clock.advance(chrono::Duration::minutes(5));
    harness.round().await;
    let after: Vec<_> = EntityKind::ALL
        .iter()
        .map(|kind| harness.status_of(*kind, "aqua"))
        .collect();

    assert_eq!(before, after);
}

#[tokio::test]
async fn test_enforcer_waits_for_running_gateway() {
    let harness = Harness::new();
    harness.create(csp_with_enforcer("aqua")).await;
    let enforcer = ObjectKey::namespaced(NAMESPACE, "aqua");

    // Database comes up, the gateway never finishes rolling out
    for _ in 0..6 {
        harness.round().await;
        let gateway_deployment = ObjectKey::namespaced(NAMESPACE, "aqua-gateway");
        harness.store.mark_workloads_ready();
        harness
            .store
            .set_workload_ready(ObjectKind::Deployment, &gateway_deployment, false);

        assert!(!harness.exists(ObjectKind::AquaEnforcer, &enforcer));
        assert!(!harness.exists(ObjectKind::DaemonSet, &ObjectKey::namespaced(NAMESPACE, "aqua-enforcer")));
    }
    assert_eq!(harness.state_of(EntityKind::Database, "aqua"), LifecycleState::Running);
    assert_eq!(
        harness.state_of(EntityKind::Gateway, "aqua"),
        LifecycleState::UpdateInProgress
    );
    assert_eq!(
        harness.state_of(EntityKind::Csp, "aqua"),
        LifecycleState::WaitingForPeers
    );

    harness.converge(EntityKind::Enforcer, "aqua").await;
    assert!(harness.exists(ObjectKind::AquaEnforcer, &enforcer));
}

#[tokio::test]
async fn test_deleting_composite_cascades_through_ownership() {
    let harness = Harness::new();
    harness.create(csp_with_enforcer("aqua")).await;
    harness.converge(EntityKind::Enforcer, "aqua").await;
    assert!(harness.store.len() > 10);

    harness.store.reset_call_counts();
    harness
        .store
        .delete(ObjectKind::AquaCsp, &ObjectKey::namespaced(NAMESPACE, "aqua"))
        .await
        .unwrap();
    harness.round().await;

    assert!(harness.store.is_empty());
    let calls = harness.store.call_counts();
    // Only the delete issued above
    assert_eq!(calls.deletes, 1);
    assert_eq!(calls.creates, 0);
}

#[test]
fn test_full_convergence_fits_in_the_default_thread_stack() {
    std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let harness = Harness::new();
                harness.create(csp_with_enforcer("aqua")).await;
                harness.converge(EntityKind::Enforcer, "aqua").await;
                harness.round().await;
            });
        })
        .unwrap()
        .join()
        .unwrap();
}
