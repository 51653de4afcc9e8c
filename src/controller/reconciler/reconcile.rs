//! # Reconcile
//!
//! One level-triggered pass over one entity:
//!
//! 1. load (gone or terminating: nothing to do)
//! 2. normalize and persist defaulted fields
//! 3. wait while a same-named upstream sibling is not `Running`
//! 4. build the tier plan and synchronize owned children in order
//! 5. synthesize composed sub-entities whose upstreams are `Running`
//! 6. recompute and (best-effort) persist status
//!
//! The first store error aborts the pass; the runtime error policy retries it.

use super::types::{PassOutcome, Reconciler, ReconcilerError};
use crate::controller::defaults::{normalize, pending_fields, DefaultingContext};
use crate::controller::entity::Entity;
use crate::controller::graph::{upstream_of, EntityKind};
use crate::controller::object::{Object, ObjectKey, ObjectKind};
use crate::controller::state::{
    compute_state, next_status, StateInputs, SubEntityState, WorkloadProgress,
};
use crate::controller::store::Selector;
use crate::controller::sync::{synchronize, Owner, SyncOutcome, UpdateGate};
use crate::crd::{
    AquaCsp, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer, AquaServer,
    AquaStarboard, EntityStatus, LifecycleState,
};
use crate::manifests::TierPlan;
use crate::observability;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Reconcile the entity of `kind` stored at `key`
pub async fn reconcile(
    ctx: &Reconciler,
    kind: EntityKind,
    key: &ObjectKey,
) -> Result<PassOutcome, ReconcilerError> {
    match kind {
        EntityKind::Csp => reconcile_entity::<AquaCsp>(ctx, key).await,
        EntityKind::Database => reconcile_entity::<AquaDatabase>(ctx, key).await,
        EntityKind::Gateway => reconcile_entity::<AquaGateway>(ctx, key).await,
        EntityKind::Server => reconcile_entity::<AquaServer>(ctx, key).await,
        EntityKind::Enforcer => reconcile_entity::<AquaEnforcer>(ctx, key).await,
        EntityKind::KubeEnforcer => reconcile_entity::<AquaKubeEnforcer>(ctx, key).await,
        EntityKind::Starboard => reconcile_entity::<AquaStarboard>(ctx, key).await,
    }
}

pub async fn reconcile_entity<E: Entity>(
    ctx: &Reconciler,
    key: &ObjectKey,
) -> Result<PassOutcome, ReconcilerError> {
    let kind = E::KIND;
    let span = tracing::info_span!(
        "controller.reconcile",
        resource.kind = kind.as_str(),
        resource.name = key.name.as_str(),
        resource.namespace = key.namespace.as_deref().unwrap_or_default()
    );

    async move {
        let start = Instant::now();
        observability::increment_reconciliations(kind.as_str());

        // Boxed so the pass state lives on the heap, not the caller's stack
        let result = Box::pin(run_pass::<E>(ctx, key)).await;

        observability::observe_reconciliation_duration(
            kind.as_str(),
            start.elapsed().as_secs_f64(),
        );
        if let Ok(outcome) = &result {
            ctx.forget_backoff(&Reconciler::backoff_key(kind.object_kind(), key));
            observability::increment_requeues(outcome.reason.as_str());
            debug!(reason = %outcome.reason, action = ?outcome.action, "reconciliation.complete");
        }
        result
    }
    .instrument(span)
    .await
}

fn expect_entity<E: Entity>(object: Object, key: &ObjectKey) -> Result<E, ReconcilerError> {
    E::try_from(object).map_err(|found| ReconcilerError::UnexpectedObject {
        kind: E::KIND.object_kind(),
        key: key.clone(),
        found: found.kind(),
    })
}

async fn run_pass<E: Entity>(
    ctx: &Reconciler,
    key: &ObjectKey,
) -> Result<PassOutcome, ReconcilerError> {
    let kind = E::KIND;
    let store = ctx.store.as_ref();
    let namespace = key.namespace.clone().unwrap_or_default();

    let mut entity: E = match store.get(kind.object_kind(), key).await {
        Ok(object) => expect_entity(object, key)?,
        Err(e) if e.is_not_found() => {
            debug!("Entity not found, nothing to reconcile");
            observability::clear_entity_state(kind.as_str(), &namespace, &key.name);
            return Ok(PassOutcome::deleted());
        }
        Err(e) => return Err(e.into()),
    };
    if entity.meta().deletion_timestamp.is_some() {
        debug!("Entity is terminating, children are released by the garbage collector");
        return Ok(PassOutcome::deleted());
    }

    let name = key.name.clone();
    let defaults = DefaultingContext {
        name: &name,
        namespace: &namespace,
        platform: &ctx.platform,
    };

    let rules = E::defaulting_rules();
    let pending = pending_fields(entity.spec(), &rules);
    if !pending.is_empty() {
        let normalized = normalize(entity.spec(), &rules, &defaults);
        if normalized != *entity.spec() {
            *entity.spec_mut() = normalized;
            let live = store.update(entity.clone().into()).await?;
            entity = expect_entity(live, key)?;
            info!(fields = ?pending, "Persisted defaulted spec fields");
        }
    }

    let mut inputs = StateInputs::default();
    for upstream in upstream_of(kind) {
        let sibling_key = ObjectKey::namespaced(&namespace, &name);
        match store.get(upstream.object_kind(), &sibling_key).await {
            Ok(sibling) => {
                let state = EntityStatus::state_of(sibling.entity_status());
                if !state.is_running() {
                    info!(upstream = %upstream, upstream_state = %state, "Waiting for upstream entity");
                    inputs.blocking_upstream = Some((upstream, name.clone()));
                    break;
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut nodes = entity.status().map(|s| s.nodes.clone()).unwrap_or_default();
    if inputs.blocking_upstream.is_none() {
        match entity.plan(&defaults) {
            Ok(plan) => {
                nodes =
                    Box::pin(apply_plan(ctx, kind, entity.meta(), plan, &mut inputs)).await?;
            }
            Err(e) => {
                warn!(error = %e, "Configuration problem, waiting for a spec change");
                inputs.config_error = Some(e.to_string());
            }
        }
    }

    let decision = compute_state(&inputs);
    let state = decision.state;
    let status = next_status(
        entity.status(),
        decision,
        &inputs,
        nodes,
        entity.meta().generation,
        &ctx.clock.now_rfc3339(),
    );

    if entity.status() != Some(&status) {
        let previous = EntityStatus::state_of(entity.status());
        if previous != state || entity.status().is_none() {
            info!(from = %previous, to = %state, message = ?status.message, "State changed");
        }
        entity.set_status(status);
        if let Err(e) = store.update_status(entity.clone().into()).await {
            warn!(error = %e, "Failed to write status, it is recomputed next pass");
            observability::increment_status_write_failures(kind.as_str());
        }
    }

    observability::set_entity_state(kind.as_str(), &namespace, &name, state);
    Ok(PassOutcome::settled(&ctx.policy, state))
}

/// Synchronize the plan's children and sub-entities, returning the pods backing the tier
async fn apply_plan(
    ctx: &Reconciler,
    kind: EntityKind,
    meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    plan: TierPlan,
    inputs: &mut StateInputs,
) -> Result<Vec<String>, ReconcilerError> {
    let store = ctx.store.as_ref();
    let owner = Owner::new(kind, meta);
    let TierPlan {
        children,
        composed,
        pod_selector,
    } = plan;

    for child in children {
        let child_kind = child.object.kind();
        let result = Box::pin(synchronize(store, &owner, child.object, child.gate)).await?;
        observability::increment_child_sync(child_kind.as_str(), result.outcome.as_str());
        if result.outcome == SyncOutcome::Held {
            inputs.held.push(result.live.display_name());
        }
        if let Some(progress) = WorkloadProgress::of(&result.live) {
            inputs.workloads.push(progress);
        }
    }

    let own_tier_running =
        inputs.held.is_empty() && inputs.workloads.iter().all(WorkloadProgress::is_complete);
    let composed_kinds: Vec<EntityKind> = composed
        .iter()
        .filter_map(|sub| EntityKind::from_object_kind(sub.kind()))
        .collect();
    let mut states: BTreeMap<EntityKind, LifecycleState> = BTreeMap::new();

    for sub in composed {
        let Some(sub_kind) = EntityKind::from_object_kind(sub.kind()) else {
            continue;
        };
        let sub_name = sub.name().to_string();
        let blocked_on = upstream_of(sub_kind).into_iter().find(|up| {
            if *up == kind {
                !own_tier_running
            } else if composed_kinds.contains(up) {
                !states.get(up).is_some_and(|s| s.is_running())
            } else {
                false
            }
        });

        let state = match blocked_on {
            Some(upstream) => {
                debug!(sub_entity = %sub.display_name(), upstream = %upstream, "Deferring sub-entity");
                match store.get(sub.kind(), &sub.key()).await {
                    Ok(existing) => EntityStatus::state_of(existing.entity_status()),
                    Err(e) if e.is_not_found() => LifecycleState::Pending,
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                let sub_kind_name = sub.kind();
                let result = Box::pin(synchronize(store, &owner, sub, UpdateGate::Open)).await?;
                observability::increment_child_sync(
                    sub_kind_name.as_str(),
                    result.outcome.as_str(),
                );
                EntityStatus::state_of(result.live.entity_status())
            }
        };
        states.insert(sub_kind, state);
        inputs.sub_entities.push(SubEntityState {
            kind: sub_kind,
            name: sub_name,
            state,
        });
    }

    let Some(labels) = pod_selector else {
        return Ok(Vec::new());
    };
    let selector = Selector::in_namespace(owner.namespace.clone()).with_labels(&labels);
    let mut nodes: Vec<String> = store
        .list(ObjectKind::Pod, &selector)
        .await?
        .iter()
        .map(|pod| pod.name().to_string())
        .collect();
    nodes.sort();
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::FixedClock;
    use crate::controller::defaults::PlatformDefaults;
    use crate::controller::requeue::{RequeuePolicy, RequeueReason};
    use crate::controller::store::{MemoryStore, MockObjectStore, ObjectStore, StoreError};
    use crate::crd::AquaGatewaySpec;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn context(store: Arc<dyn ObjectStore>) -> Reconciler {
        let clock = FixedClock::new(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Reconciler::new(
            store,
            Arc::new(clock),
            RequeuePolicy::default(),
            PlatformDefaults::default(),
        )
    }

    fn gateway(name: &str) -> AquaGateway {
        let mut gateway = AquaGateway::new(name, AquaGatewaySpec::default());
        gateway.metadata.namespace = Some("aqua".to_string());
        gateway
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store);
        let outcome = reconcile(&ctx, EntityKind::Gateway, &ObjectKey::namespaced("aqua", "gone"))
            .await
            .unwrap();
        assert_eq!(outcome.reason, RequeueReason::Deleted);
        assert_eq!(outcome.state, None);
    }

    #[tokio::test]
    async fn test_gateway_waits_for_sibling_database() {
        let store = Arc::new(MemoryStore::new());
        let mut database = AquaDatabase::new("aqua", Default::default());
        database.metadata.namespace = Some("aqua".to_string());
        store.create(database.into()).await.unwrap();
        store.create(gateway("aqua").into()).await.unwrap();
        let ctx = context(store.clone());

        let outcome = reconcile(&ctx, EntityKind::Gateway, &ObjectKey::namespaced("aqua", "aqua"))
            .await
            .unwrap();

        assert_eq!(outcome.state, Some(LifecycleState::WaitingForDependency));
        assert!(store.objects_of(ObjectKind::Deployment).is_empty());
    }

    #[tokio::test]
    async fn test_gateway_without_sibling_synthesizes_children() {
        let store = Arc::new(MemoryStore::new());
        store.create(gateway("solo").into()).await.unwrap();
        let ctx = context(store.clone());
        let key = ObjectKey::namespaced("aqua", "solo");

        let outcome = reconcile(&ctx, EntityKind::Gateway, &key).await.unwrap();
        assert_eq!(outcome.state, Some(LifecycleState::UpdateInProgress));
        assert_eq!(store.objects_of(ObjectKind::Deployment).len(), 1);
        assert_eq!(store.objects_of(ObjectKind::Service).len(), 1);

        store.mark_workloads_ready();
        let outcome = reconcile(&ctx, EntityKind::Gateway, &key).await.unwrap();
        assert_eq!(outcome.state, Some(LifecycleState::Running));
        assert_eq!(outcome.reason, RequeueReason::SteadyState);
    }

    #[tokio::test]
    async fn test_successful_and_deleted_passes_evict_backoff_state() {
        let store = Arc::new(MemoryStore::new());
        store.create(gateway("solo").into()).await.unwrap();
        let ctx = context(store);
        let solo = ObjectKey::namespaced("aqua", "solo");
        let gone = ObjectKey::namespaced("aqua", "gone");
        ctx.next_error_backoff(&Reconciler::backoff_key(ObjectKind::AquaGateway, &solo));
        ctx.next_error_backoff(&Reconciler::backoff_key(ObjectKind::AquaGateway, &gone));
        assert_eq!(ctx.tracked_backoffs(), 2);

        reconcile(&ctx, EntityKind::Gateway, &solo).await.unwrap();
        assert_eq!(ctx.tracked_backoffs(), 1);

        let outcome = reconcile(&ctx, EntityKind::Gateway, &gone).await.unwrap();
        assert_eq!(outcome.reason, RequeueReason::Deleted);
        assert_eq!(ctx.tracked_backoffs(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_pass() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(1).returning(|kind, key| {
            Err(StoreError::Watch(format!("connection reset reading {kind} {key}")))
        });
        store.expect_create().never();
        store.expect_update().never();
        let ctx = context(Arc::new(store));

        let result = reconcile(&ctx, EntityKind::Server, &ObjectKey::namespaced("aqua", "aqua")).await;
        assert!(matches!(result, Err(ReconcilerError::Store(_))));
    }
}
