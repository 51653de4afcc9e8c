//! Shared harness for the integration tests
//!
//! Drives the reconciler against a `MemoryStore` the way the watch loops
//! would: every entity of every kind is reconciled once per round.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use aqua_operator::controller::clock::FixedClock;
use aqua_operator::controller::defaults::PlatformDefaults;
use aqua_operator::controller::graph::EntityKind;
use aqua_operator::controller::object::{Object, ObjectKey, ObjectKind};
use aqua_operator::controller::reconciler::{reconcile, Reconciler};
use aqua_operator::controller::requeue::RequeuePolicy;
use aqua_operator::controller::store::{MemoryStore, ObjectStore, Selector};
use aqua_operator::crd::{AquaCsp, AquaCspSpec, CspEnforcerSpec, EntityStatus, LifecycleState};
use chrono::TimeZone;
use std::sync::Arc;

pub const NAMESPACE: &str = "aqua";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            clock.clone(),
            RequeuePolicy::default(),
            PlatformDefaults::default(),
        );
        Self {
            store,
            clock,
            reconciler,
        }
    }

    pub async fn create(&self, object: impl Into<Object>) -> Object {
        self.store.create(object.into()).await.unwrap()
    }

    /// Reconcile every stored entity once, in `EntityKind::ALL` order
    pub async fn round(&self) {
        for kind in EntityKind::ALL.iter().copied() {
            let entities = self
                .store
                .list(kind.object_kind(), &Selector::default())
                .await
                .unwrap();
            for entity in entities {
                reconcile(&self.reconciler, kind, &entity.key()).await.unwrap();
            }
        }
    }

    /// Alternate rounds with workload rollouts until `kind/name` is `Running`
    ///
    /// Returns the states `kind/name` went through, without repeats.
    pub async fn converge(&self, kind: EntityKind, name: &str) -> Vec<LifecycleState> {
        let mut seen: Vec<LifecycleState> = Vec::new();
        for _ in 0..10 {
            self.round().await;
            let state = self.state_of(kind, name);
            if seen.last() != Some(&state) {
                seen.push(state);
            }
            if state.is_running() {
                return seen;
            }
            self.store.mark_workloads_ready();
        }
        panic!("{kind}/{name} did not converge, went through {seen:?}");
    }

    pub fn state_of(&self, kind: EntityKind, name: &str) -> LifecycleState {
        EntityStatus::state_of(self.status_of(kind, name).as_ref())
    }

    pub fn status_of(&self, kind: EntityKind, name: &str) -> Option<EntityStatus> {
        self.store
            .peek(kind.object_kind(), &ObjectKey::namespaced(NAMESPACE, name))
            .and_then(|o| o.entity_status().cloned())
    }

    pub fn exists(&self, kind: ObjectKind, key: &ObjectKey) -> bool {
        self.store.peek(kind, key).is_some()
    }

    pub fn names_of(&self, kind: ObjectKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .objects_of(kind)
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        names.sort();
        names
    }
}

pub fn csp(name: &str, spec: AquaCspSpec) -> AquaCsp {
    let mut csp = AquaCsp::new(name, spec);
    csp.metadata.namespace = Some(NAMESPACE.to_string());
    csp
}

/// Composite with a managed database and a node enforcer
pub fn csp_with_enforcer(name: &str) -> AquaCsp {
    csp(
        name,
        AquaCspSpec {
            enforcer: Some(CspEnforcerSpec {
                token: Some("enforcer-token".to_string()),
                ..CspEnforcerSpec::default()
            }),
            ..AquaCspSpec::default()
        },
    )
}
