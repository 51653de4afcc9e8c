//! # Entities
//!
//! The operator's custom resources seen through one interface, so the
//! reconciler is written once and instantiated per kind.

use crate::controller::defaults::{
    csp_rules, database_rules, enforcer_rules, gateway_rules, kube_enforcer_rules,
    server_rules, starboard_rules, DefaultRule, DefaultingContext,
};
use crate::controller::graph::EntityKind;
use crate::controller::object::Object;
use crate::crd::{
    AquaCsp, AquaCspSpec, AquaDatabase, AquaDatabaseSpec, AquaEnforcer, AquaEnforcerSpec,
    AquaGateway, AquaGatewaySpec, AquaKubeEnforcer, AquaKubeEnforcerSpec, AquaServer,
    AquaServerSpec, AquaStarboard, AquaStarboardSpec, EntityStatus,
};
use crate::manifests::{self, ConfigError, TierPlan};
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A reconciled custom resource
pub trait Entity:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
    + Into<Object>
    + TryFrom<Object, Error = Object>
{
    const KIND: EntityKind;
    type Spec: Clone + PartialEq + Debug + Send + Sync;

    fn spec(&self) -> &Self::Spec;
    fn spec_mut(&mut self) -> &mut Self::Spec;
    fn status(&self) -> Option<&EntityStatus>;
    fn set_status(&mut self, status: EntityStatus);

    /// Ordered defaulting table for the spec
    fn defaulting_rules() -> Vec<DefaultRule<Self::Spec>>;

    /// Desired children and sub-entities for the (normalized) spec
    fn plan(&self, ctx: &DefaultingContext<'_>) -> Result<TierPlan, ConfigError>;
}

macro_rules! entity {
    ($ty:ty, $spec:ty, $kind:expr, $rules:path, $plan:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;
            type Spec = $spec;

            fn spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn spec_mut(&mut self) -> &mut Self::Spec {
                &mut self.spec
            }

            fn status(&self) -> Option<&EntityStatus> {
                self.status.as_ref()
            }

            fn set_status(&mut self, status: EntityStatus) {
                self.status = Some(status);
            }

            fn defaulting_rules() -> Vec<DefaultRule<Self::Spec>> {
                $rules()
            }

            fn plan(&self, ctx: &DefaultingContext<'_>) -> Result<TierPlan, ConfigError> {
                let plan: fn(&DefaultingContext<'_>, &$spec) -> Result<TierPlan, ConfigError> = $plan;
                plan(ctx, &self.spec)
            }
        }
    };
}

entity!(AquaCsp, AquaCspSpec, EntityKind::Csp, csp_rules, manifests::csp::plan);
entity!(
    AquaDatabase,
    AquaDatabaseSpec,
    EntityKind::Database,
    database_rules,
    |ctx, spec| manifests::database::plan(ctx.name, ctx.namespace, spec)
);
entity!(
    AquaGateway,
    AquaGatewaySpec,
    EntityKind::Gateway,
    gateway_rules,
    |ctx, spec| manifests::gateway::plan(ctx.name, ctx.namespace, spec)
);
entity!(
    AquaServer,
    AquaServerSpec,
    EntityKind::Server,
    server_rules,
    |ctx, spec| manifests::server::plan(ctx.name, ctx.namespace, spec)
);
entity!(
    AquaEnforcer,
    AquaEnforcerSpec,
    EntityKind::Enforcer,
    enforcer_rules,
    |ctx, spec| manifests::enforcer::plan(ctx.name, ctx.namespace, spec)
);
entity!(
    AquaKubeEnforcer,
    AquaKubeEnforcerSpec,
    EntityKind::KubeEnforcer,
    kube_enforcer_rules,
    manifests::kube_enforcer::plan
);
entity!(
    AquaStarboard,
    AquaStarboardSpec,
    EntityKind::Starboard,
    starboard_rules,
    |ctx, spec| manifests::starboard::plan(ctx.name, ctx.namespace, spec)
);
