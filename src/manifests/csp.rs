//! # AquaCsp
//!
//! The composite owns only identity and credentials (service account, RBAC,
//! admin password and license secrets). Every tier is delegated to a composed
//! sub-entity of the same name whose spec is derived from the composite's and
//! already normalized with that kind's defaulting table, so the sub-entity's
//! own reconciler has nothing left to fill in.

use super::{
    check_active_active, check_version, cluster_role, cluster_role_binding, policy_rule, secret,
    service_account, ConfigError, DatabaseConnection, DesiredChild, TierPlan,
};
use crate::constants::{DEFAULT_SERVICE_ACCOUNT, GATEWAY_PORT};
use crate::controller::defaults::{
    database_rules, enforcer_rules, gateway_rules, kube_enforcer_rules, normalize, server_rules,
    DefaultingContext,
};
use crate::controller::object::Object;
use crate::crd::{
    AquaCspSpec, AquaDatabase, AquaDatabaseSpec, AquaEnforcer, AquaEnforcerSpec, AquaGateway,
    AquaGatewaySpec, AquaKubeEnforcer, AquaKubeEnforcerSpec, AquaServer, AquaServerSpec,
    GatewayAddress, SecretRef,
};
use kube::Resource;

pub fn admin_password_secret(name: &str) -> SecretRef {
    SecretRef {
        name: format!("{name}-admin-password"),
        key: "password".to_string(),
    }
}

pub fn license_secret(name: &str) -> SecretRef {
    SecretRef {
        name: format!("{name}-license"),
        key: "license".to_string(),
    }
}

pub fn cluster_object_name(name: &str, namespace: &str) -> String {
    format!("{namespace}-{name}-csp")
}

fn in_namespace<K: Resource + Into<Object>>(mut entity: K, namespace: &str) -> Object {
    entity.meta_mut().namespace = Some(namespace.to_string());
    entity.into()
}

fn gateway_address(name: &str) -> GatewayAddress {
    GatewayAddress {
        host: Some(format!("{name}-gateway")),
        port: Some(GATEWAY_PORT),
    }
}

/// Sub-entities of the composite, normalized
pub fn build_composed(ctx: &DefaultingContext<'_>, spec: &AquaCspSpec) -> Vec<Object> {
    let (name, namespace) = (ctx.name, ctx.namespace);
    let admin_password = spec.admin_password.as_ref().map(|_| admin_password_secret(name));
    let license_token = spec.license_token.as_ref().map(|_| license_secret(name));
    let mut composed = Vec::new();

    if spec.manages_database() {
        let database = AquaDatabaseSpec {
            infra: spec.infra.clone(),
            common: spec.common.clone(),
            deploy: spec.database.clone(),
            run_as_non_root: spec.run_as_non_root,
        };
        composed.push(in_namespace(
            AquaDatabase::new(name, normalize(&database, &database_rules(), ctx)),
            namespace,
        ));
    }

    let gateway = AquaGatewaySpec {
        infra: spec.infra.clone(),
        common: spec.common.clone(),
        deploy: spec.gateway.clone(),
        external_db: spec.external_db.clone(),
        run_as_non_root: spec.run_as_non_root,
        mtls: spec.mtls,
    };
    composed.push(in_namespace(
        AquaGateway::new(name, normalize(&gateway, &gateway_rules(), ctx)),
        namespace,
    ));

    let server = AquaServerSpec {
        infra: spec.infra.clone(),
        common: spec.common.clone(),
        deploy: spec.server.clone(),
        external_db: spec.external_db.clone(),
        admin_password,
        license_token,
        run_as_non_root: spec.run_as_non_root,
    };
    composed.push(in_namespace(
        AquaServer::new(name, normalize(&server, &server_rules(), ctx)),
        namespace,
    ));

    if let Some(enforcer) = &spec.enforcer {
        let enforcer = AquaEnforcerSpec {
            infra: spec.infra.clone(),
            common: spec.common.clone(),
            deploy: enforcer.deploy.clone(),
            gateway: gateway_address(name),
            token: enforcer.token.clone(),
            secret: enforcer.secret.clone(),
            run_as_non_root: spec.run_as_non_root,
            mtls: spec.mtls,
            update_approved: spec.enforcer_update_approved,
        };
        composed.push(in_namespace(
            AquaEnforcer::new(name, normalize(&enforcer, &enforcer_rules(), ctx)),
            namespace,
        ));
    }

    if let Some(kube_enforcer) = &spec.kube_enforcer {
        let kube_enforcer = AquaKubeEnforcerSpec {
            infra: spec.infra.clone(),
            common: spec.common.clone(),
            deploy: kube_enforcer.deploy.clone(),
            gateway: gateway_address(name),
            token: kube_enforcer.token.clone(),
            secret: kube_enforcer.secret.clone(),
            certificates: kube_enforcer.certificates.clone(),
            starboard: kube_enforcer.starboard.clone(),
            run_as_non_root: spec.run_as_non_root,
            update_approved: spec.enforcer_update_approved,
        };
        composed.push(in_namespace(
            AquaKubeEnforcer::new(name, normalize(&kube_enforcer, &kube_enforcer_rules(), ctx)),
            namespace,
        ));
    }

    composed
}

pub fn plan(ctx: &DefaultingContext<'_>, spec: &AquaCspSpec) -> Result<TierPlan, ConfigError> {
    let (name, namespace) = (ctx.name, ctx.namespace);
    check_version(&spec.infra, &spec.common)?;
    check_active_active(&spec.common, spec.external_db.as_ref())?;
    let connection = DatabaseConnection::resolve(name, &spec.common, spec.external_db.as_ref())?;

    let sa = spec
        .infra
        .service_account
        .clone()
        .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());
    let mut children = vec![DesiredChild::open(service_account(
        &sa,
        namespace,
        name,
        &spec.common,
    ))];

    if spec.infra.requirements.unwrap_or(true) {
        let cluster_name = cluster_object_name(name, namespace);
        children.push(DesiredChild::open(cluster_role(
            &cluster_name,
            name,
            vec![
                policy_rule(
                    &[""],
                    &["nodes", "services", "endpoints", "pods", "deployments", "namespaces", "componentstatuses"],
                    &["get", "list", "watch"],
                ),
                policy_rule(&["rbac.authorization.k8s.io"], &["*"], &["get", "list", "watch"]),
                policy_rule(&["", "apps"], &["secrets", "configmaps"], &["get", "list", "watch"]),
            ],
        )));
        children.push(DesiredChild::open(cluster_role_binding(
            &cluster_name,
            name,
            &cluster_name,
            &sa,
            namespace,
        )));
    }

    if let Some(password) = &spec.admin_password {
        let secret_ref = admin_password_secret(name);
        children.push(DesiredChild::open(secret(
            &secret_ref.name,
            namespace,
            name,
            [(secret_ref.key, password.clone().into_bytes())],
        )));
    }
    if let Some(license) = &spec.license_token {
        let secret_ref = license_secret(name);
        children.push(DesiredChild::open(secret(
            &secret_ref.name,
            namespace,
            name,
            [(secret_ref.key, license.clone().into_bytes())],
        )));
    }
    // an inline external password is stored where the tiers expect the database secret
    if let Some(password) = spec
        .external_db
        .as_ref()
        .filter(|db| db.password_secret.is_none())
        .and_then(|db| db.password.as_ref())
    {
        children.push(DesiredChild::open(secret(
            &connection.password.name,
            namespace,
            name,
            [(connection.password.key.clone(), password.clone().into_bytes())],
        )));
    }

    Ok(TierPlan {
        children,
        composed: build_composed(ctx, spec),
        pod_selector: None,
    }
    .ordered())
}
