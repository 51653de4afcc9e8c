//! Server (console) tier.
//!
//! Connection settings live in a ConfigMap loaded through `envFrom`; the pod
//! template carries a checksum of it so edits roll the deployment.

use super::{
    check_active_active, check_version, checksum_annotations, config_map, config_map_env_from,
    container, deployment, pod_spec, pod_template, secret_env, selector_labels, service,
    service_port, ConfigError, DatabaseConnection, DesiredChild, TierPlan,
};
use crate::constants::{SERVER_HTTPS_PORT, SERVER_HTTP_PORT};
use crate::controller::object::Object;
use crate::crd::AquaServerSpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container, ContainerPort, EnvVar, PodSpec, Service};
use std::collections::BTreeMap;

pub fn server_name(name: &str) -> String {
    format!("{name}-server")
}

pub fn build_config_map(
    name: &str,
    namespace: &str,
    spec: &AquaServerSpec,
    db: &DatabaseConnection,
) -> ConfigMap {
    let mut data: BTreeMap<String, String> = db
        .env()
        .into_iter()
        .filter_map(|var| var.value.map(|value| (var.name, value)))
        .collect();
    data.insert("AQUA_GRPC_MODE".to_string(), "1".to_string());
    data.insert(
        "AQUA_PUBSUB_DBHOST".to_string(),
        db.host.clone(),
    );
    if spec.common.active_active {
        data.insert("AQUA_CLUSTER_MODE".to_string(), "active-active".to_string());
    }
    let app = server_name(name);
    config_map(&format!("{app}-config"), namespace, &app, data)
}

pub fn build_service(name: &str, namespace: &str, spec: &AquaServerSpec) -> Service {
    let app = server_name(name);
    service(
        &app,
        namespace,
        &app,
        spec.deploy.as_ref().and_then(|d| d.service.as_deref()),
        vec![
            service_port("aqua-web", SERVER_HTTP_PORT, SERVER_HTTP_PORT),
            service_port("aqua-web-ssl", 443, SERVER_HTTPS_PORT),
        ],
    )
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    spec: &AquaServerSpec,
    db: &DatabaseConnection,
    config: &ConfigMap,
) -> Deployment {
    let app = server_name(name);
    let deploy = spec.deploy.as_ref();

    // Secrets never go through the ConfigMap
    let mut vars: Vec<EnvVar> = db.env().into_iter().filter(|v| v.value_from.is_some()).collect();
    if let Some(admin) = &spec.admin_password {
        vars.push(secret_env("ADMIN_PASSWORD", admin));
    }
    if let Some(license) = &spec.license_token {
        vars.push(secret_env("LICENSE_TOKEN", license));
    }

    let console = container(
        "server",
        deploy,
        Container {
            ports: Some(
                [("aqua-web", SERVER_HTTP_PORT), ("aqua-web-ssl", SERVER_HTTPS_PORT)]
                    .into_iter()
                    .map(|(port_name, port)| ContainerPort {
                        name: Some(port_name.to_string()),
                        container_port: port,
                        protocol: Some("TCP".to_string()),
                        ..ContainerPort::default()
                    })
                    .collect(),
            ),
            env: Some(vars),
            env_from: Some(vec![config_map_env_from(
                config.metadata.name.as_deref().unwrap_or_default(),
            )]),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        spec.infra.service_account.as_deref(),
        &spec.common,
        spec.run_as_non_root,
        deploy,
        PodSpec {
            containers: vec![console],
            ..PodSpec::default()
        },
    );
    let config_object = Object::from(config.clone());
    deployment(
        &app,
        namespace,
        &app,
        deploy.map_or(1, |d| d.replica_count()),
        pod_template(&app, Some(checksum_annotations(&[&config_object])), pod),
    )
}

pub fn plan(name: &str, namespace: &str, spec: &AquaServerSpec) -> Result<TierPlan, ConfigError> {
    check_version(&spec.infra, &spec.common)?;
    check_active_active(&spec.common, spec.external_db.as_ref())?;
    let db = DatabaseConnection::resolve(name, &spec.common, spec.external_db.as_ref())?;
    let config = build_config_map(name, namespace, spec, &db);
    let workload = build_deployment(name, namespace, spec, &db, &config);

    Ok(TierPlan {
        children: vec![
            DesiredChild::open(config),
            DesiredChild::open(build_service(name, namespace, spec)),
            DesiredChild::open(workload),
        ],
        composed: Vec::new(),
        pod_selector: Some(selector_labels(&server_name(name))),
    }
    .ordered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CONFIG_CHECKSUM_ANNOTATION;
    use crate::crd::SecretRef;

    fn checksum(plan: &TierPlan) -> String {
        let Object::Deployment(d) = &plan.children[2].object else {
            panic!("expected deployment");
        };
        d.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().annotations.as_ref().unwrap()
            [CONFIG_CHECKSUM_ANNOTATION]
            .clone()
    }

    #[test]
    fn test_server_plan_order() {
        let plan = plan("aqua", "aqua-system", &AquaServerSpec::default()).unwrap();
        assert_eq!(
            plan.child_names(),
            vec![
                "ConfigMap/aqua-server-config",
                "Service/aqua-server",
                "Deployment/aqua-server",
            ]
        );
    }

    #[test]
    fn test_config_change_moves_checksum() {
        let before = plan("aqua", "aqua-system", &AquaServerSpec::default()).unwrap();
        let mut spec = AquaServerSpec::default();
        spec.common.split_db = true;
        let after = plan("aqua", "aqua-system", &spec).unwrap();
        assert_ne!(checksum(&before), checksum(&after));
    }

    #[test]
    fn test_credentials_come_from_secrets() {
        let spec = AquaServerSpec {
            admin_password: Some(SecretRef {
                name: "aqua-admin-password".to_string(),
                key: "password".to_string(),
            }),
            ..AquaServerSpec::default()
        };
        let plan = plan("aqua", "aqua-system", &spec).unwrap();
        let Object::ConfigMap(config) = &plan.children[0].object else {
            panic!("expected config map");
        };
        let data = config.data.as_ref().unwrap();
        assert!(!data.contains_key("SCALOCK_DBPASSWORD"));
        assert!(!data.contains_key("ADMIN_PASSWORD"));

        let Object::Deployment(d) = &plan.children[2].object else {
            panic!("expected deployment");
        };
        let env = d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert!(env.iter().any(|e| e.name == "ADMIN_PASSWORD" && e.value_from.is_some()));
    }
}
