//! Gateway tier: the endpoint enforcers connect to.

use super::{
    check_active_active, check_version, container, deployment, env, pod_spec, pod_template,
    selector_labels, service, service_port, ConfigError, DatabaseConnection, DesiredChild,
    TierPlan,
};
use crate::constants::{GATEWAY_HEALTH_PORT, GATEWAY_PORT, GATEWAY_SSH_PORT, SERVER_HTTPS_PORT};
use crate::crd::AquaGatewaySpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, Probe, Service,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub fn gateway_name(name: &str) -> String {
    format!("{name}-gateway")
}

pub fn build_service(name: &str, namespace: &str, spec: &AquaGatewaySpec) -> Service {
    let app = gateway_name(name);
    service(
        &app,
        namespace,
        &app,
        spec.deploy.as_ref().and_then(|d| d.service.as_deref()),
        vec![
            service_port("aqua-gate", GATEWAY_PORT, GATEWAY_PORT),
            service_port("aqua-gate-ssh", GATEWAY_SSH_PORT, GATEWAY_SSH_PORT),
        ],
    )
}

fn health_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::Int(GATEWAY_HEALTH_PORT),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(60),
        period_seconds: Some(30),
        ..Probe::default()
    }
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    spec: &AquaGatewaySpec,
    db: &DatabaseConnection,
) -> Deployment {
    let app = gateway_name(name);
    let deploy = spec.deploy.as_ref();

    let mut vars = db.env();
    vars.push(env("SCALOCK_GATEWAY_PUBLIC_IP", app.clone()));
    vars.push(env("HEALTH_MONITOR", format!("0.0.0.0:{GATEWAY_HEALTH_PORT}")));
    vars.push(env(
        "AQUA_CONSOLE_SECURE_ADDRESS",
        format!("{name}-server:{SERVER_HTTPS_PORT}"),
    ));
    if spec.mtls {
        vars.push(env("AQUA_PRIVATE_KEY", "/opt/aquasec/ssl/key.pem"));
        vars.push(env("AQUA_PUBLIC_KEY", "/opt/aquasec/ssl/cert.pem"));
        vars.push(env("AQUA_ROOT_CA", "/opt/aquasec/ssl/ca.pem"));
        vars.push(env("AQUA_VERIFY_ENFORCER", "1"));
    }
    if spec.common.active_active {
        vars.push(env("AQUA_CLUSTER_MODE", "active-active"));
    }

    let gate = container(
        "gateway",
        deploy,
        Container {
            ports: Some(
                [
                    ("aqua-gate", GATEWAY_PORT),
                    ("aqua-gate-ssh", GATEWAY_SSH_PORT),
                    ("health", GATEWAY_HEALTH_PORT),
                ]
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
            liveness_probe: Some(health_probe()),
            readiness_probe: Some(health_probe()),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        spec.infra.service_account.as_deref(),
        &spec.common,
        spec.run_as_non_root,
        deploy,
        PodSpec {
            containers: vec![gate],
            ..PodSpec::default()
        },
    );
    deployment(
        &app,
        namespace,
        &app,
        deploy.map_or(1, |d| d.replica_count()),
        pod_template(&app, None, pod),
    )
}

pub fn plan(name: &str, namespace: &str, spec: &AquaGatewaySpec) -> Result<TierPlan, ConfigError> {
    check_version(&spec.infra, &spec.common)?;
    check_active_active(&spec.common, spec.external_db.as_ref())?;
    let db = DatabaseConnection::resolve(name, &spec.common, spec.external_db.as_ref())?;

    Ok(TierPlan {
        children: vec![
            DesiredChild::open(build_service(name, namespace, spec)),
            DesiredChild::open(build_deployment(name, namespace, spec, &db)),
        ],
        composed: Vec::new(),
        pod_selector: Some(selector_labels(&gateway_name(name))),
    }
    .ordered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::object::Object;

    #[test]
    fn test_gateway_plan() {
        let plan = plan("aqua", "aqua-system", &AquaGatewaySpec::default()).unwrap();
        assert_eq!(
            plan.child_names(),
            vec!["Service/aqua-gateway", "Deployment/aqua-gateway"]
        );
    }

    #[test]
    fn test_gateway_points_at_managed_database() {
        let plan = plan("aqua", "aqua-system", &AquaGatewaySpec::default()).unwrap();
        let Object::Deployment(deployment) = &plan.children[1].object else {
            panic!("expected deployment");
        };
        let env = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let host = env.iter().find(|e| e.name == "SCALOCK_DBHOST").unwrap();
        assert_eq!(host.value.as_deref(), Some("aqua-database"));
    }

    #[test]
    fn test_mtls_adds_certificate_env() {
        let spec = AquaGatewaySpec {
            mtls: true,
            ..AquaGatewaySpec::default()
        };
        let db = DatabaseConnection::resolve("aqua", &spec.common, None).unwrap();
        let deployment = build_deployment("aqua", "aqua-system", &spec, &db);
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert!(env.iter().any(|e| e.name == "AQUA_VERIFY_ENFORCER"));
    }
}
