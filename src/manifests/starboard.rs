//! Starboard operator: vulnerability and config-audit reports for the KubeEnforcer.

use super::{
    checksum_annotations, cluster_role, cluster_role_binding, config_map,
    config_map_env_from, container, deployment, env, pod_spec, pod_template, policy_rule,
    selector_labels, service_account, ConfigError, DesiredChild, TierPlan,
};
use crate::constants::{DEFAULT_BATCH_DELETE_DELAY, DEFAULT_BATCH_DELETE_LIMIT};
use crate::controller::object::Object;
use crate::crd::AquaStarboardSpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec};
use std::collections::BTreeMap;

pub fn starboard_name(name: &str) -> String {
    format!("{name}-starboard")
}

pub fn cluster_object_name(name: &str, namespace: &str) -> String {
    format!("{namespace}-{name}-starboard")
}

/// Operator settings; delete limit and delay are read from their own fields
pub fn build_config_map(name: &str, namespace: &str, spec: &AquaStarboardSpec) -> ConfigMap {
    let app = starboard_name(name);
    let config = &spec.config;
    let mut data = BTreeMap::from([
        (
            "OPERATOR_BATCH_DELETE_LIMIT".to_string(),
            config
                .batch_delete_limit
                .unwrap_or(DEFAULT_BATCH_DELETE_LIMIT)
                .to_string(),
        ),
        (
            "OPERATOR_BATCH_DELETE_DELAY".to_string(),
            config
                .batch_delete_delay
                .clone()
                .unwrap_or_else(|| DEFAULT_BATCH_DELETE_DELAY.to_string()),
        ),
        ("OPERATOR_NAMESPACE".to_string(), namespace.to_string()),
        ("OPERATOR_TARGET_NAMESPACES".to_string(), String::new()),
        (
            "OPERATOR_CONFIG_AUDIT_SCANNER_ENABLED".to_string(),
            "true".to_string(),
        ),
    ]);
    if let Some(scanner) = &config.vulnerability_scanner {
        data.insert("vulnerabilityReports.scanner".to_string(), scanner.clone());
    }
    config_map(&format!("{app}-config"), namespace, &app, data)
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    spec: &AquaStarboardSpec,
    config: &ConfigMap,
) -> Deployment {
    let app = starboard_name(name);
    let deploy = spec.deploy.as_ref();
    let operator = container(
        "starboard-operator",
        deploy,
        Container {
            env: Some(vec![
                env("OPERATOR_LOG_DEV_MODE", "false"),
                env("OPERATOR_METRICS_BIND_ADDRESS", ":8080"),
                env("OPERATOR_HEALTH_PROBE_BIND_ADDRESS", ":9090"),
            ]),
            env_from: Some(vec![config_map_env_from(
                config.metadata.name.as_deref().unwrap_or_default(),
            )]),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        Some(&format!("{app}-sa")),
        &spec.common,
        None,
        deploy,
        PodSpec {
            containers: vec![operator],
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

pub fn plan(name: &str, namespace: &str, spec: &AquaStarboardSpec) -> Result<TierPlan, ConfigError> {
    // versioned independently of the platform, so no version check
    let app = starboard_name(name);
    let sa = format!("{app}-sa");
    let cluster_name = cluster_object_name(name, namespace);
    let config = build_config_map(name, namespace, spec);
    let workload = build_deployment(name, namespace, spec, &config);

    Ok(TierPlan {
        children: vec![
            DesiredChild::open(service_account(&sa, namespace, &app, &spec.common)),
            DesiredChild::open(cluster_role(
                &cluster_name,
                &app,
                vec![
                    policy_rule(
                        &[""],
                        &["pods", "pods/log", "replicationcontrollers", "services", "nodes", "namespaces", "configmaps", "secrets", "serviceaccounts"],
                        &["get", "list", "watch"],
                    ),
                    policy_rule(
                        &["apps", "batch"],
                        &["replicasets", "statefulsets", "daemonsets", "deployments", "jobs", "cronjobs"],
                        &["get", "list", "watch", "create", "delete"],
                    ),
                    policy_rule(
                        &["aquasecurity.github.io"],
                        &["vulnerabilityreports", "configauditreports", "clusterconfigauditreports"],
                        &["get", "list", "watch", "create", "update", "delete"],
                    ),
                ],
            )),
            DesiredChild::open(cluster_role_binding(&cluster_name, &app, &cluster_name, &sa, namespace)),
            DesiredChild::open(config),
            DesiredChild::open(workload),
        ],
        composed: Vec::new(),
        pod_selector: Some(selector_labels(&app)),
    }
    .ordered())
}
