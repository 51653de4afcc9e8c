//! Host enforcer: a privileged daemon set on every node.
//!
//! The daemon set is synchronized behind the `updateApproved` gate.

use super::{
    check_version, checksum_annotations, config_map, config_map_env_from, container, daemon_set,
    pod_spec, pod_template, secret, secret_env, selector_labels, service_account, ConfigError,
    DesiredChild, TierPlan,
};
use crate::controller::graph::EntityKind;
use crate::controller::object::Object;
use crate::crd::{AquaEnforcerSpec, SecretRef};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, Container, HostPathVolumeSource, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
use std::collections::BTreeMap;

pub fn enforcer_name(name: &str) -> String {
    format!("{name}-enforcer")
}

/// Host paths mounted into the enforcer
const HOST_MOUNTS: &[(&str, &str)] = &[
    ("var-run", "/var/run"),
    ("dev", "/dev"),
    ("sys", "/host/sys"),
    ("proc", "/host/proc"),
    ("etc", "/host/etc"),
];

/// Secret reference for the enforcer token, creating the secret from an inline token
pub fn token_secret(
    entity: EntityKind,
    app: &str,
    token: Option<&str>,
    secret_ref: Option<&SecretRef>,
) -> Result<(SecretRef, Option<String>), ConfigError> {
    match (secret_ref, token) {
        (Some(existing), _) => Ok((existing.clone(), None)),
        (None, Some(token)) => Ok((
            SecretRef {
                name: format!("{app}-token"),
                key: "token".to_string(),
            },
            Some(token.to_string()),
        )),
        (None, None) => Err(ConfigError::TokenMissing { entity }),
    }
}

pub fn build_config_map(name: &str, namespace: &str, spec: &AquaEnforcerSpec) -> ConfigMap {
    let app = enforcer_name(name);
    let mut data = BTreeMap::from([
        ("AQUA_SERVER".to_string(), spec.gateway.endpoint()),
        ("AQUA_LOGICAL_NAME".to_string(), format!("{namespace}-{app}")),
        ("AQUA_HEALTH_MONITOR_ENABLED".to_string(), "true".to_string()),
        ("AQUA_NETWORK_CONTROL".to_string(), "1".to_string()),
        ("RESTART_CONTAINERS".to_string(), "no".to_string()),
    ]);
    if spec.mtls {
        data.insert("AQUA_TLS_VERIFY".to_string(), "true".to_string());
        data.insert("AQUA_ROOT_CA".to_string(), "/opt/aquasec/ssl/ca.pem".to_string());
    }
    config_map(&format!("{app}-config"), namespace, &app, data)
}

pub fn build_daemon_set(
    name: &str,
    namespace: &str,
    spec: &AquaEnforcerSpec,
    token: &SecretRef,
    config: &ConfigMap,
) -> DaemonSet {
    let app = enforcer_name(name);
    let deploy = spec.deploy.as_ref();
    let enforcer = container(
        "enforcer",
        deploy,
        Container {
            env: Some(vec![secret_env("AQUA_TOKEN", token)]),
            env_from: Some(vec![config_map_env_from(
                config.metadata.name.as_deref().unwrap_or_default(),
            )]),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                capabilities: Some(Capabilities {
                    add: Some(vec!["SYS_ADMIN".to_string(), "NET_ADMIN".to_string()]),
                    drop: None,
                }),
                ..SecurityContext::default()
            }),
            volume_mounts: Some(
                HOST_MOUNTS
                    .iter()
                    .map(|(volume, path)| VolumeMount {
                        name: (*volume).to_string(),
                        mount_path: (*path).to_string(),
                        ..VolumeMount::default()
                    })
                    .collect(),
            ),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        Some(&format!("{app}-sa")),
        &spec.common,
        // needs root on the host
        None,
        deploy,
        PodSpec {
            containers: vec![enforcer],
            host_pid: Some(true),
            volumes: Some(
                HOST_MOUNTS
                    .iter()
                    .map(|(volume, path)| Volume {
                        name: (*volume).to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: path.trim_start_matches("/host").to_string(),
                            type_: None,
                        }),
                        ..Volume::default()
                    })
                    .collect(),
            ),
            ..PodSpec::default()
        },
    );
    let config_object = Object::from(config.clone());
    daemon_set(
        &app,
        namespace,
        &app,
        pod_template(&app, Some(checksum_annotations(&[&config_object])), pod),
    )
}

pub fn plan(name: &str, namespace: &str, spec: &AquaEnforcerSpec) -> Result<TierPlan, ConfigError> {
    check_version(&spec.infra, &spec.common)?;
    let app = enforcer_name(name);
    let (token_ref, inline_token) = token_secret(
        EntityKind::Enforcer,
        &app,
        spec.token.as_deref(),
        spec.secret.as_ref(),
    )?;
    let config = build_config_map(name, namespace, spec);
    let workload = build_daemon_set(name, namespace, spec, &token_ref, &config);

    let mut children = vec![DesiredChild::open(service_account(
        &format!("{app}-sa"),
        namespace,
        &app,
        &spec.common,
    ))];
    if let Some(token) = inline_token {
        children.push(DesiredChild::open(secret(
            &token_ref.name,
            namespace,
            &app,
            [(token_ref.key.clone(), token.into_bytes())],
        )));
    }
    children.push(DesiredChild::open(config));
    children.push(DesiredChild::gated(workload, spec.update_approved));

    Ok(TierPlan {
        children,
        composed: Vec::new(),
        pod_selector: Some(selector_labels(&app)),
    }
    .ordered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::sync::UpdateGate;

    fn spec() -> AquaEnforcerSpec {
        AquaEnforcerSpec {
            token: Some("enforcer-token".to_string()),
            update_approved: Some(false),
            ..AquaEnforcerSpec::default()
        }
    }

    #[test]
    fn test_enforcer_plan() {
        let plan = plan("aqua", "aqua-system", &spec()).unwrap();
        assert_eq!(
            plan.child_names(),
            vec![
                "ServiceAccount/aqua-enforcer-sa",
                "Secret/aqua-enforcer-token",
                "ConfigMap/aqua-enforcer-config",
                "DaemonSet/aqua-enforcer",
            ]
        );
        assert_eq!(plan.children[3].gate, UpdateGate::Approval(Some(false)));
    }

    #[test]
    fn test_existing_token_secret_is_referenced() {
        let spec = AquaEnforcerSpec {
            token: None,
            secret: Some(SecretRef {
                name: "enforcer-token".to_string(),
                key: "token".to_string(),
            }),
            ..spec()
        };
        let plan = plan("aqua", "aqua-system", &spec).unwrap();
        assert!(!plan.child_names().contains(&"Secret/aqua-enforcer-token".to_string()));
    }

    #[test]
    fn test_token_is_required() {
        let spec = AquaEnforcerSpec {
            token: None,
            ..spec()
        };
        assert_eq!(
            plan("aqua", "aqua-system", &spec).unwrap_err(),
            ConfigError::TokenMissing {
                entity: EntityKind::Enforcer
            }
        );
    }

    #[test]
    fn test_gateway_address_in_config() {
        let mut spec = spec();
        spec.gateway.host = Some("aqua-gateway".to_string());
        let config = build_config_map("aqua", "aqua-system", &spec);
        assert_eq!(config.data.unwrap()["AQUA_SERVER"], "aqua-gateway:8443");
    }
}
