//! # KubeEnforcer
//!
//! Admission control: RBAC, serving certificates, the webhook configurations
//! pointing at the enforcer service, and the enforcer deployment. The
//! deployment is synchronized behind the `updateApproved` gate.
//!
//! When `starboard` is set the KubeEnforcer composes an `AquaStarboard` of the
//! same name, synthesized once the enforcer itself is running.

use super::enforcer::token_secret;
use super::{
    check_version, checksum_annotations, cluster_role, cluster_role_binding, config_map,
    config_map_env_from, container, deployment, object_meta, pod_spec, pod_template,
    policy_rule, role, role_binding, secret, secret_env, selector_labels, service,
    service_account, service_port, tier_labels, ConfigError, DesiredChild, TierPlan,
};
use crate::constants::{KUBE_ENFORCER_SERVICE_PORT, KUBE_ENFORCER_WEBHOOK_PORT};
use crate::controller::defaults::{normalize, starboard_rules, DefaultingContext};
use crate::controller::graph::EntityKind;
use crate::controller::object::Object;
use crate::crd::{
    AquaKubeEnforcerSpec, AquaStarboard, AquaStarboardSpec, SecretRef, WebhookCertificates,
};
use base64::Engine;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub fn kube_enforcer_name(name: &str) -> String {
    format!("{name}-kube-enforcer")
}

/// Name of the cluster-scoped objects (unique across namespaces)
pub fn cluster_object_name(name: &str, namespace: &str) -> String {
    format!("{namespace}-{name}-kube-enforcer")
}

/// Decoded certificate material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCertificates {
    pub ca_bundle: Vec<u8>,
    pub server_cert: Vec<u8>,
    pub server_key: Vec<u8>,
}

pub fn decode_certificates(certs: &WebhookCertificates) -> Result<DecodedCertificates, ConfigError> {
    let decode = |field: &'static str, value: &str| {
        base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|_| ConfigError::CertificateEncoding { field })
    };
    Ok(DecodedCertificates {
        ca_bundle: decode("caBundle", &certs.ca_bundle)?,
        server_cert: decode("serverCert", &certs.server_cert)?,
        server_key: decode("serverKey", &certs.server_key)?,
    })
}

fn client_config(name: &str, namespace: &str, ca_bundle: &[u8], path: &str) -> WebhookClientConfig {
    WebhookClientConfig {
        ca_bundle: Some(ByteString(ca_bundle.to_vec())),
        service: Some(ServiceReference {
            name: kube_enforcer_name(name),
            namespace: namespace.to_string(),
            path: Some(path.to_string()),
            port: Some(KUBE_ENFORCER_SERVICE_PORT),
        }),
        url: None,
    }
}

fn admission_rules() -> Vec<RuleWithOperations> {
    vec![RuleWithOperations {
        api_groups: Some(vec!["*".to_string()]),
        api_versions: Some(vec!["*".to_string()]),
        operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
        resources: Some(
            ["pods", "deployments", "replicasets", "daemonsets", "statefulsets", "jobs", "cronjobs"]
                .iter()
                .map(|r| (*r).to_string())
                .collect(),
        ),
        scope: Some("*".to_string()),
    }]
}

pub fn build_validating_webhook(
    name: &str,
    namespace: &str,
    ca_bundle: &[u8],
) -> ValidatingWebhookConfiguration {
    let app = kube_enforcer_name(name);
    ValidatingWebhookConfiguration {
        metadata: object_meta(&cluster_object_name(name, namespace), None, tier_labels(&app)),
        webhooks: Some(vec![ValidatingWebhook {
            name: "imageassurance.aquasec.com".to_string(),
            admission_review_versions: vec!["v1".to_string(), "v1beta1".to_string()],
            client_config: client_config(name, namespace, ca_bundle, "/validate"),
            rules: Some(admission_rules()),
            side_effects: "None".to_string(),
            failure_policy: Some("Ignore".to_string()),
            timeout_seconds: Some(5),
            ..ValidatingWebhook::default()
        }]),
    }
}

pub fn build_mutating_webhook(
    name: &str,
    namespace: &str,
    ca_bundle: &[u8],
) -> MutatingWebhookConfiguration {
    let app = kube_enforcer_name(name);
    MutatingWebhookConfiguration {
        metadata: object_meta(&cluster_object_name(name, namespace), None, tier_labels(&app)),
        webhooks: Some(vec![MutatingWebhook {
            name: "microenforcer.aquasec.com".to_string(),
            admission_review_versions: vec!["v1".to_string(), "v1beta1".to_string()],
            client_config: client_config(name, namespace, ca_bundle, "/mutate"),
            rules: Some(admission_rules()),
            side_effects: "None".to_string(),
            failure_policy: Some("Ignore".to_string()),
            timeout_seconds: Some(5),
            ..MutatingWebhook::default()
        }]),
    }
}

pub fn build_config_map(name: &str, namespace: &str, spec: &AquaKubeEnforcerSpec) -> ConfigMap {
    let app = kube_enforcer_name(name);
    let data = BTreeMap::from([
        ("AQUA_GATEWAY_SECURE_ADDRESS".to_string(), spec.gateway.endpoint()),
        ("AQUA_TLS_PORT".to_string(), KUBE_ENFORCER_WEBHOOK_PORT.to_string()),
        ("TLS_SERVER_CERT_FILEPATH".to_string(), "/certs/server.crt".to_string()),
        ("TLS_SERVER_KEY_FILEPATH".to_string(), "/certs/server.key".to_string()),
        ("AQUA_ENABLE_CACHE".to_string(), "yes".to_string()),
        ("AQUA_CACHE_EXPIRATION_PERIOD".to_string(), "60".to_string()),
        ("CLUSTER_NAME".to_string(), format!("{namespace}-{name}")),
    ]);
    config_map(&format!("{app}-config"), namespace, &app, data)
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    spec: &AquaKubeEnforcerSpec,
    token: &SecretRef,
    config: &ConfigMap,
    certs_secret: &str,
) -> Deployment {
    let app = kube_enforcer_name(name);
    let deploy = spec.deploy.as_ref();
    let enforcer = container(
        "kube-enforcer",
        deploy,
        Container {
            ports: Some(vec![ContainerPort {
                name: Some("webhook".to_string()),
                container_port: KUBE_ENFORCER_WEBHOOK_PORT,
                protocol: Some("TCP".to_string()),
                ..ContainerPort::default()
            }]),
            env: Some(vec![secret_env("AQUA_TOKEN", token)]),
            env_from: Some(vec![config_map_env_from(
                config.metadata.name.as_deref().unwrap_or_default(),
            )]),
            volume_mounts: Some(vec![VolumeMount {
                name: "certs".to_string(),
                mount_path: "/certs".to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            }]),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        Some(&format!("{app}-sa")),
        &spec.common,
        spec.run_as_non_root,
        deploy,
        PodSpec {
            containers: vec![enforcer],
            volumes: Some(vec![Volume {
                name: "certs".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(certs_secret.to_string()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            }]),
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

/// The composed Starboard entity, already in normalized form
pub fn build_starboard(ctx: &DefaultingContext<'_>, spec: &AquaKubeEnforcerSpec) -> Option<AquaStarboard> {
    let details = spec.starboard.as_ref()?;
    let starboard_spec = AquaStarboardSpec {
        infra: spec.infra.clone(),
        common: spec.common.clone(),
        deploy: details.deploy.clone(),
        config: details.config.clone(),
        batch_delete_delay: None,
    };
    let mut starboard = AquaStarboard::new(ctx.name, normalize(&starboard_spec, &starboard_rules(), ctx));
    starboard.metadata.namespace = Some(ctx.namespace.to_string());
    Some(starboard)
}

pub fn plan(ctx: &DefaultingContext<'_>, spec: &AquaKubeEnforcerSpec) -> Result<TierPlan, ConfigError> {
    let (name, namespace) = (ctx.name, ctx.namespace);
    check_version(&spec.infra, &spec.common)?;
    let certs = spec
        .certificates
        .as_ref()
        .ok_or(ConfigError::CertificatesMissing {
            entity: EntityKind::KubeEnforcer,
        })
        .and_then(decode_certificates)?;
    let app = kube_enforcer_name(name);
    let (token_ref, inline_token) = token_secret(
        EntityKind::KubeEnforcer,
        &app,
        spec.token.as_deref(),
        spec.secret.as_ref(),
    )?;

    let sa = format!("{app}-sa");
    let cluster_name = cluster_object_name(name, namespace);
    let certs_secret = format!("{app}-certs");
    let config = build_config_map(name, namespace, spec);
    let workload = build_deployment(name, namespace, spec, &token_ref, &config, &certs_secret);

    let mut children = vec![
        DesiredChild::open(service_account(&sa, namespace, &app, &spec.common)),
        DesiredChild::open(cluster_role(
            &cluster_name,
            &app,
            vec![
                policy_rule(
                    &["*"],
                    &["pods", "nodes", "namespaces", "deployments", "statefulsets", "jobs",
                      "cronjobs", "daemonsets", "replicasets", "replicationcontrollers",
                      "clusterroles", "clusterrolebindings", "componentstatuses", "services"],
                    &["get", "list", "watch"],
                ),
                policy_rule(&["aquasecurity.github.io"], &["vulnerabilityreports", "configauditreports"], &["get", "list", "watch"]),
            ],
        )),
        DesiredChild::open(role(
            &app,
            namespace,
            &app,
            vec![policy_rule(
                &[""],
                &["secrets", "configmaps"],
                &["get", "list", "watch", "create", "update"],
            )],
        )),
        DesiredChild::open(cluster_role_binding(&cluster_name, &app, &cluster_name, &sa, namespace)),
        DesiredChild::open(role_binding(&app, namespace, &app, &app, &sa)),
        DesiredChild::open(secret(
            &certs_secret,
            namespace,
            &app,
            [
                ("server.crt".to_string(), certs.server_cert.clone()),
                ("server.key".to_string(), certs.server_key.clone()),
            ],
        )),
    ];
    if let Some(token) = inline_token {
        children.push(DesiredChild::open(secret(
            &token_ref.name,
            namespace,
            &app,
            [(token_ref.key.clone(), token.into_bytes())],
        )));
    }
    children.extend([
        DesiredChild::open(config),
        DesiredChild::open(service(
            &app,
            namespace,
            &app,
            spec.deploy.as_ref().and_then(|d| d.service.as_deref()),
            vec![service_port("https", KUBE_ENFORCER_SERVICE_PORT, KUBE_ENFORCER_WEBHOOK_PORT)],
        )),
        DesiredChild::open(build_validating_webhook(name, namespace, &certs.ca_bundle)),
        DesiredChild::open(build_mutating_webhook(name, namespace, &certs.ca_bundle)),
        DesiredChild::gated(workload, spec.update_approved),
    ]);

    Ok(TierPlan {
        children,
        composed: build_starboard(ctx, spec).into_iter().map(Object::from).collect(),
        pod_selector: Some(selector_labels(&app)),
    }
    .ordered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::defaults::PlatformDefaults;
    use crate::controller::object::ObjectKind;
    use crate::crd::{StarboardConfig, StarboardDetails};

    fn encoded(value: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(value)
    }

    fn spec() -> AquaKubeEnforcerSpec {
        AquaKubeEnforcerSpec {
            token: Some("ke-token".to_string()),
            certificates: Some(WebhookCertificates {
                ca_bundle: encoded("ca"),
                server_cert: encoded("cert"),
                server_key: encoded("key"),
            }),
            ..AquaKubeEnforcerSpec::default()
        }
    }

    fn ctx(platform: &PlatformDefaults) -> DefaultingContext<'_> {
        DefaultingContext {
            name: "aqua",
            namespace: "aqua-system",
            platform,
        }
    }

    #[test]
    fn test_plan_follows_sync_order() {
        let platform = PlatformDefaults::default();
        let plan = plan(&ctx(&platform), &spec()).unwrap();
        let kinds: Vec<ObjectKind> = plan.children.iter().map(|c| c.object.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ServiceAccount,
                ObjectKind::ClusterRole,
                ObjectKind::Role,
                ObjectKind::ClusterRoleBinding,
                ObjectKind::RoleBinding,
                ObjectKind::Secret,
                ObjectKind::Secret,
                ObjectKind::ConfigMap,
                ObjectKind::Service,
                ObjectKind::ValidatingWebhookConfiguration,
                ObjectKind::MutatingWebhookConfiguration,
                ObjectKind::Deployment,
            ]
        );
        assert!(plan.composed.is_empty());
    }

    #[test]
    fn test_cluster_objects_are_namespace_qualified() {
        let platform = PlatformDefaults::default();
        let plan = plan(&ctx(&platform), &spec()).unwrap();
        let role = plan
            .children
            .iter()
            .find(|c| c.object.kind() == ObjectKind::ClusterRole)
            .unwrap();
        assert_eq!(role.object.name(), "aqua-system-aqua-kube-enforcer");
        assert!(role.object.meta().namespace.is_none());
    }

    #[test]
    fn test_missing_certificates_is_config_error() {
        let platform = PlatformDefaults::default();
        let spec = AquaKubeEnforcerSpec {
            certificates: None,
            ..spec()
        };
        assert_eq!(
            plan(&ctx(&platform), &spec).unwrap_err(),
            ConfigError::CertificatesMissing {
                entity: EntityKind::KubeEnforcer
            }
        );
    }

    #[test]
    fn test_invalid_certificate_encoding() {
        let platform = PlatformDefaults::default();
        let mut spec = spec();
        if let Some(certs) = spec.certificates.as_mut() {
            certs.server_key = "not base64!".to_string();
        }
        assert_eq!(
            plan(&ctx(&platform), &spec).unwrap_err(),
            ConfigError::CertificateEncoding { field: "serverKey" }
        );
    }

    #[test]
    fn test_webhook_carries_decoded_ca_bundle() {
        let webhook = build_validating_webhook("aqua", "aqua-system", b"ca");
        let hook = &webhook.webhooks.unwrap()[0];
        assert_eq!(hook.client_config.ca_bundle, Some(ByteString(b"ca".to_vec())));
        assert_eq!(
            hook.client_config.service.as_ref().unwrap().name,
            "aqua-kube-enforcer"
        );
    }

    #[test]
    fn test_starboard_is_composed_normalized() {
        let platform = PlatformDefaults::default();
        let spec = AquaKubeEnforcerSpec {
            starboard: Some(StarboardDetails {
                deploy: None,
                config: StarboardConfig {
                    batch_delete_limit: Some(5),
                    ..StarboardConfig::default()
                },
            }),
            ..spec()
        };
        let plan = plan(&ctx(&platform), &spec).unwrap();
        let Object::AquaStarboard(starboard) = &plan.composed[0] else {
            panic!("expected starboard");
        };
        assert_eq!(starboard.spec.config.batch_delete_limit, Some(5));
        assert!(starboard.spec.config.batch_delete_delay.is_some());
        assert_eq!(starboard.metadata.namespace.as_deref(), Some("aqua-system"));
    }
}
