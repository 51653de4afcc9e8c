//! # Defaulting
//!
//! One ordered table of rules per entity kind. A rule names the field it
//! fills, a condition (normally "the field is unset") and the function that
//! fills it. `normalize` walks the table once; because every rule only fires
//! on unset input and never reads a value it derived earlier, normalizing a
//! normalized spec changes nothing.

use crate::constants::{
    DEFAULT_BATCH_DELETE_DELAY, DEFAULT_BATCH_DELETE_LIMIT, DEFAULT_DB_DISK_SIZE_GI,
    DEFAULT_IMAGE_PULL_SECRET, DEFAULT_PLATFORM, DEFAULT_REGISTRY, DEFAULT_SERVICE_ACCOUNT,
    DEFAULT_VERSION, GATEWAY_PORT, STARBOARD_REGISTRY, STARBOARD_VERSION,
};
use crate::crd::{
    AquaCspSpec, AquaDatabaseSpec, AquaEnforcerSpec, AquaGatewaySpec, AquaKubeEnforcerSpec,
    AquaServerSpec, AquaStarboardSpec, CommonSpec, DeploymentSpec, GatewayAddress, ImageSpec,
    InfrastructureSpec, SecretRef,
};

/// Operator-wide defaults (from configuration)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub registry: String,
    pub version: String,
    pub platform: String,
    pub service_account: String,
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
        }
    }
}

/// Inputs a rule may read besides the spec itself
#[derive(Debug, Clone, Copy)]
pub struct DefaultingContext<'a> {
    /// Entity name
    pub name: &'a str,
    /// Entity namespace
    pub namespace: &'a str,
    pub platform: &'a PlatformDefaults,
}

/// One defaulting rule
pub struct DefaultRule<S> {
    /// Spec path the rule fills (for logs and tests)
    pub field: &'static str,
    /// Whether the rule applies
    pub condition: fn(&S) -> bool,
    pub apply: fn(&mut S, &DefaultingContext<'_>),
}

impl<S> std::fmt::Debug for DefaultRule<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRule")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// Apply `rules` in order to a copy of `spec`
pub fn normalize<S: Clone>(spec: &S, rules: &[DefaultRule<S>], ctx: &DefaultingContext<'_>) -> S {
    let mut normalized = spec.clone();
    for rule in rules {
        if (rule.condition)(&normalized) {
            (rule.apply)(&mut normalized, ctx);
        }
    }
    normalized
}

/// Fields whose rules would fire on `spec`
pub fn pending_fields<S>(spec: &S, rules: &[DefaultRule<S>]) -> Vec<&'static str> {
    rules
        .iter()
        .filter(|rule| (rule.condition)(spec))
        .map(|rule| rule.field)
        .collect()
}

/// Per-tier workload defaults
#[derive(Debug, Clone, Copy)]
pub struct TierDefaults {
    pub replicas: Option<i32>,
    pub service_type: Option<&'static str>,
    /// Registry override (platform registry when `None`)
    pub registry: Option<&'static str>,
    pub repository: &'static str,
    /// Tag override (platform version when `None`)
    pub tag: Option<&'static str>,
}

pub const DATABASE_TIER: TierDefaults = TierDefaults {
    replicas: Some(1),
    service_type: Some("ClusterIP"),
    registry: None,
    repository: "database",
    tag: None,
};

pub const GATEWAY_TIER: TierDefaults = TierDefaults {
    replicas: Some(1),
    service_type: Some("ClusterIP"),
    registry: None,
    repository: "gateway",
    tag: None,
};

pub const SERVER_TIER: TierDefaults = TierDefaults {
    replicas: Some(1),
    service_type: Some("ClusterIP"),
    registry: None,
    repository: "console",
    tag: None,
};

pub const ENFORCER_TIER: TierDefaults = TierDefaults {
    replicas: None,
    service_type: None,
    registry: None,
    repository: "enforcer",
    tag: None,
};

pub const KUBE_ENFORCER_TIER: TierDefaults = TierDefaults {
    replicas: Some(1),
    service_type: None,
    registry: None,
    repository: "kube-enforcer",
    tag: None,
};

pub const STARBOARD_TIER: TierDefaults = TierDefaults {
    replicas: Some(1),
    service_type: None,
    registry: Some(STARBOARD_REGISTRY),
    repository: "starboard-operator",
    tag: Some(STARBOARD_VERSION),
};

const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Whether any field `fill_deployment` would set is unset
pub fn deployment_incomplete(deploy: &Option<DeploymentSpec>, tier: &TierDefaults) -> bool {
    let Some(deploy) = deploy else {
        return true;
    };
    let image_incomplete = deploy.image.as_ref().map_or(true, |image| {
        image.registry.is_none()
            || image.repository.is_none()
            || image.tag.is_none()
            || image.pull_policy.is_none()
    });
    image_incomplete
        || (tier.replicas.is_some() && deploy.replicas.is_none())
        || (tier.service_type.is_some() && deploy.service.is_none())
}

/// Fill unset workload fields from the tier defaults
pub fn fill_deployment(
    deploy: &mut Option<DeploymentSpec>,
    tier: &TierDefaults,
    ctx: &DefaultingContext<'_>,
    version: Option<&str>,
) {
    let deploy = deploy.get_or_insert_with(DeploymentSpec::default);
    if deploy.replicas.is_none() {
        deploy.replicas = tier.replicas;
    }
    if deploy.service.is_none() {
        deploy.service = tier.service_type.map(str::to_string);
    }
    let image = deploy.image.get_or_insert_with(ImageSpec::default);
    if image.registry.is_none() {
        image.registry = Some(
            tier.registry
                .map(str::to_string)
                .unwrap_or_else(|| ctx.platform.registry.clone()),
        );
    }
    if image.repository.is_none() {
        image.repository = Some(tier.repository.to_string());
    }
    if image.tag.is_none() {
        image.tag = Some(
            tier.tag
                .or(version)
                .unwrap_or(ctx.platform.version.as_str())
                .to_string(),
        );
    }
    if image.pull_policy.is_none() {
        image.pull_policy = Some(DEFAULT_PULL_POLICY.to_string());
    }
}

/// Name of the generated database password secret
pub fn database_secret_name(entity_name: &str) -> String {
    format!("{entity_name}-database-password")
}

/// Key holding the password inside the database secret
pub const DATABASE_SECRET_KEY: &str = "db-password";

fn default_database_secret(name: &str) -> SecretRef {
    SecretRef {
        name: database_secret_name(name),
        key: DATABASE_SECRET_KEY.to_string(),
    }
}

/// Access to the blocks every entity spec embeds
pub trait BaseSpec {
    fn infra(&self) -> &InfrastructureSpec;
    fn infra_mut(&mut self) -> &mut InfrastructureSpec;
    fn common(&self) -> &CommonSpec;
    fn common_mut(&mut self) -> &mut CommonSpec;
}

macro_rules! base_spec {
    ($($spec:ty),*) => {
        $(
            impl BaseSpec for $spec {
                fn infra(&self) -> &InfrastructureSpec {
                    &self.infra
                }
                fn infra_mut(&mut self) -> &mut InfrastructureSpec {
                    &mut self.infra
                }
                fn common(&self) -> &CommonSpec {
                    &self.common
                }
                fn common_mut(&mut self) -> &mut CommonSpec {
                    &mut self.common
                }
            }
        )*
    };
}

base_spec!(
    AquaCspSpec,
    AquaDatabaseSpec,
    AquaGatewaySpec,
    AquaServerSpec,
    AquaEnforcerSpec,
    AquaKubeEnforcerSpec,
    AquaStarboardSpec
);

/// Rules shared by every kind: infrastructure identity and the pull secret
fn base_rules<S: BaseSpec>() -> Vec<DefaultRule<S>> {
    vec![
        DefaultRule {
            field: "infra.serviceAccount",
            condition: |s| s.infra().service_account.is_none(),
            apply: |s, c| s.infra_mut().service_account = Some(c.platform.service_account.clone()),
        },
        DefaultRule {
            field: "infra.namespace",
            condition: |s| s.infra().namespace.is_none(),
            apply: |s, c| s.infra_mut().namespace = Some(c.namespace.to_string()),
        },
        DefaultRule {
            field: "infra.version",
            condition: |s| s.infra().version.is_none(),
            apply: |s, c| s.infra_mut().version = Some(c.platform.version.clone()),
        },
        DefaultRule {
            field: "infra.platform",
            condition: |s| s.infra().platform.is_none(),
            apply: |s, c| s.infra_mut().platform = Some(c.platform.platform.clone()),
        },
        DefaultRule {
            field: "common.imagePullSecret",
            condition: |s| s.common().image_pull_secret.is_none(),
            apply: |s, _| s.common_mut().image_pull_secret = Some(DEFAULT_IMAGE_PULL_SECRET.to_string()),
        },
    ]
}

fn database_secret_rule<S: BaseSpec>() -> DefaultRule<S> {
    DefaultRule {
        field: "common.databaseSecret",
        condition: |s| s.common().database_secret.is_none(),
        apply: |s, c| s.common_mut().database_secret = Some(default_database_secret(c.name)),
    }
}

fn default_gateway(address: &mut GatewayAddress, name: &str) {
    if address.host.is_none() {
        address.host = Some(format!("{name}-gateway"));
    }
    if address.port.is_none() {
        address.port = Some(GATEWAY_PORT);
    }
}

/// Composite rules
pub fn csp_rules() -> Vec<DefaultRule<AquaCspSpec>> {
    let mut rules = base_rules::<AquaCspSpec>();
    rules.extend([
        DefaultRule {
            field: "infra.requirements",
            condition: |s: &AquaCspSpec| s.infra.requirements.is_none(),
            apply: |s: &mut AquaCspSpec, _: &DefaultingContext<'_>| s.infra.requirements = Some(true),
        },
        DefaultRule {
            field: "common.dbDiskSize",
            condition: |s| s.common.db_disk_size.is_none(),
            apply: |s, _| s.common.db_disk_size = Some(DEFAULT_DB_DISK_SIZE_GI),
        },
        DefaultRule {
            field: "common.databaseSecret",
            condition: |s| s.common.database_secret.is_none(),
            apply: |s, c| {
                let external = s
                    .external_db
                    .as_ref()
                    .and_then(|db| db.password_secret.clone());
                s.common.database_secret = Some(external.unwrap_or_else(|| default_database_secret(c.name)));
            },
        },
        DefaultRule {
            field: "database",
            condition: |s| s.manages_database() && deployment_incomplete(&s.database, &DATABASE_TIER),
            apply: |s, c| fill_deployment(&mut s.database, &DATABASE_TIER, c, s.infra.version.as_deref()),
        },
        DefaultRule {
            field: "gateway",
            condition: |s| deployment_incomplete(&s.gateway, &GATEWAY_TIER),
            apply: |s, c| fill_deployment(&mut s.gateway, &GATEWAY_TIER, c, s.infra.version.as_deref()),
        },
        DefaultRule {
            field: "server",
            condition: |s| deployment_incomplete(&s.server, &SERVER_TIER),
            apply: |s, c| fill_deployment(&mut s.server, &SERVER_TIER, c, s.infra.version.as_deref()),
        },
        DefaultRule {
            field: "enforcer.deploy",
            condition: |s| {
                s.enforcer
                    .as_ref()
                    .is_some_and(|e| deployment_incomplete(&e.deploy, &ENFORCER_TIER))
            },
            apply: |s, c| {
                let version = s.infra.version.clone();
                if let Some(enforcer) = s.enforcer.as_mut() {
                    fill_deployment(&mut enforcer.deploy, &ENFORCER_TIER, c, version.as_deref());
                }
            },
        },
        DefaultRule {
            field: "kubeEnforcer.deploy",
            condition: |s| {
                s.kube_enforcer
                    .as_ref()
                    .is_some_and(|k| deployment_incomplete(&k.deploy, &KUBE_ENFORCER_TIER))
            },
            apply: |s, c| {
                let version = s.infra.version.clone();
                if let Some(kube_enforcer) = s.kube_enforcer.as_mut() {
                    fill_deployment(&mut kube_enforcer.deploy, &KUBE_ENFORCER_TIER, c, version.as_deref());
                }
            },
        },
        DefaultRule {
            field: "kubeEnforcer.starboard.deploy",
            condition: |s| {
                s.kube_enforcer
                    .as_ref()
                    .and_then(|k| k.starboard.as_ref())
                    .is_some_and(|sb| deployment_incomplete(&sb.deploy, &STARBOARD_TIER))
            },
            apply: |s, c| {
                if let Some(starboard) = s.kube_enforcer.as_mut().and_then(|k| k.starboard.as_mut()) {
                    fill_deployment(&mut starboard.deploy, &STARBOARD_TIER, c, None);
                }
            },
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn database_rules() -> Vec<DefaultRule<AquaDatabaseSpec>> {
    let mut rules = base_rules::<AquaDatabaseSpec>();
    rules.extend([
        DefaultRule {
            field: "common.dbDiskSize",
            condition: |s: &AquaDatabaseSpec| s.common.db_disk_size.is_none(),
            apply: |s: &mut AquaDatabaseSpec, _: &DefaultingContext<'_>| {
                s.common.db_disk_size = Some(DEFAULT_DB_DISK_SIZE_GI)
            },
        },
        database_secret_rule(),
        DefaultRule {
            field: "deploy",
            condition: |s| deployment_incomplete(&s.deploy, &DATABASE_TIER),
            apply: |s, c| fill_deployment(&mut s.deploy, &DATABASE_TIER, c, s.infra.version.as_deref()),
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn gateway_rules() -> Vec<DefaultRule<AquaGatewaySpec>> {
    let mut rules = base_rules::<AquaGatewaySpec>();
    rules.extend([
        database_secret_rule(),
        DefaultRule {
            field: "deploy",
            condition: |s: &AquaGatewaySpec| deployment_incomplete(&s.deploy, &GATEWAY_TIER),
            apply: |s: &mut AquaGatewaySpec, c: &DefaultingContext<'_>| {
                fill_deployment(&mut s.deploy, &GATEWAY_TIER, c, s.infra.version.as_deref())
            },
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn server_rules() -> Vec<DefaultRule<AquaServerSpec>> {
    let mut rules = base_rules::<AquaServerSpec>();
    rules.extend([
        database_secret_rule(),
        DefaultRule {
            field: "deploy",
            condition: |s: &AquaServerSpec| deployment_incomplete(&s.deploy, &SERVER_TIER),
            apply: |s: &mut AquaServerSpec, c: &DefaultingContext<'_>| {
                fill_deployment(&mut s.deploy, &SERVER_TIER, c, s.infra.version.as_deref())
            },
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn enforcer_rules() -> Vec<DefaultRule<AquaEnforcerSpec>> {
    let mut rules = base_rules::<AquaEnforcerSpec>();
    rules.extend([
        DefaultRule {
            field: "deploy",
            condition: |s: &AquaEnforcerSpec| deployment_incomplete(&s.deploy, &ENFORCER_TIER),
            apply: |s: &mut AquaEnforcerSpec, c: &DefaultingContext<'_>| {
                fill_deployment(&mut s.deploy, &ENFORCER_TIER, c, s.infra.version.as_deref())
            },
        },
        DefaultRule {
            field: "gateway",
            condition: |s| s.gateway.host.is_none() || s.gateway.port.is_none(),
            apply: |s, c| default_gateway(&mut s.gateway, c.name),
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn kube_enforcer_rules() -> Vec<DefaultRule<AquaKubeEnforcerSpec>> {
    let mut rules = base_rules::<AquaKubeEnforcerSpec>();
    rules.extend([
        DefaultRule {
            field: "deploy",
            condition: |s: &AquaKubeEnforcerSpec| {
                deployment_incomplete(&s.deploy, &KUBE_ENFORCER_TIER)
            },
            apply: |s: &mut AquaKubeEnforcerSpec, c: &DefaultingContext<'_>| {
                fill_deployment(&mut s.deploy, &KUBE_ENFORCER_TIER, c, s.infra.version.as_deref())
            },
        },
        DefaultRule {
            field: "gateway",
            condition: |s| s.gateway.host.is_none() || s.gateway.port.is_none(),
            apply: |s, c| default_gateway(&mut s.gateway, c.name),
        },
        DefaultRule {
            field: "starboard.deploy",
            condition: |s| {
                s.starboard
                    .as_ref()
                    .is_some_and(|sb| deployment_incomplete(&sb.deploy, &STARBOARD_TIER))
            },
            apply: |s, c| {
                if let Some(starboard) = s.starboard.as_mut() {
                    fill_deployment(&mut starboard.deploy, &STARBOARD_TIER, c, None);
                }
            },
        },
        DefaultRule {
            field: "runAsNonRoot",
            condition: |s| s.run_as_non_root.is_none(),
            apply: |s, _| s.run_as_non_root = Some(false),
        },
    ]);
    rules
}

pub fn starboard_rules() -> Vec<DefaultRule<AquaStarboardSpec>> {
    let mut rules = base_rules::<AquaStarboardSpec>();
    rules.extend([
        DefaultRule {
            field: "deploy",
            condition: |s: &AquaStarboardSpec| deployment_incomplete(&s.deploy, &STARBOARD_TIER),
            apply: |s: &mut AquaStarboardSpec, c: &DefaultingContext<'_>| {
                fill_deployment(&mut s.deploy, &STARBOARD_TIER, c, None)
            },
        },
        // The deprecated top-level field only fills the newer one; either way it is cleared.
        DefaultRule {
            field: "batchDeleteDelay",
            condition: |s| s.batch_delete_delay.is_some(),
            apply: |s, _| {
                let alias = s.batch_delete_delay.take();
                if s.config.batch_delete_delay.is_none() {
                    s.config.batch_delete_delay = alias;
                }
            },
        },
        DefaultRule {
            field: "config.batchDeleteLimit",
            condition: |s| s.config.batch_delete_limit.is_none(),
            apply: |s, _| s.config.batch_delete_limit = Some(DEFAULT_BATCH_DELETE_LIMIT),
        },
        DefaultRule {
            field: "config.batchDeleteDelay",
            condition: |s| s.config.batch_delete_delay.is_none(),
            apply: |s, _| s.config.batch_delete_delay = Some(DEFAULT_BATCH_DELETE_DELAY.to_string()),
        },
    ]);
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CspEnforcerSpec, ExternalDbSpec, StarboardConfig};

    fn ctx(platform: &PlatformDefaults) -> DefaultingContext<'_> {
        DefaultingContext {
            name: "aqua",
            namespace: "aqua-system",
            platform,
        }
    }

    fn assert_idempotent<S: Clone + PartialEq + std::fmt::Debug>(spec: S, rules: &[DefaultRule<S>]) {
        let platform = PlatformDefaults::default();
        let once = normalize(&spec, rules, &ctx(&platform));
        let twice = normalize(&once, rules, &ctx(&platform));
        assert_eq!(once, twice);
        assert!(pending_fields(&once, rules).is_empty());
    }

    #[test]
    fn test_normalization_is_idempotent_for_every_kind() {
        assert_idempotent(AquaCspSpec::default(), &csp_rules());
        assert_idempotent(
            AquaCspSpec {
                enforcer: Some(CspEnforcerSpec::default()),
                external_db: Some(ExternalDbSpec {
                    host: "db.example.com".to_string(),
                    ..ExternalDbSpec::default()
                }),
                ..AquaCspSpec::default()
            },
            &csp_rules(),
        );
        assert_idempotent(AquaDatabaseSpec::default(), &database_rules());
        assert_idempotent(AquaGatewaySpec::default(), &gateway_rules());
        assert_idempotent(AquaServerSpec::default(), &server_rules());
        assert_idempotent(AquaEnforcerSpec::default(), &enforcer_rules());
        assert_idempotent(AquaKubeEnforcerSpec::default(), &kube_enforcer_rules());
        assert_idempotent(
            AquaStarboardSpec {
                batch_delete_delay: Some("30s".to_string()),
                ..AquaStarboardSpec::default()
            },
            &starboard_rules(),
        );
    }

    #[test]
    fn test_gateway_and_server_default_to_single_cluster_ip_replica() {
        let platform = PlatformDefaults::default();
        let spec = AquaCspSpec {
            database: Some(DeploymentSpec {
                replicas: Some(1),
                ..DeploymentSpec::default()
            }),
            ..AquaCspSpec::default()
        };
        let normalized = normalize(&spec, &csp_rules(), &ctx(&platform));

        for tier in [&normalized.gateway, &normalized.server] {
            let tier = tier.as_ref().unwrap();
            assert_eq!(tier.replicas, Some(1));
            assert_eq!(tier.service.as_deref(), Some("ClusterIP"));
        }
        let gateway_image = normalized.gateway.unwrap().image.unwrap();
        assert_eq!(
            gateway_image.reference(),
            format!("{DEFAULT_REGISTRY}/gateway:{DEFAULT_VERSION}")
        );
    }

    #[test]
    fn test_user_values_are_kept() {
        let platform = PlatformDefaults::default();
        let spec = AquaCspSpec {
            infra: InfrastructureSpec {
                version: Some("6.5".to_string()),
                ..InfrastructureSpec::default()
            },
            server: Some(DeploymentSpec {
                replicas: Some(3),
                service: Some("LoadBalancer".to_string()),
                ..DeploymentSpec::default()
            }),
            ..AquaCspSpec::default()
        };
        let normalized = normalize(&spec, &csp_rules(), &ctx(&platform));
        let server = normalized.server.unwrap();
        assert_eq!(server.replicas, Some(3));
        assert_eq!(server.service.as_deref(), Some("LoadBalancer"));
        assert_eq!(server.image.unwrap().tag.as_deref(), Some("6.5"));
        assert_eq!(normalized.infra.namespace.as_deref(), Some("aqua-system"));
    }

    #[test]
    fn test_external_database_is_not_defaulted() {
        let platform = PlatformDefaults::default();
        let spec = AquaCspSpec {
            external_db: Some(ExternalDbSpec {
                host: "db.example.com".to_string(),
                password_secret: Some(SecretRef {
                    name: "external-db".to_string(),
                    key: "password".to_string(),
                }),
                ..ExternalDbSpec::default()
            }),
            ..AquaCspSpec::default()
        };
        let normalized = normalize(&spec, &csp_rules(), &ctx(&platform));
        assert!(normalized.database.is_none());
        assert_eq!(normalized.common.database_secret.unwrap().name, "external-db");
    }

    #[test]
    fn test_newer_batch_delete_delay_wins_over_alias() {
        let platform = PlatformDefaults::default();
        let spec = AquaStarboardSpec {
            batch_delete_delay: Some("30s".to_string()),
            config: StarboardConfig {
                batch_delete_delay: Some("5s".to_string()),
                batch_delete_limit: Some(7),
                ..StarboardConfig::default()
            },
            ..AquaStarboardSpec::default()
        };
        let normalized = normalize(&spec, &starboard_rules(), &ctx(&platform));
        assert_eq!(normalized.config.batch_delete_delay.as_deref(), Some("5s"));
        assert_eq!(normalized.config.batch_delete_limit, Some(7));
        assert!(normalized.batch_delete_delay.is_none());
    }

    #[test]
    fn test_alias_fills_batch_delete_delay_when_newer_field_unset() {
        let platform = PlatformDefaults::default();
        let spec = AquaStarboardSpec {
            batch_delete_delay: Some("30s".to_string()),
            ..AquaStarboardSpec::default()
        };
        let normalized = normalize(&spec, &starboard_rules(), &ctx(&platform));
        assert_eq!(normalized.config.batch_delete_delay.as_deref(), Some("30s"));
        assert_eq!(
            normalized.config.batch_delete_limit,
            Some(DEFAULT_BATCH_DELETE_LIMIT)
        );
    }

    #[test]
    fn test_enforcer_gateway_defaults_to_sibling_service() {
        let platform = PlatformDefaults::default();
        let normalized = normalize(&AquaEnforcerSpec::default(), &enforcer_rules(), &ctx(&platform));
        assert_eq!(normalized.gateway.endpoint(), "aqua-gateway:8443");
    }

    #[test]
    fn test_starboard_uses_its_own_registry_and_tag() {
        let platform = PlatformDefaults::default();
        let normalized = normalize(&AquaStarboardSpec::default(), &starboard_rules(), &ctx(&platform));
        let image = normalized.deploy.unwrap().image.unwrap();
        assert_eq!(
            image.reference(),
            format!("{STARBOARD_REGISTRY}/starboard-operator:{STARBOARD_VERSION}")
        );
    }
}
