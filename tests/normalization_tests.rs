//! # Normalization Tests
//!
//! Defaulting tables are idempotent for every entity kind, and the CRDs
//! generated from the same types carry the expected identity.

use aqua_operator::controller::defaults::{normalize, pending_fields, DefaultingContext, PlatformDefaults};
use aqua_operator::controller::entity::Entity;
use aqua_operator::crd::{
    AquaCsp, AquaCspSpec, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer,
    AquaKubeEnforcerSpec, AquaServer, AquaStarboard, CspEnforcerSpec, CspKubeEnforcerSpec,
    DeploymentSpec, ExternalDbSpec, ImageSpec, StarboardDetails,
};
use kube::core::CustomResourceExt;

fn assert_idempotent<E: Entity>(spec: &E::Spec) {
    let platform = PlatformDefaults::default();
    let ctx = DefaultingContext {
        name: "aqua",
        namespace: "aqua-system",
        platform: &platform,
    };
    let rules = E::defaulting_rules();

    let once = normalize(spec, &rules, &ctx);
    let twice = normalize(&once, &rules, &ctx);
    assert_eq!(once, twice, "{} normalization is not idempotent", E::KIND);
    assert!(
        pending_fields(&once, &rules).is_empty(),
        "{} left fields unset: {:?}",
        E::KIND,
        pending_fields(&once, &rules)
    );
}

#[test]
fn test_normalization_is_idempotent_for_every_kind() {
    assert_idempotent::<AquaCsp>(&AquaCspSpec::default());
    assert_idempotent::<AquaDatabase>(&Default::default());
    assert_idempotent::<AquaGateway>(&Default::default());
    assert_idempotent::<AquaServer>(&Default::default());
    assert_idempotent::<AquaEnforcer>(&Default::default());
    assert_idempotent::<AquaKubeEnforcer>(&Default::default());
    assert_idempotent::<AquaStarboard>(&Default::default());
}

#[test]
fn test_normalization_is_idempotent_for_partial_specs() {
    let partial_deploy = DeploymentSpec {
        replicas: Some(3),
        image: Some(ImageSpec {
            tag: Some("6.5".to_string()),
            ..ImageSpec::default()
        }),
        ..DeploymentSpec::default()
    };
    assert_idempotent::<AquaCsp>(&AquaCspSpec {
        gateway: Some(partial_deploy.clone()),
        external_db: Some(ExternalDbSpec {
            host: "postgres.example.com".to_string(),
            password: Some("secret".to_string()),
            ..ExternalDbSpec::default()
        }),
        enforcer: Some(CspEnforcerSpec::default()),
        kube_enforcer: Some(CspKubeEnforcerSpec {
            starboard: Some(StarboardDetails::default()),
            ..CspKubeEnforcerSpec::default()
        }),
        ..AquaCspSpec::default()
    });
    assert_idempotent::<AquaKubeEnforcer>(&AquaKubeEnforcerSpec {
        deploy: Some(partial_deploy),
        starboard: Some(StarboardDetails::default()),
        ..AquaKubeEnforcerSpec::default()
    });
}

#[test]
fn test_user_values_survive_normalization() {
    let platform = PlatformDefaults::default();
    let ctx = DefaultingContext {
        name: "aqua",
        namespace: "aqua-system",
        platform: &platform,
    };
    let spec = AquaCspSpec {
        server: Some(DeploymentSpec {
            replicas: Some(2),
            service: Some("LoadBalancer".to_string()),
            ..DeploymentSpec::default()
        }),
        ..AquaCspSpec::default()
    };

    let normalized = normalize(&spec, &AquaCsp::defaulting_rules(), &ctx);
    let server = normalized.server.unwrap();
    assert_eq!(server.replicas, Some(2));
    assert_eq!(server.service.as_deref(), Some("LoadBalancer"));
    assert!(server.image.and_then(|i| i.tag).is_some());
}

#[test]
fn test_generated_crds() {
    let crds = [
        AquaCsp::crd(),
        AquaDatabase::crd(),
        AquaGateway::crd(),
        AquaServer::crd(),
        AquaEnforcer::crd(),
        AquaKubeEnforcer::crd(),
        AquaStarboard::crd(),
    ];
    for crd in &crds {
        assert_eq!(crd.spec.group, "operator.aquasec.com");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
        assert!(serde_yaml::to_string(crd).is_ok());
    }
    assert_eq!(crds[0].spec.names.kind, "AquaCsp");
}
