//! Database tier: generated password secret, volume, service and deployment.
//! With `splitDB` a second, identical stack holds audit data.

use super::{
    container, deployment, object_meta, pod_spec, pod_template, secret, secret_env, service,
    service_port, tier_labels, check_version, env, DesiredChild, TierPlan, ConfigError,
};
use crate::constants::{DATABASE_PORT, DEFAULT_DB_DISK_SIZE_GI};
use crate::controller::defaults::{database_secret_name, DATABASE_SECRET_KEY};
use crate::crd::{AquaDatabaseSpec, SecretRef};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, Secret, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

const DATA_DIR: &str = "/var/lib/postgresql/data";

pub fn database_name(name: &str) -> String {
    format!("{name}-database")
}

pub fn audit_database_name(name: &str) -> String {
    format!("{name}-audit-database")
}

/// Secret holding a freshly generated password
///
/// Synchronized create-only, so an existing password is never replaced.
pub fn build_password_secret(namespace: &str, app: &str, secret_ref: &SecretRef) -> Secret {
    let password = uuid::Uuid::new_v4().simple().to_string();
    secret(
        &secret_ref.name,
        namespace,
        app,
        [(secret_ref.key.clone(), password.into_bytes())],
    )
}

pub fn build_volume_claim(
    claim_name: &str,
    namespace: &str,
    app: &str,
    spec: &AquaDatabaseSpec,
) -> PersistentVolumeClaim {
    let size = spec.common.db_disk_size.unwrap_or(DEFAULT_DB_DISK_SIZE_GI);
    PersistentVolumeClaim {
        metadata: object_meta(claim_name, Some(namespace), tier_labels(app)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: spec.common.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format!("{size}Gi")),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

pub fn build_deployment(
    deploy_name: &str,
    namespace: &str,
    claim_name: &str,
    password: &SecretRef,
    spec: &AquaDatabaseSpec,
) -> Deployment {
    let deploy = spec.deploy.as_ref();
    let db = container(
        "database",
        deploy,
        Container {
            ports: Some(vec![ContainerPort {
                container_port: DATABASE_PORT,
                name: Some("postgres".to_string()),
                protocol: Some("TCP".to_string()),
                ..ContainerPort::default()
            }]),
            env: Some(vec![
                secret_env("POSTGRES_PASSWORD", password),
                env("PGDATA", format!("{DATA_DIR}/db-files")),
            ]),
            volume_mounts: Some(vec![VolumeMount {
                name: "postgres-db".to_string(),
                mount_path: DATA_DIR.to_string(),
                ..VolumeMount::default()
            }]),
            ..Container::default()
        },
    );
    let pod = pod_spec(
        spec.infra.service_account.as_deref(),
        &spec.common,
        spec.run_as_non_root,
        deploy,
        PodSpec {
            containers: vec![db],
            volumes: Some(vec![Volume {
                name: "postgres-db".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    read_only: None,
                }),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        },
    );
    let mut workload = deployment(
        deploy_name,
        namespace,
        deploy_name,
        deploy.map_or(1, |d| d.replica_count()),
        pod_template(deploy_name, None, pod),
    );
    // one writer per volume
    if let Some(workload_spec) = workload.spec.as_mut() {
        workload_spec.strategy = Some(DeploymentStrategy {
            type_: Some("Recreate".to_string()),
            rolling_update: None,
        });
    }
    workload
}

/// Children of one database stack (main or audit)
fn stack(
    stack_name: &str,
    claim_name: &str,
    namespace: &str,
    password: &SecretRef,
    spec: &AquaDatabaseSpec,
) -> Vec<DesiredChild> {
    let service_type = spec.deploy.as_ref().and_then(|d| d.service.as_deref());
    vec![
        DesiredChild::open(build_volume_claim(claim_name, namespace, stack_name, spec)),
        DesiredChild::open(service(
            stack_name,
            namespace,
            stack_name,
            service_type,
            vec![service_port("postgres", DATABASE_PORT, DATABASE_PORT)],
        )),
        DesiredChild::open(build_deployment(stack_name, namespace, claim_name, password, spec)),
    ]
}

pub fn plan(name: &str, namespace: &str, spec: &AquaDatabaseSpec) -> Result<TierPlan, ConfigError> {
    check_version(&spec.infra, &spec.common)?;
    let app = database_name(name);
    let password = spec.common.database_secret.clone().unwrap_or_else(|| SecretRef {
        name: database_secret_name(name),
        key: DATABASE_SECRET_KEY.to_string(),
    });

    let mut children = Vec::new();
    // a user-supplied secret is theirs to manage
    if password.name == database_secret_name(name) {
        children.push(DesiredChild::create_only(build_password_secret(
            namespace, &app, &password,
        )));
    }
    children.extend(stack(&app, &format!("{name}-db-pvc"), namespace, &password, spec));
    if spec.common.split_db {
        children.extend(stack(
            &audit_database_name(name),
            &format!("{name}-audit-db-pvc"),
            namespace,
            &password,
            spec,
        ));
    }

    Ok(TierPlan {
        children,
        composed: Vec::new(),
        pod_selector: Some(super::selector_labels(&app)),
    }
    .ordered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::object::{Object, ObjectKind};
    use crate::controller::sync::UpdateGate;
    use crate::crd::CommonSpec;

    fn spec() -> AquaDatabaseSpec {
        AquaDatabaseSpec {
            common: CommonSpec {
                database_secret: Some(SecretRef {
                    name: "aqua-database-password".to_string(),
                    key: "db-password".to_string(),
                }),
                db_disk_size: Some(20),
                ..CommonSpec::default()
            },
            ..AquaDatabaseSpec::default()
        }
    }

    #[test]
    fn test_plan_children_in_sync_order() {
        let plan = plan("aqua", "aqua-system", &spec()).unwrap();
        assert_eq!(
            plan.child_names(),
            vec![
                "Secret/aqua-database-password",
                "PersistentVolumeClaim/aqua-db-pvc",
                "Service/aqua-database",
                "Deployment/aqua-database",
            ]
        );
        assert_eq!(plan.children[0].gate, UpdateGate::CreateOnly);
    }

    #[test]
    fn test_volume_size_from_spec() {
        let plan = plan("aqua", "aqua-system", &spec()).unwrap();
        let Object::PersistentVolumeClaim(pvc) = &plan.children[1].object else {
            panic!("expected claim");
        };
        let requests = pvc.spec.as_ref().unwrap().resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"], Quantity("20Gi".to_string()));
    }

    #[test]
    fn test_split_db_adds_audit_stack() {
        let mut spec = spec();
        spec.common.split_db = true;
        let plan = plan("aqua", "aqua-system", &spec).unwrap();
        let deployments: Vec<_> = plan
            .children
            .iter()
            .filter(|c| c.object.kind() == ObjectKind::Deployment)
            .map(|c| c.object.name().to_string())
            .collect();
        assert_eq!(deployments, vec!["aqua-database", "aqua-audit-database"]);
    }

    #[test]
    fn test_user_secret_is_not_generated() {
        let mut spec = spec();
        spec.common.database_secret = Some(SecretRef {
            name: "my-db".to_string(),
            key: "pw".to_string(),
        });
        let plan = plan("aqua", "aqua-system", &spec).unwrap();
        assert!(plan
            .children
            .iter()
            .all(|c| c.object.kind() != ObjectKind::Secret));
    }
}
