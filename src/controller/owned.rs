//! # Owned Entries
//!
//! Workloads accept env vars, mounts and volumes added by others, so the
//! synchronizer has to tell its own entries apart from foreign ones. Every
//! Deployment and DaemonSet the operator writes records the names it wrote in
//! the [`OWNED_ENTRIES_ANNOTATION`] annotation:
//!
//! - env vars by name, per container
//! - volume mounts by mount path, per container
//! - volumes by name
//!
//! On update, a live entry missing from the desired object is kept only when
//! the previous record does not list it.

use crate::constants::OWNED_ENTRIES_ANNOTATION;
use crate::controller::object::Object;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntries {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub env: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mounts: BTreeSet<String>,
}

/// Entries of one workload's pod template written by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedEntries {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub volumes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerEntries>,
}

impl OwnedEntries {
    pub fn of_template(template: &PodTemplateSpec) -> Self {
        let Some(spec) = &template.spec else {
            return Self::default();
        };
        Self {
            volumes: spec.volumes.iter().flatten().map(|v| v.name.clone()).collect(),
            containers: spec
                .containers
                .iter()
                .map(|c| {
                    let entries = ContainerEntries {
                        env: c.env.iter().flatten().map(|e| e.name.clone()).collect(),
                        mounts: c
                            .volume_mounts
                            .iter()
                            .flatten()
                            .map(|m| m.mount_path.clone())
                            .collect(),
                    };
                    (c.name.clone(), entries)
                })
                .collect(),
        }
    }

    /// Record carried by a live object, empty when absent or unreadable
    pub fn recorded(meta: &ObjectMeta) -> Self {
        let Some(raw) = meta
            .annotations
            .as_ref()
            .and_then(|a| a.get(OWNED_ENTRIES_ANNOTATION))
        else {
            return Self::default();
        };
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(
                object = meta.name.as_deref().unwrap_or_default(),
                error = %e,
                "Ignoring unreadable owned-entries annotation"
            );
            Self::default()
        })
    }

    /// Write the record of `object`'s own pod template onto it
    ///
    /// Objects without a pod template are left alone.
    pub fn stamp(object: &mut Object) {
        let Some(template) = pod_template(object) else {
            return;
        };
        let Ok(record) = serde_json::to_string(&Self::of_template(template)) else {
            return;
        };
        object
            .meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(OWNED_ENTRIES_ANNOTATION.to_string(), record);
    }

    pub fn owns_volume(&self, name: &str) -> bool {
        self.volumes.contains(name)
    }

    pub fn owns_env(&self, container: &str, name: &str) -> bool {
        self.containers
            .get(container)
            .is_some_and(|c| c.env.contains(name))
    }

    pub fn owns_mount(&self, container: &str, mount_path: &str) -> bool {
        self.containers
            .get(container)
            .is_some_and(|c| c.mounts.contains(mount_path))
    }

    /// Whether `live` still carries an entry recorded here that `desired` dropped
    pub fn has_stale(&self, live: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
        let wanted = Self::of_template(desired);
        let current = Self::of_template(live);

        let stale_volume = current
            .volumes
            .iter()
            .any(|v| self.owns_volume(v) && !wanted.owns_volume(v));
        stale_volume
            || current.containers.iter().any(|(container, entries)| {
                entries
                    .env
                    .iter()
                    .any(|e| self.owns_env(container, e) && !wanted.owns_env(container, e))
                    || entries.mounts.iter().any(|m| {
                        self.owns_mount(container, m) && !wanted.owns_mount(container, m)
                    })
            })
    }
}

/// Pod template of a workload object
pub fn pod_template(object: &Object) -> Option<&PodTemplateSpec> {
    match object {
        Object::Deployment(d) => d.spec.as_ref().map(|s| &s.template),
        Object::DaemonSet(d) => d.spec.as_ref().map(|s| &s.template),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, Volume, VolumeMount};

    fn template(env: &[&str], mounts: &[&str], volumes: &[&str]) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "gateway".to_string(),
                    env: Some(
                        env.iter()
                            .map(|n| EnvVar {
                                name: (*n).to_string(),
                                value: Some("1".to_string()),
                                value_from: None,
                            })
                            .collect(),
                    ),
                    volume_mounts: Some(
                        mounts
                            .iter()
                            .map(|p| VolumeMount {
                                name: "certs".to_string(),
                                mount_path: (*p).to_string(),
                                ..VolumeMount::default()
                            })
                            .collect(),
                    ),
                    ..Container::default()
                }],
                volumes: Some(
                    volumes
                        .iter()
                        .map(|n| Volume {
                            name: (*n).to_string(),
                            ..Volume::default()
                        })
                        .collect(),
                ),
                ..PodSpec::default()
            }),
        }
    }

    fn deployment(template: PodTemplateSpec) -> Object {
        Object::from(Deployment {
            metadata: ObjectMeta {
                name: Some("aqua-gateway".to_string()),
                namespace: Some("aqua".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                template,
                ..DeploymentSpec::default()
            }),
            status: None,
        })
    }

    #[test]
    fn test_stamp_round_trips_through_annotation() {
        let mut object = deployment(template(&["AQUA_ROOT_CA"], &["/opt/aquasec/ssl"], &["certs"]));
        OwnedEntries::stamp(&mut object);

        let recorded = OwnedEntries::recorded(object.meta());
        assert!(recorded.owns_env("gateway", "AQUA_ROOT_CA"));
        assert!(recorded.owns_mount("gateway", "/opt/aquasec/ssl"));
        assert!(recorded.owns_volume("certs"));
        assert!(!recorded.owns_env("server", "AQUA_ROOT_CA"));
    }

    #[test]
    fn test_non_workloads_are_not_stamped() {
        let mut object = Object::from(ConfigMap::default());
        OwnedEntries::stamp(&mut object);
        assert!(object.meta().annotations.is_none());
    }

    #[test]
    fn test_unreadable_record_is_empty() {
        let meta = ObjectMeta {
            annotations: Some(BTreeMap::from([(
                OWNED_ENTRIES_ANNOTATION.to_string(),
                "not json".to_string(),
            )])),
            ..ObjectMeta::default()
        };
        assert_eq!(OwnedEntries::recorded(&meta), OwnedEntries::default());
    }

    #[test]
    fn test_dropped_owned_entry_is_stale_but_foreign_entry_is_not() {
        let previous = OwnedEntries::of_template(&template(&["AQUA_ROOT_CA"], &[], &[]));
        let live = template(&["AQUA_ROOT_CA", "HTTP_PROXY"], &[], &[]);

        assert!(previous.has_stale(&live, &template(&[], &[], &[])));
        assert!(!previous.has_stale(&live, &template(&["AQUA_ROOT_CA"], &[], &[])));

        let foreign_only = template(&["HTTP_PROXY"], &[], &[]);
        assert!(!previous.has_stale(&foreign_only, &template(&[], &[], &[])));
    }
}
