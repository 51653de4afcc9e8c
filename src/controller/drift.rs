//! # Drift Detection
//!
//! Decides whether a live object must be updated to match its desired form.
//!
//! Comparison is explicit per resource kind:
//!
//! - free-form maps and rule lists (ConfigMap/Secret data, RBAC rules, webhook
//!   rules, binding subjects) compare by an order-independent SHA-256 digest
//!   of their canonical JSON
//! - owned scalars (image, replica count, service type, env values the
//!   operator sets) compare by value
//! - additive collections (env vars, volumes, mounts, labels, annotations,
//!   pull secrets) only require the desired entries to be present; entries
//!   found only on the live object are drift only when the workload's
//!   owned-entries record lists them
//! - PersistentVolumeClaims never drift
//!
//! Fields the API server defaults (e.g. probe thresholds, service cluster IPs)
//! are tolerated because desired values are matched as JSON subsets.

use crate::controller::object::Object;
use crate::controller::owned::OwnedEntries;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Whether `found` differs from `desired` in any field the operator owns
pub fn has_drifted(found: &Object, desired: &Object) -> bool {
    !drifted_fields(found, desired).is_empty()
}

/// Names of the owned fields in which `found` differs from `desired`
pub fn drifted_fields(found: &Object, desired: &Object) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if found.kind() != desired.kind() {
        fields.push("kind");
        return fields;
    }

    match (found, desired) {
        // Immutable after binding
        (Object::PersistentVolumeClaim(_), Object::PersistentVolumeClaim(_)) => return fields,
        // Pods are observed, never synchronized
        (Object::Pod(_), Object::Pod(_)) => return fields,
        _ => {}
    }

    metadata_drift(found.meta(), desired.meta(), &mut fields);

    match (found, desired) {
        (Object::ConfigMap(f), Object::ConfigMap(d)) => {
            if map_digest(&f.data) != map_digest(&d.data)
                || map_digest(&f.binary_data) != map_digest(&d.binary_data)
            {
                fields.push("data");
            }
        }
        (Object::Secret(f), Object::Secret(d)) => {
            if map_digest(&f.data) != map_digest(&d.data) {
                fields.push("data");
            }
            if d.type_.is_some() && d.type_ != f.type_ {
                fields.push("type");
            }
        }
        (Object::ServiceAccount(f), Object::ServiceAccount(d)) => {
            let found_names: Vec<_> = f
                .image_pull_secrets
                .iter()
                .flatten()
                .map(|s| s.name.as_str())
                .collect();
            let missing = d
                .image_pull_secrets
                .iter()
                .flatten()
                .any(|s| !found_names.contains(&s.name.as_str()));
            if missing {
                fields.push("imagePullSecrets");
            }
        }
        (Object::Role(f), Object::Role(d)) => {
            if unordered_digest(f.rules.as_deref().unwrap_or_default())
                != unordered_digest(d.rules.as_deref().unwrap_or_default())
            {
                fields.push("rules");
            }
        }
        (Object::ClusterRole(f), Object::ClusterRole(d)) => {
            if unordered_digest(f.rules.as_deref().unwrap_or_default())
                != unordered_digest(d.rules.as_deref().unwrap_or_default())
            {
                fields.push("rules");
            }
        }
        (Object::RoleBinding(f), Object::RoleBinding(d)) => {
            if f.role_ref != d.role_ref {
                fields.push("roleRef");
            }
            if unordered_digest(f.subjects.as_deref().unwrap_or_default())
                != unordered_digest(d.subjects.as_deref().unwrap_or_default())
            {
                fields.push("subjects");
            }
        }
        (Object::ClusterRoleBinding(f), Object::ClusterRoleBinding(d)) => {
            if f.role_ref != d.role_ref {
                fields.push("roleRef");
            }
            if unordered_digest(f.subjects.as_deref().unwrap_or_default())
                != unordered_digest(d.subjects.as_deref().unwrap_or_default())
            {
                fields.push("subjects");
            }
        }
        (Object::ValidatingWebhookConfiguration(f), Object::ValidatingWebhookConfiguration(d)) => {
            if webhooks_drifted(to_value(&f.webhooks), to_value(&d.webhooks)) {
                fields.push("webhooks");
            }
        }
        (Object::MutatingWebhookConfiguration(f), Object::MutatingWebhookConfiguration(d)) => {
            if webhooks_drifted(to_value(&f.webhooks), to_value(&d.webhooks)) {
                fields.push("webhooks");
            }
        }
        (Object::Service(f), Object::Service(d)) => service_drift(f, d, &mut fields),
        (Object::Deployment(f), Object::Deployment(d)) => deployment_drift(f, d, &mut fields),
        (Object::DaemonSet(f), Object::DaemonSet(d)) => daemon_set_drift(f, d, &mut fields),
        (f, d) if d.kind().is_entity() => {
            if canonical_digest(&f.spec_value()) != canonical_digest(&d.spec_value()) {
                fields.push("spec");
            }
        }
        _ => {}
    }

    fields
}

fn metadata_drift(found: &ObjectMeta, desired: &ObjectMeta, fields: &mut Vec<&'static str>) {
    if !is_map_subset(&desired.labels, &found.labels) {
        fields.push("metadata.labels");
    }
    if !is_map_subset(&desired.annotations, &found.annotations) {
        fields.push("metadata.annotations");
    }
    let missing_owner = desired.owner_references.iter().flatten().any(|wanted| {
        !found
            .owner_references
            .iter()
            .flatten()
            .any(|r| r.uid == wanted.uid && r.controller == wanted.controller)
    });
    if missing_owner {
        fields.push("metadata.ownerReferences");
    }
}

fn service_drift(found: &Service, desired: &Service, fields: &mut Vec<&'static str>) {
    let Some(d) = &desired.spec else {
        return;
    };
    let Some(f) = &found.spec else {
        fields.push("spec");
        return;
    };
    let service_type = |t: &Option<String>| t.clone().unwrap_or_else(|| "ClusterIP".to_string());
    if d.type_.is_some() && service_type(&d.type_) != service_type(&f.type_) {
        fields.push("spec.type");
    }
    if d.selector.clone().unwrap_or_default() != f.selector.clone().unwrap_or_default() {
        fields.push("spec.selector");
    }
    let found_ports = f.ports.as_deref().unwrap_or_default();
    let desired_ports = d.ports.as_deref().unwrap_or_default();
    let ports_match = found_ports.len() == desired_ports.len()
        && desired_ports.iter().all(|dp| {
            found_ports
                .iter()
                .find(|fp| fp.name == dp.name && fp.port == dp.port)
                .is_some_and(|fp| is_subset(dp, fp))
        });
    if !ports_match {
        fields.push("spec.ports");
    }
}

fn deployment_drift(found: &Deployment, desired: &Deployment, fields: &mut Vec<&'static str>) {
    let Some(d) = &desired.spec else {
        return;
    };
    let Some(f) = &found.spec else {
        fields.push("spec");
        return;
    };
    if d.replicas.unwrap_or(1) != f.replicas.unwrap_or(1) {
        fields.push("spec.replicas");
    }
    if d.strategy.is_some() && !is_subset(&d.strategy, &f.strategy) {
        fields.push("spec.strategy");
    }
    if pod_template_drifted(&f.template, &d.template)
        || OwnedEntries::recorded(&found.metadata).has_stale(&f.template, &d.template)
    {
        fields.push("spec.template");
    }
}

fn daemon_set_drift(found: &DaemonSet, desired: &DaemonSet, fields: &mut Vec<&'static str>) {
    let Some(d) = &desired.spec else {
        return;
    };
    let Some(f) = &found.spec else {
        fields.push("spec");
        return;
    };
    if pod_template_drifted(&f.template, &d.template)
        || OwnedEntries::recorded(&found.metadata).has_stale(&f.template, &d.template)
    {
        fields.push("spec.template");
    }
}

/// Pod template comparison shared by Deployments and DaemonSets
pub fn pod_template_drifted(found: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let empty = ObjectMeta::default();
    let found_meta = found.metadata.as_ref().unwrap_or(&empty);
    let desired_meta = desired.metadata.as_ref().unwrap_or(&empty);
    if !is_map_subset(&desired_meta.labels, &found_meta.labels)
        || !is_map_subset(&desired_meta.annotations, &found_meta.annotations)
    {
        return true;
    }

    let Some(d) = &desired.spec else {
        return false;
    };
    let Some(f) = &found.spec else {
        return true;
    };

    if d.service_account_name.is_some() && d.service_account_name != f.service_account_name {
        return true;
    }
    if d.node_selector.clone().unwrap_or_default() != f.node_selector.clone().unwrap_or_default()
    {
        return true;
    }
    if unordered_digest(d.tolerations.as_deref().unwrap_or_default())
        != unordered_digest(f.tolerations.as_deref().unwrap_or_default())
    {
        return true;
    }
    if !is_subset(&d.affinity, &f.affinity) || !is_subset(&d.security_context, &f.security_context)
    {
        return true;
    }

    let found_pull_secrets: Vec<_> = f
        .image_pull_secrets
        .iter()
        .flatten()
        .map(|s| s.name.as_str())
        .collect();
    if d
        .image_pull_secrets
        .iter()
        .flatten()
        .any(|s| !found_pull_secrets.contains(&s.name.as_str()))
    {
        return true;
    }

    let found_volumes = f.volumes.as_deref().unwrap_or_default();
    let volumes_present = d.volumes.iter().flatten().all(|dv| {
        found_volumes
            .iter()
            .find(|fv| fv.name == dv.name)
            .is_some_and(|fv| is_subset(dv, fv))
    });
    if !volumes_present {
        return true;
    }

    d.containers.len() > f.containers.len()
        || d.containers.iter().any(|dc| {
            f.containers
                .iter()
                .find(|fc| fc.name == dc.name)
                .is_none_or(|fc| container_drifted(fc, dc))
        })
}

fn container_drifted(found: &Container, desired: &Container) -> bool {
    if desired.image != found.image {
        return true;
    }
    if desired.command.is_some() && desired.command != found.command {
        return true;
    }
    if desired.args.is_some() && desired.args != found.args {
        return true;
    }
    if !is_subset(&desired.resources, &found.resources)
        || !is_subset(&desired.liveness_probe, &found.liveness_probe)
        || !is_subset(&desired.readiness_probe, &found.readiness_probe)
        || !is_subset(&desired.security_context, &found.security_context)
    {
        return true;
    }

    let found_env = found.env.as_deref().unwrap_or_default();
    let env_present = desired.env.iter().flatten().all(|de| {
        found_env
            .iter()
            .find(|fe| fe.name == de.name)
            .is_some_and(|fe| is_subset(de, fe))
    });
    if !env_present {
        return true;
    }
    if !is_subset(&desired.env_from, &found.env_from) {
        return true;
    }

    let found_mounts = found.volume_mounts.as_deref().unwrap_or_default();
    let mounts_present = desired.volume_mounts.iter().flatten().all(|dm| {
        found_mounts
            .iter()
            .any(|fm| fm.name == dm.name && fm.mount_path == dm.mount_path)
    });
    if !mounts_present {
        return true;
    }

    let found_ports = found.ports.as_deref().unwrap_or_default();
    !desired.ports.iter().flatten().all(|dp| {
        found_ports
            .iter()
            .find(|fp| fp.container_port == dp.container_port)
            .is_some_and(|fp| is_subset(dp, fp))
    })
}

/// Webhook lists: rules compare as unordered sets, everything else as a subset
fn webhooks_drifted(found: Value, desired: Value) -> bool {
    let found_hooks = found.as_array().cloned().unwrap_or_default();
    let desired_hooks = desired.as_array().cloned().unwrap_or_default();
    if found_hooks.len() != desired_hooks.len() {
        return true;
    }
    desired_hooks.into_iter().any(|mut d| {
        let name = d.get("name").cloned();
        let Some(mut f) = found_hooks
            .iter()
            .find(|f| f.get("name") == name.as_ref())
            .cloned()
        else {
            return true;
        };
        let desired_rules = take_array(&mut d, "rules");
        let found_rules = take_array(&mut f, "rules");
        unordered_digest(&desired_rules) != unordered_digest(&found_rules)
            || !is_json_subset(&d, &f)
    })
}

fn take_array(value: &mut Value, field: &str) -> Vec<Value> {
    value
        .as_object_mut()
        .and_then(|m| m.remove(field))
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
}

fn is_map_subset(
    desired: &Option<BTreeMap<String, String>>,
    found: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    desired
        .iter()
        .all(|(k, v)| found.as_ref().and_then(|f| f.get(k)) == Some(v))
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Whether every field set on `desired` has the same value on `found`
pub fn is_subset<T: Serialize>(desired: &T, found: &T) -> bool {
    is_json_subset(&to_value(desired), &to_value(found))
}

/// JSON subset test: objects recurse per key, arrays match element-wise
pub fn is_json_subset(desired: &Value, found: &Value) -> bool {
    match (desired, found) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(f)) => d
            .iter()
            .all(|(k, v)| v.is_null() || f.get(k).is_some_and(|fv| is_json_subset(v, fv))),
        (Value::Array(d), Value::Array(f)) => {
            d.len() == f.len() && d.iter().zip(f).all(|(dv, fv)| is_json_subset(dv, fv))
        }
        (d, f) => d == f,
    }
}

/// Recursively sort object keys so serialization is deterministic
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// SHA-256 of the canonical JSON form of `value`
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> String {
    let canonical = canonicalize(to_value(value));
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex(&Sha256::digest(bytes))
}

/// Order-independent digest of a list
pub fn unordered_digest<T: Serialize>(items: &[T]) -> String {
    let mut digests: Vec<String> = items.iter().map(|i| canonical_digest(i)).collect();
    digests.sort();
    canonical_digest(&digests)
}

/// Digest of an optional map, treating `None` as empty
fn map_digest<V: Serialize>(map: &Option<BTreeMap<String, V>>) -> String {
    match map {
        Some(m) if !m.is_empty() => canonical_digest(m),
        _ => canonical_digest(&BTreeMap::<String, V>::new()),
    }
}
