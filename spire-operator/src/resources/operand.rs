//! Drift detection of operands.
//!
//! The API server populates lots of defaulted fields on the objects it stores, so a live object
//! never equals the one the operator renders. Each operand kind therefore compares only the
//! fields which the operator owns.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::admissionregistration::v1::{ValidatingWebhook, ValidatingWebhookConfiguration};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, Service, ServiceAccount, ServicePort};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A K8s object kind reconciled by the operator.
pub trait Operand: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Check if the live object has drifted from the desired one in any operator owned field.
    fn needs_update(existing: &Self, desired: &Self) -> bool {
        meta_drifted(existing.meta(), desired.meta()) || Self::spec_drifted(existing, desired)
    }

    /// Compare the kind specific operator owned fields.
    fn spec_drifted(existing: &Self, desired: &Self) -> bool;

    /// Carry server populated fields of the live object into the desired one.
    fn merge_existing(_desired: &mut Self, _existing: &Self) {}
}

/// Check that every desired label, annotation & owner reference is present on the live object.
pub fn meta_drifted(existing: &ObjectMeta, desired: &ObjectMeta) -> bool {
    let owners_drifted = desired.owner_references.iter().flatten().any(|owner| {
        !existing
            .owner_references
            .iter()
            .flatten()
            .any(|live| live.uid == owner.uid && live.controller == owner.controller)
    });
    map_drifted(existing.labels.as_ref(), desired.labels.as_ref()) || map_drifted(existing.annotations.as_ref(), desired.annotations.as_ref()) || owners_drifted
}

/// Check if any desired entry is missing from, or different in, the live map.
fn map_drifted(existing: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    let desired = match desired {
        Some(desired) => desired,
        None => return false,
    };
    desired.iter().any(|(key, val)| existing.and_then(|live| live.get(key)) != Some(val))
}

impl Operand for ServiceAccount {
    fn spec_drifted(_existing: &Self, _desired: &Self) -> bool {
        false
    }
}

impl Operand for ConfigMap {
    /// A ConfigMap rendered without data, such as the trust bundle, never drifts on its data.
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        desired.data.is_some() && existing.data != desired.data
    }
}

impl Operand for Service {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        let (existing, desired) = match (existing.spec.as_ref(), desired.spec.as_ref()) {
            (Some(existing), Some(desired)) => (existing, desired),
            (None, Some(_)) => return true,
            _ => return false,
        };
        let ports = |ports: &Option<Vec<ServicePort>>| {
            ports
                .iter()
                .flatten()
                .map(|port| (port.name.clone(), port.port, port.target_port.clone(), port.protocol.clone()))
                .collect::<Vec<_>>()
        };
        existing.selector != desired.selector || existing.type_ != desired.type_ || ports(&existing.ports) != ports(&desired.ports)
    }
}

impl Operand for StatefulSet {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        let (existing, desired) = match (existing.spec.as_ref(), desired.spec.as_ref()) {
            (Some(existing), Some(desired)) => (existing, desired),
            (None, Some(_)) => return true,
            _ => return false,
        };
        if existing.replicas != desired.replicas {
            return true;
        }
        let template_meta_drifted = match (existing.template.metadata.as_ref(), desired.template.metadata.as_ref()) {
            (Some(existing), Some(desired)) => meta_drifted(existing, desired),
            (None, Some(_)) => true,
            _ => false,
        };
        let pod_drifted = match (existing.template.spec.as_ref(), desired.template.spec.as_ref()) {
            (Some(existing), Some(desired)) => pod_spec_drifted(existing, desired),
            (None, Some(_)) => true,
            _ => false,
        };
        template_meta_drifted || pod_drifted
    }

    /// Volume claim templates are immutable, the live ones are always sent back unchanged.
    fn merge_existing(desired: &mut Self, existing: &Self) {
        let live_claims = existing.spec.as_ref().and_then(|spec| spec.volume_claim_templates.clone());
        if let (Some(spec), Some(claims)) = (desired.spec.as_mut(), live_claims) {
            spec.volume_claim_templates = Some(claims);
        }
    }
}

fn pod_spec_drifted(existing: &PodSpec, desired: &PodSpec) -> bool {
    if existing.containers.len() != desired.containers.len() {
        return true;
    }
    let containers_drifted = existing
        .containers
        .iter()
        .zip(desired.containers.iter())
        .any(|(existing, desired)| container_drifted(existing, desired));
    let volume_names = |spec: &PodSpec| spec.volumes.iter().flatten().map(|vol| vol.name.clone()).collect::<Vec<_>>();
    containers_drifted
        || volume_names(existing) != volume_names(desired)
        || existing.service_account_name != desired.service_account_name
        || existing.node_selector != desired.node_selector
        || existing.affinity != desired.affinity
        || existing.tolerations != desired.tolerations
}

fn container_drifted(existing: &Container, desired: &Container) -> bool {
    let mounts = |container: &Container| {
        container
            .volume_mounts
            .iter()
            .flatten()
            .map(|mount| (mount.name.clone(), mount.mount_path.clone()))
            .collect::<Vec<_>>()
    };
    let ports = |container: &Container| {
        container
            .ports
            .iter()
            .flatten()
            .map(|port| (port.name.clone(), port.container_port))
            .collect::<Vec<_>>()
    };
    existing.name != desired.name
        || existing.image != desired.image
        || existing.args != desired.args
        || existing.resources.as_ref().filter(|res| **res != Default::default()) != desired.resources.as_ref()
        || ports(existing) != ports(desired)
        || mounts(existing) != mounts(desired)
}

impl Operand for ClusterRole {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        existing.rules != desired.rules
    }
}

impl Operand for Role {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        existing.rules != desired.rules
    }
}

impl Operand for ClusterRoleBinding {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        existing.role_ref != desired.role_ref || existing.subjects != desired.subjects
    }
}

impl Operand for RoleBinding {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        existing.role_ref != desired.role_ref || existing.subjects != desired.subjects
    }
}

impl Operand for ValidatingWebhookConfiguration {
    fn spec_drifted(existing: &Self, desired: &Self) -> bool {
        let existing = existing.webhooks.as_deref().unwrap_or_default();
        let desired = desired.webhooks.as_deref().unwrap_or_default();
        existing.len() != desired.len() || existing.iter().zip(desired.iter()).any(|(existing, desired)| webhook_drifted(existing, desired))
    }

    /// The CA bundles are injected by the platform after creation, and must survive updates.
    fn merge_existing(desired: &mut Self, existing: &Self) {
        for webhook in desired.webhooks.iter_mut().flatten() {
            let live = existing.webhooks.iter().flatten().find(|live| live.name == webhook.name);
            if let Some(ca_bundle) = live.and_then(|live| live.client_config.ca_bundle.clone()) {
                webhook.client_config.ca_bundle = Some(ca_bundle);
            }
        }
    }
}

fn webhook_drifted(existing: &ValidatingWebhook, desired: &ValidatingWebhook) -> bool {
    existing.name != desired.name
        || existing.client_config != desired.client_config
        || webhook_rules(existing) != webhook_rules(desired)
        || existing.failure_policy != desired.failure_policy
        || existing.side_effects != desired.side_effects
        || existing.admission_review_versions != desired.admission_review_versions
}

type RuleFields<'a> = (&'a Option<Vec<String>>, &'a Option<Vec<String>>, &'a Option<Vec<String>>, &'a Option<Vec<String>>);

/// The rule fields of a webhook which are never defaulted by the API server.
fn webhook_rules(webhook: &ValidatingWebhook) -> Vec<RuleFields<'_>> {
    webhook
        .rules
        .iter()
        .flatten()
        .map(|rule| (&rule.api_groups, &rule.api_versions, &rule.operations, &rule.resources))
        .collect()
}
