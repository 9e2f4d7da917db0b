//! Builders of the K8s objects which make up a running SPIRE server.
//!
//! Everything in here is a pure function of a `SpireServer` and the operator's
//! `OperandContext`. The scheduler decides what to do with the results.

mod configmap;
mod controller_manager;
mod operand;
mod rbac;
#[cfg(test)]
mod rbac_test;
mod route;
#[cfg(test)]
mod route_test;
mod server_config;
#[cfg(test)]
mod server_config_test;
mod service;
mod statefulset;
mod webhook;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use crate::config::Config;
use spire_core::crd::{RequiredMetadata, SpireServer};
use spire_core::OPERATOR_NAME;

pub use configmap::{bundle_configmap, controller_manager_configmap, server_configmap};
pub use controller_manager::{render_controller_manager_config, ControllerManagerConfig};
pub use operand::Operand;
pub use rbac::{rbac_objects, service_account};
pub use route::{federation_route, is_operator_managed, plan_route, route_api_resource, RouteAction, ROUTE_API_VERSION};
pub use server_config::{go_duration, render_server_config};
pub use service::{server_service, webhook_service};
pub use statefulset::{claim_templates_drifted, statefulset};
pub use webhook::validating_webhook_configuration;

/// The name shared by the server's ServiceAccount, ConfigMap, StatefulSet & Service.
pub const SERVER_NAME: &str = "spire-server";
/// The name of the controller manager's ConfigMap.
pub const CONTROLLER_MANAGER_NAME: &str = "spire-controller-manager";
/// The name of the controller manager's webhook Service & ValidatingWebhookConfiguration.
pub const WEBHOOK_NAME: &str = "spire-controller-manager-webhook";
/// The name of the Route exposing the federation bundle endpoint.
pub const FEDERATION_ROUTE_NAME: &str = "spire-server-federation";
/// The Secret holding the Web PKI serving cert of an `https_web` bundle endpoint.
pub const FEDERATION_TLS_SECRET: &str = "spire-server-federation-tls";

pub const SERVER_CONFIG_KEY: &str = "server.conf";
pub const CONTROLLER_MANAGER_CONFIG_KEY: &str = "controller-manager-config.yaml";

pub const SERVER_GRPC_PORT: i32 = 8081;
pub const SERVER_HEALTH_PORT: i32 = 8080;
pub const SERVER_METRICS_PORT: i32 = 9402;
pub const WEBHOOK_PORT: i32 = 9443;
pub const CONTROLLER_MANAGER_HEALTH_PORT: i32 = 8083;

pub const SERVER_CONFIG_DIR: &str = "/run/spire/config";
pub const SERVER_DATA_DIR: &str = "/run/spire/data";
pub const SERVER_SOCKET_DIR: &str = "/tmp/spire-server/private";
pub const FEDERATION_TLS_DIR: &str = "/run/spire/federation-tls";
pub const CONTROLLER_MANAGER_CONFIG_DIR: &str = "/run/spire/controller-manager";

pub const ANNOTATION_SERVER_CONFIG_HASH: &str = "spire.spiffe.io/server-config-hash";
pub const ANNOTATION_CONTROLLER_MANAGER_CONFIG_HASH: &str = "spire.spiffe.io/controller-manager-config-hash";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const COMPONENT_SERVER: &str = "server";
pub const COMPONENT_CONTROLLER_MANAGER: &str = "controller-manager";
pub const COMPONENT_BUNDLE: &str = "bundle";
pub const COMPONENT_RBAC: &str = "rbac";
pub const COMPONENT_WEBHOOK: &str = "webhook";
pub const COMPONENT_FEDERATION: &str = "federation";

/// Operator runtime values needed to render operands.
#[derive(Clone, Debug, PartialEq)]
pub struct OperandContext {
    /// The namespace into which all namespaced operands are placed.
    pub namespace: String,
    pub server_image: String,
    pub controller_manager_image: String,
}

impl From<&Config> for OperandContext {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            server_image: config.spire_server_image.clone(),
            controller_manager_image: config.spire_controller_manager_image.clone(),
        }
    }
}

/// The label set applied to every operand of the given component.
///
/// The user's `spec.labels` are applied first, so they can never override the operator's own
/// labels which selectors & watchers depend upon.
pub fn labels(server: &SpireServer, component: &str) -> BTreeMap<String, String> {
    let mut labels = server.spec.labels.clone();
    set_cannonical_labels(&mut labels, server, component);
    labels
}

/// The labels used to select the server's pods.
pub fn selector_labels(server: &SpireServer) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.into(), SERVER_NAME.into());
    labels.insert(LABEL_INSTANCE.into(), server.name().into());
    labels.insert(LABEL_COMPONENT.into(), COMPONENT_SERVER.into());
    labels
}

/// Set the cannonical labels on an object controlled by the operator.
fn set_cannonical_labels(labels: &mut BTreeMap<String, String>, server: &SpireServer, component: &str) {
    labels.insert(LABEL_NAME.into(), SERVER_NAME.into());
    labels.insert(LABEL_INSTANCE.into(), server.name().into());
    labels.insert(LABEL_COMPONENT.into(), component.into());
    labels.insert(LABEL_PART_OF.into(), "spire".into());
    labels.insert(LABEL_MANAGED_BY.into(), OPERATOR_NAME.into());
}

/// The controller owner reference pointing at the given server, `None` until it has a UID.
pub fn owner_reference(server: &SpireServer) -> Option<OwnerReference> {
    let meta = server.meta();
    Some(OwnerReference {
        api_version: SpireServer::api_version(&()).into_owned(),
        kind: SpireServer::kind(&()).into_owned(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Build the metadata of an operand owned by the given server.
///
/// Pass `None` as the namespace for cluster scoped objects.
pub fn object_meta(server: &SpireServer, name: &str, namespace: Option<&str>, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(String::from),
        labels: Some(labels(server, component)),
        owner_references: owner_reference(server).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Overlay the operator's metadata onto an object loaded from an embedded manifest.
pub fn overlay_meta(meta: &mut ObjectMeta, server: &SpireServer, namespace: Option<&str>, component: &str) {
    meta.namespace = namespace.map(String::from);
    let labels = meta.labels.get_or_insert_with(Default::default);
    for (key, val) in server.spec.labels.iter() {
        labels.entry(key.clone()).or_insert_with(|| val.clone());
    }
    set_cannonical_labels(labels, server, component);
    meta.owner_references = owner_reference(server).map(|owner| vec![owner]);
}

/// A stable hash of a rendered config document, used to roll pods on config changes.
pub fn config_hash(data: &str) -> String {
    format!("{:016x}", seahash::hash(data.as_bytes()))
}
