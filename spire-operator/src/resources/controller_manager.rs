//! Config of the SPIRE controller manager sidecar.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{OperandContext, CONTROLLER_MANAGER_HEALTH_PORT, SERVER_SOCKET_DIR, WEBHOOK_NAME, WEBHOOK_PORT};
use spire_core::crd::SpireServer;

/// Namespaces whose pods never get SPIFFE IDs from the controller manager.
const IGNORED_NAMESPACES: &[&str] = &["kube-system", "kube-public", "openshift-*"];

/// The `ControllerManagerConfig` document read by the controller manager on startup.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerManagerConfig {
    pub api_version: String,
    pub kind: String,
    pub metrics: MetricsConfig,
    pub health: HealthConfig,
    pub leader_election: LeaderElectionConfig,
    pub webhook: WebhookConfig,
    pub validating_webhook_configuration_name: String,
    pub cluster_name: String,
    pub trust_domain: String,
    pub spire_server_socket_path: String,
    pub entry_id_prefix: String,
    pub ignore_namespaces: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    pub bind_address: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub health_probe_bind_address: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    pub leader_elect: bool,
    pub resource_name: String,
    pub resource_namespace: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub port: i32,
}

impl ControllerManagerConfig {
    /// Build the controller manager config for the given server.
    pub fn new(server: &SpireServer, ctx: &OperandContext) -> Self {
        let mut ignore_namespaces: Vec<String> = IGNORED_NAMESPACES.iter().map(|ns| ns.to_string()).collect();
        ignore_namespaces.push(ctx.namespace.clone());
        Self {
            api_version: "spire.spiffe.io/v1alpha1".into(),
            kind: "ControllerManagerConfig".into(),
            metrics: MetricsConfig {
                bind_address: "127.0.0.1:8082".into(),
            },
            health: HealthConfig {
                health_probe_bind_address: format!("0.0.0.0:{}", CONTROLLER_MANAGER_HEALTH_PORT),
            },
            leader_election: LeaderElectionConfig {
                leader_elect: true,
                resource_name: "spire-controller-manager-leader-election".into(),
                resource_namespace: ctx.namespace.clone(),
            },
            webhook: WebhookConfig { port: WEBHOOK_PORT },
            validating_webhook_configuration_name: WEBHOOK_NAME.into(),
            cluster_name: server.spec.cluster_name.clone(),
            trust_domain: server.spec.trust_domain.clone(),
            spire_server_socket_path: format!("{}/api.sock", SERVER_SOCKET_DIR),
            entry_id_prefix: server.spec.cluster_name.clone(),
            ignore_namespaces,
        }
    }
}

/// Render the controller manager config of the given server as YAML.
pub fn render_controller_manager_config(server: &SpireServer, ctx: &OperandContext) -> Result<String> {
    serde_yaml::to_string(&ControllerManagerConfig::new(server, ctx)).context("error serializing controller manager config")
}
