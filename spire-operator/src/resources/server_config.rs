//! Rendering of the SPIRE server's `server.conf`.
//!
//! SPIRE accepts HCL or JSON config, JSON is used here as it can be rendered deterministically.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use super::{OperandContext, FEDERATION_TLS_DIR, SERVER_DATA_DIR, SERVER_GRPC_PORT, SERVER_HEALTH_PORT, SERVER_METRICS_PORT, SERVER_SOCKET_DIR};
use spire_core::crd::{BundleEndpointProfile, Federation, SpireServer};

/// The service account of the SPIRE agents which may attest against the server.
const AGENT_SERVICE_ACCOUNT: &str = "spire-agent";

/// Render the server config of the given SpireServer as pretty JSON.
pub fn render_server_config(server: &SpireServer, ctx: &OperandContext) -> Result<String> {
    let spec = &server.spec;
    let ttls = spec.ttl_config().context("error parsing SpireServer TTLs")?;

    let mut server_block = json!({
        "bind_address": "0.0.0.0",
        "bind_port": SERVER_GRPC_PORT.to_string(),
        "socket_path": format!("{}/api.sock", SERVER_SOCKET_DIR),
        "trust_domain": spec.trust_domain,
        "data_dir": SERVER_DATA_DIR,
        "log_level": spec.log_level.to_uppercase(),
        "log_format": spec.log_format,
        "ca_key_type": spec.ca_key_type,
        "jwt_key_type": spec.jwt_key_type,
        "ca_subject": [{
            "country": [spec.ca_subject.country],
            "organization": [spec.ca_subject.organization],
            "common_name": spec.ca_subject.common_name,
        }],
        "ca_ttl": go_duration(ttls.ca_ttl),
        "default_x509_svid_ttl": go_duration(ttls.default_x509_svid_ttl),
        "default_jwt_svid_ttl": go_duration(ttls.default_jwt_svid_ttl),
        "jwt_issuer": spec.jwt_issuer,
    });
    if let (Some(federation), Some(block)) = (spec.federation.as_ref(), server_block.as_object_mut()) {
        block.insert("federation".into(), federation_block(federation));
    }

    let datastore = &spec.datastore;
    let doc = json!({
        "server": server_block,
        "plugins": {
            "DataStore": [{"sql": {"plugin_data": {
                "database_type": datastore.database_type,
                "connection_string": datastore.connection_string,
                "max_open_conns": datastore.max_open_conns,
                "max_idle_conns": datastore.max_idle_conns,
                "conn_max_lifetime": format!("{}s", datastore.conn_max_lifetime),
                "disable_migration": datastore.disable_migration,
            }}}],
            "KeyManager": [{"disk": {"plugin_data": {
                "keys_path": format!("{}/keys.json", SERVER_DATA_DIR),
            }}}],
            "NodeAttestor": [{"k8s_psat": {"plugin_data": {
                "clusters": [{
                    spec.cluster_name.clone(): {
                        "service_account_allow_list": [format!("{}:{}", ctx.namespace, AGENT_SERVICE_ACCOUNT)],
                    }
                }],
            }}}],
            "Notifier": [{"k8sbundle": {"plugin_data": {
                "namespace": ctx.namespace,
                "config_map": spec.bundle_config_map,
            }}}],
        },
        "health_checks": {
            "listener_enabled": true,
            "bind_address": "0.0.0.0",
            "bind_port": SERVER_HEALTH_PORT.to_string(),
            "live_path": "/live",
            "ready_path": "/ready",
        },
        "telemetry": {
            "Prometheus": {"host": "0.0.0.0", "port": SERVER_METRICS_PORT},
        },
    });
    serde_json::to_string_pretty(&doc).context("error serializing server config")
}

fn federation_block(federation: &Federation) -> Value {
    let endpoint = &federation.bundle_endpoint;
    let profile = match endpoint.profile {
        BundleEndpointProfile::HttpsSpiffe => json!({"https_spiffe": {}}),
        BundleEndpointProfile::HttpsWeb => json!({"https_web": {"serving_cert_file": {
            "cert_file_path": format!("{}/tls.crt", FEDERATION_TLS_DIR),
            "key_file_path": format!("{}/tls.key", FEDERATION_TLS_DIR),
        }}}),
    };

    let mut federates_with = Map::new();
    for peer in federation.federates_with.iter() {
        let peer_profile = match peer.bundle_endpoint_profile {
            BundleEndpointProfile::HttpsSpiffe => json!({"https_spiffe": {
                "endpoint_spiffe_id": peer.endpoint_spiffe_id.clone().unwrap_or_default(),
            }}),
            BundleEndpointProfile::HttpsWeb => json!({"https_web": {}}),
        };
        federates_with.insert(
            peer.trust_domain.clone(),
            json!({
                "bundle_endpoint_url": peer.bundle_endpoint_url,
                "bundle_endpoint_profile": peer_profile,
            }),
        );
    }

    json!({
        "bundle_endpoint": {
            "address": endpoint.address,
            "port": endpoint.port,
            "refresh_hint": format!("{}s", endpoint.refresh_hint),
            "profile": profile,
        },
        "federates_with": federates_with,
    })
}

/// Format a duration the way SPIRE parses them, hours being the largest unit.
pub fn go_duration(val: Duration) -> String {
    let secs = val.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        out.push_str(&format!("{}m", mins));
    }
    if secs > 0 || out.is_empty() {
        out.push_str(&format!("{}s", secs));
    }
    out
}
