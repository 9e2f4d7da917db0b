use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use super::mod_test::{ctx_fixture, federated_server_fixture, server_fixture};
use super::{go_duration, render_server_config};

fn render(server: &spire_core::crd::SpireServer) -> Result<Value> {
    let conf = render_server_config(server, &ctx_fixture())?;
    serde_json::from_str(&conf).context("rendered server config is not valid JSON")
}

#[test]
fn server_block_reflects_spec() -> Result<()> {
    let conf = render(&server_fixture()?)?;
    let server = &conf["server"];

    assert!(server["trust_domain"] == "example.org", "unexpected trust domain {}", server["trust_domain"]);
    assert!(server["bind_port"] == "8081", "unexpected bind port {}", server["bind_port"]);
    assert!(server["log_level"] == "INFO", "unexpected log level {}", server["log_level"]);
    assert!(server["ca_ttl"] == "24h", "unexpected ca_ttl {}", server["ca_ttl"]);
    assert!(server["default_x509_svid_ttl"] == "1h", "unexpected x509 ttl {}", server["default_x509_svid_ttl"]);
    assert!(server["default_jwt_svid_ttl"] == "5m", "unexpected jwt ttl {}", server["default_jwt_svid_ttl"]);
    assert!(server["jwt_issuer"] == "https://oidc.example.org", "unexpected jwt issuer {}", server["jwt_issuer"]);
    assert!(server.get("federation").is_none(), "expected no federation block, got {}", server["federation"]);
    Ok(())
}

#[test]
fn plugins_reflect_spec() -> Result<()> {
    let conf = render(&server_fixture()?)?;
    let plugins = &conf["plugins"];

    let datastore = &plugins["DataStore"][0]["sql"]["plugin_data"];
    assert!(datastore["database_type"] == "sqlite3", "unexpected database type {}", datastore["database_type"]);
    assert!(datastore["max_open_conns"] == 100, "unexpected max open conns {}", datastore["max_open_conns"]);
    let psat = &plugins["NodeAttestor"][0]["k8s_psat"]["plugin_data"]["clusters"][0]["demo"];
    assert!(
        psat["service_account_allow_list"][0] == "spire-system:spire-agent",
        "unexpected psat allow list {}",
        psat["service_account_allow_list"]
    );
    let notifier = &plugins["Notifier"][0]["k8sbundle"]["plugin_data"];
    assert!(notifier["config_map"] == "spire-bundle", "unexpected bundle config map {}", notifier["config_map"]);
    assert!(notifier["namespace"] == "spire-system", "unexpected bundle namespace {}", notifier["namespace"]);
    assert!(conf["health_checks"]["live_path"] == "/live", "unexpected health checks {}", conf["health_checks"]);
    assert!(conf["telemetry"]["Prometheus"]["port"] == 9402, "unexpected telemetry {}", conf["telemetry"]);
    Ok(())
}

#[test]
fn federation_block_is_rendered() -> Result<()> {
    let conf = render(&federated_server_fixture()?)?;
    let federation = &conf["server"]["federation"];

    let endpoint = &federation["bundle_endpoint"];
    assert!(endpoint["port"] == 8443, "unexpected bundle endpoint port {}", endpoint["port"]);
    assert!(endpoint["refresh_hint"] == "300s", "unexpected refresh hint {}", endpoint["refresh_hint"]);
    assert!(
        endpoint["profile"]["https_web"]["serving_cert_file"]["cert_file_path"] == "/run/spire/federation-tls/tls.crt",
        "unexpected bundle endpoint profile {}",
        endpoint["profile"]
    );
    let peer = &federation["federates_with"]["partner.org"];
    assert!(peer["bundle_endpoint_url"] == "https://bundle.partner.org", "unexpected peer url {}", peer["bundle_endpoint_url"]);
    assert!(
        peer["bundle_endpoint_profile"]["https_spiffe"]["endpoint_spiffe_id"] == "spiffe://partner.org/spire/server",
        "unexpected peer profile {}",
        peer["bundle_endpoint_profile"]
    );
    Ok(())
}

#[test]
fn rendering_is_deterministic() -> Result<()> {
    let server = federated_server_fixture()?;
    let (a, b) = (render_server_config(&server, &ctx_fixture())?, render_server_config(&server, &ctx_fixture())?);
    assert!(a == b, "expected identical renders");
    Ok(())
}

#[test]
fn invalid_ttl_fails_rendering() -> Result<()> {
    let mut server = server_fixture()?;
    server.spec.ca_validity = "forever".into();

    let res = render_server_config(&server, &ctx_fixture());

    assert!(res.is_err(), "expected rendering with an invalid TTL to fail");
    Ok(())
}

#[test]
fn go_durations_never_use_days() {
    let cases = [(0, "0s"), (45, "45s"), (300, "5m"), (5_400, "1h30m"), (86_400, "24h"), (604_800, "168h"), (3_661, "1h1m1s")];
    for (secs, expected) in cases.iter() {
        let output = go_duration(Duration::from_secs(*secs));
        assert!(output == *expected, "expected {}s to format as {}, got {}", secs, expected, output);
    }
}

#[test]
fn sub_second_ttl_fails_rendering() -> Result<()> {
    let mut server = server_fixture()?;
    server.spec.default_x509_validity = "200ms".into();

    let res = render_server_config(&server, &ctx_fixture());

    assert!(res.is_err(), "expected a sub-second TTL to fail rendering instead of being truncated");
    Ok(())
}
