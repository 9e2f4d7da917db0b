use anyhow::Result;

use crate::crd::{BundleEndpointProfile, Federation, FederatesWith, SpireServerSpec};

fn minimal_spec() -> Result<SpireServerSpec> {
    Ok(serde_yaml::from_str(
        r#"
trustDomain: example.org
clusterName: demo
jwtIssuer: https://oidc.example.org
"#,
    )?)
}

fn federation_spec() -> Result<SpireServerSpec> {
    let mut spec = minimal_spec()?;
    spec.federation = Some(Federation {
        bundle_endpoint: Default::default(),
        federates_with: vec![FederatesWith {
            trust_domain: "partner.org".into(),
            bundle_endpoint_url: "https://bundle.partner.org:8443".into(),
            bundle_endpoint_profile: BundleEndpointProfile::HttpsSpiffe,
            endpoint_spiffe_id: Some("spiffe://partner.org/spire/server".into()),
        }],
        managed_route: true,
    });
    Ok(spec)
}

fn assert_rejected(spec: &SpireServerSpec, needle: &str) {
    match spec.validate() {
        Ok(_) => panic!("expected validation to fail with an error containing {:?}", needle),
        Err(errs) => assert!(
            errs.iter().any(|err| err.contains(needle)),
            "expected an error containing {:?}, got {:?}",
            needle,
            errs
        ),
    }
}

macro_rules! rejection_test {
    ($name:ident, $needle:literal, |$spec:ident| $mutate:expr) => {
        #[test]
        fn $name() -> Result<()> {
            let mut $spec = minimal_spec()?;
            $mutate;
            assert_rejected(&$spec, $needle);
            Ok(())
        }
    };
}

#[test]
fn minimal_spec_is_valid() -> Result<()> {
    let res = minimal_spec()?.validate();
    assert!(res.is_ok(), "expected minimal spec to be valid, got {:?}", res);
    Ok(())
}

#[test]
fn federation_spec_is_valid() -> Result<()> {
    let res = federation_spec()?.validate();
    assert!(res.is_ok(), "expected federation spec to be valid, got {:?}", res);
    Ok(())
}

rejection_test!(rejects_uppercase_trust_domain, "trustDomain", |spec| spec.trust_domain = "Example.org".into());
rejection_test!(rejects_empty_trust_domain, "trustDomain must not be empty", |spec| spec.trust_domain = "".into());
rejection_test!(rejects_long_trust_domain, "maximum of 255", |spec| spec.trust_domain = "a".repeat(256));
rejection_test!(rejects_empty_cluster_name, "clusterName", |spec| spec.cluster_name = " ".into());
rejection_test!(rejects_http_jwt_issuer, "jwtIssuer", |spec| spec.jwt_issuer = "http://oidc.example.org".into());
rejection_test!(rejects_hostless_jwt_issuer, "jwtIssuer", |spec| spec.jwt_issuer = "https://".into());
rejection_test!(rejects_unknown_log_level, "logLevel", |spec| spec.log_level = "trace".into());
rejection_test!(rejects_unknown_log_format, "logFormat", |spec| spec.log_format = "xml".into());
rejection_test!(rejects_unknown_key_type, "caKeyType", |spec| spec.ca_key_type = "rsa-1024".into());
rejection_test!(rejects_unparsable_ca_validity, "caValidity", |spec| spec.ca_validity = "24".into());
rejection_test!(rejects_bad_quantity, "persistence.size", |spec| spec.persistence.size = "lots".into());
rejection_test!(rejects_bad_access_mode, "persistence.accessMode", |spec| spec.persistence.access_mode = "Sometimes".into());
rejection_test!(rejects_unknown_database, "datastore.databaseType", |spec| spec.datastore.database_type = "oracle".into());
rejection_test!(rejects_zero_open_conns, "datastore.maxOpenConns", |spec| spec.datastore.max_open_conns = 0);
rejection_test!(rejects_idle_above_open, "datastore.maxIdleConns", |spec| spec.datastore.max_idle_conns = 101);
rejection_test!(rejects_negative_lifetime, "datastore.connMaxLifetime", |spec| spec.datastore.conn_max_lifetime = -1);

#[test]
fn collects_every_violation() -> Result<()> {
    let mut spec = minimal_spec()?;
    spec.trust_domain = "BAD".into();
    spec.cluster_name = "".into();
    spec.log_level = "loud".into();

    let errs = spec.validate().expect_err("expected validation to fail");

    assert!(errs.len() == 3, "expected 3 errors, got {:?}", errs);
    Ok(())
}

#[test]
fn rejects_out_of_range_federation_port() -> Result<()> {
    let mut spec = federation_spec()?;
    if let Some(fed) = spec.federation.as_mut() {
        fed.bundle_endpoint.port = 70_000;
    }
    assert_rejected(&spec, "federation.bundleEndpoint.port");
    Ok(())
}

#[test]
fn rejects_out_of_range_refresh_hint() -> Result<()> {
    let mut spec = federation_spec()?;
    if let Some(fed) = spec.federation.as_mut() {
        fed.bundle_endpoint.refresh_hint = 10;
    }
    assert_rejected(&spec, "refreshHint");
    Ok(())
}

#[test]
fn rejects_plain_http_bundle_endpoint_url() -> Result<()> {
    let mut spec = federation_spec()?;
    if let Some(fed) = spec.federation.as_mut() {
        fed.federates_with[0].bundle_endpoint_url = "http://bundle.partner.org".into();
    }
    assert_rejected(&spec, "federatesWith[0].bundleEndpointURL");
    Ok(())
}

#[test]
fn https_spiffe_peer_requires_endpoint_spiffe_id() -> Result<()> {
    let mut spec = federation_spec()?;
    if let Some(fed) = spec.federation.as_mut() {
        fed.federates_with[0].endpoint_spiffe_id = None;
    }
    assert_rejected(&spec, "endpointSpiffeID is required");

    if let Some(fed) = spec.federation.as_mut() {
        fed.federates_with[0].endpoint_spiffe_id = Some("partner.org/spire/server".into());
    }
    assert_rejected(&spec, "must start with spiffe://");
    Ok(())
}

#[test]
fn https_web_peer_needs_no_endpoint_spiffe_id() -> Result<()> {
    let mut spec = federation_spec()?;
    if let Some(fed) = spec.federation.as_mut() {
        fed.federates_with[0].bundle_endpoint_profile = BundleEndpointProfile::HttpsWeb;
        fed.federates_with[0].endpoint_spiffe_id = None;
    }
    let res = spec.validate();
    assert!(res.is_ok(), "expected https_web peer without SPIFFE ID to be valid, got {:?}", res);
    Ok(())
}
