//! Static validation of SpireServer specs.

use http::Uri;
use lazy_static::lazy_static;
use regex::Regex;

use crate::crd::{BundleEndpointProfile, Datastore, Federation, Persistence, SpireServerSpec};

const MAX_TRUST_DOMAIN_LEN: usize = 255;
const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];
const KEY_TYPES: &[&str] = &["rsa-2048", "rsa-4096", "ec-p256", "ec-p384"];
const ACCESS_MODES: &[&str] = &["ReadWriteOnce", "ReadWriteOncePod", "ReadWriteMany", "ReadOnlyMany"];
const DATABASE_TYPES: &[&str] = &["sqlite3", "postgres", "mysql", "aws_postgresql", "aws_mysql"];
const MAX_OPEN_CONNS: i32 = 10_000;
const MIN_REFRESH_HINT: i32 = 60;
const MAX_REFRESH_HINT: i32 = 3600;

lazy_static! {
    /// Regular expression used to validate SPIFFE trust domain names.
    static ref RE_TRUST_DOMAIN: Regex = Regex::new(r"^[a-z0-9._-]+$").expect("failed to compile RE_TRUST_DOMAIN regex");
    /// Regular expression used to validate K8s storage quantities.
    static ref RE_QUANTITY: Regex = Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").expect("failed to compile RE_QUANTITY regex");
}

impl SpireServerSpec {
    /// Statically validate this spec, collecting every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errs = vec![];
        validate_trust_domain("trustDomain", &self.trust_domain, &mut errs);
        if self.cluster_name.trim().is_empty() {
            errs.push("clusterName must not be empty".into());
        }
        if self.bundle_config_map.trim().is_empty() {
            errs.push("bundleConfigMap must not be empty".into());
        }
        validate_jwt_issuer(&self.jwt_issuer, &mut errs);

        validate_one_of("logLevel", &self.log_level, LOG_LEVELS, &mut errs);
        validate_one_of("logFormat", &self.log_format, LOG_FORMATS, &mut errs);
        validate_one_of("caKeyType", &self.ca_key_type, KEY_TYPES, &mut errs);
        validate_one_of("jwtKeyType", &self.jwt_key_type, KEY_TYPES, &mut errs);

        for (field, value) in [
            ("caValidity", &self.ca_validity),
            ("defaultX509Validity", &self.default_x509_validity),
            ("defaultJWTValidity", &self.default_jwt_validity),
        ] {
            if let Err(err) = super::parse_duration(field, value) {
                errs.push(err.to_string());
            }
        }

        validate_persistence(&self.persistence, &mut errs);
        validate_datastore(&self.datastore, &mut errs);
        if let Some(federation) = &self.federation {
            validate_federation(federation, &mut errs);
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }
}

fn validate_trust_domain(field: &str, value: &str, errs: &mut Vec<String>) {
    if value.is_empty() {
        errs.push(format!("{} must not be empty", field));
        return;
    }
    if value.len() > MAX_TRUST_DOMAIN_LEN {
        errs.push(format!("{} may contain a maximum of {} characters", field, MAX_TRUST_DOMAIN_LEN));
    }
    if !RE_TRUST_DOMAIN.is_match(value) {
        errs.push(format!("{} `{}` is invalid, must match the pattern `{}`", field, value, RE_TRUST_DOMAIN.as_str()));
    }
}

fn validate_jwt_issuer(value: &str, errs: &mut Vec<String>) {
    if !value.starts_with("https://") {
        errs.push(format!("jwtIssuer `{}` is invalid, must be an https:// URL", value));
        return;
    }
    match value.parse::<Uri>() {
        Ok(uri) if uri.host().map(|host| !host.is_empty()).unwrap_or(false) => (),
        Ok(_) => errs.push(format!("jwtIssuer `{}` is invalid, must include a host", value)),
        Err(err) => errs.push(format!("jwtIssuer `{}` is invalid: {}", value, err)),
    }
}

fn validate_one_of(field: &str, value: &str, allowed: &[&str], errs: &mut Vec<String>) {
    if !allowed.contains(&value) {
        errs.push(format!("{} `{}` is invalid, must be one of {}", field, value, allowed.join(", ")));
    }
}

fn validate_persistence(persistence: &Persistence, errs: &mut Vec<String>) {
    if !RE_QUANTITY.is_match(&persistence.size) {
        errs.push(format!("persistence.size `{}` is not a valid storage quantity", persistence.size));
    }
    validate_one_of("persistence.accessMode", &persistence.access_mode, ACCESS_MODES, errs);
}

fn validate_datastore(datastore: &Datastore, errs: &mut Vec<String>) {
    validate_one_of("datastore.databaseType", &datastore.database_type, DATABASE_TYPES, errs);
    if datastore.connection_string.trim().is_empty() {
        errs.push("datastore.connectionString must not be empty".into());
    }
    if datastore.max_open_conns < 1 || datastore.max_open_conns > MAX_OPEN_CONNS {
        errs.push(format!("datastore.maxOpenConns must be between 1 and {}", MAX_OPEN_CONNS));
    }
    if datastore.max_idle_conns < 0 || datastore.max_idle_conns > datastore.max_open_conns {
        errs.push("datastore.maxIdleConns must be between 0 and datastore.maxOpenConns".into());
    }
    if datastore.conn_max_lifetime < 0 {
        errs.push("datastore.connMaxLifetime must not be negative".into());
    }
}

fn validate_federation(federation: &Federation, errs: &mut Vec<String>) {
    let endpoint = &federation.bundle_endpoint;
    if endpoint.port < 1 || endpoint.port > 65535 {
        errs.push(format!("federation.bundleEndpoint.port {} is invalid, must be between 1 and 65535", endpoint.port));
    }
    if endpoint.refresh_hint < MIN_REFRESH_HINT || endpoint.refresh_hint > MAX_REFRESH_HINT {
        errs.push(format!(
            "federation.bundleEndpoint.refreshHint {} is invalid, must be between {} and {} seconds",
            endpoint.refresh_hint, MIN_REFRESH_HINT, MAX_REFRESH_HINT
        ));
    }
    if endpoint.address.trim().is_empty() {
        errs.push("federation.bundleEndpoint.address must not be empty".into());
    }

    for (idx, peer) in federation.federates_with.iter().enumerate() {
        let prefix = format!("federation.federatesWith[{}]", idx);
        validate_trust_domain(&format!("{}.trustDomain", prefix), &peer.trust_domain, errs);
        if !peer.bundle_endpoint_url.starts_with("https://") || peer.bundle_endpoint_url.parse::<Uri>().is_err() {
            errs.push(format!("{}.bundleEndpointURL `{}` is invalid, must be an https:// URL", prefix, peer.bundle_endpoint_url));
        }
        if peer.bundle_endpoint_profile == BundleEndpointProfile::HttpsSpiffe {
            match peer.endpoint_spiffe_id.as_deref() {
                Some(id) if id.starts_with("spiffe://") => (),
                Some(id) => errs.push(format!("{}.endpointSpiffeID `{}` is invalid, must start with spiffe://", prefix, id)),
                None => errs.push(format!("{}.endpointSpiffeID is required for the https_spiffe profile", prefix)),
            }
        }
    }
}
