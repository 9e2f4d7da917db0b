//! SpireServer CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::SpireServerStatus;
use crate::error::ConfigError;
use crate::ttl::TtlConfig;

/// CRD spec for the SpireServer resource.
///
/// The SpireServer is a cluster scoped singleton which must be named `cluster`. The operator
/// renders it into the server & controller manager config, the server StatefulSet and all of the
/// Services, RBAC and webhook objects which the server needs.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "SpireServerStatus",
    group = "operator.openshift.io",
    version = "v1alpha1",
    kind = "SpireServer",
    derive = "PartialEq",
    shortname = "spireserver",
    printcolumn = r#"{"name":"Trust Domain","type":"string","jsonPath":".spec.trustDomain"}"#,
    printcolumn = r#"{"name":"CA TTL","type":"string","jsonPath":".spec.caValidity"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpireServerSpec {
    /// The SPIFFE trust domain of this server, e.g. `example.org`.
    pub trust_domain: String,
    /// The name of the cluster, used for node attestation and entry ID prefixes.
    pub cluster_name: String,
    /// The ConfigMap into which the server publishes its trust bundle.
    #[serde(default = "SpireServerSpec::default_bundle_config_map")]
    pub bundle_config_map: String,
    /// The issuer claim of JWT-SVIDs, must be an `https://` URL.
    pub jwt_issuer: String,

    /// Server log level, one of `debug`, `info`, `warn` or `error`.
    #[serde(default = "SpireServerSpec::default_log_level")]
    pub log_level: String,
    /// Server log format, one of `text` or `json`.
    #[serde(default = "SpireServerSpec::default_log_format")]
    pub log_format: String,

    /// The TTL of the server's signing CA.
    #[serde(default = "SpireServerSpec::default_ca_validity")]
    pub ca_validity: String,
    /// The default TTL of X.509-SVIDs.
    #[serde(default = "SpireServerSpec::default_x509_validity")]
    pub default_x509_validity: String,
    /// The default TTL of JWT-SVIDs.
    #[serde(default = "SpireServerSpec::default_jwt_validity", rename = "defaultJWTValidity")]
    pub default_jwt_validity: String,

    /// The key type of the signing CA.
    #[serde(default = "SpireServerSpec::default_key_type")]
    pub ca_key_type: String,
    /// The key type used for signing JWT-SVIDs.
    #[serde(default = "SpireServerSpec::default_key_type")]
    pub jwt_key_type: String,
    /// The subject of the signing CA.
    #[serde(default)]
    pub ca_subject: CaSubject,

    /// Persistent storage for the server's data directory.
    #[serde(default)]
    pub persistence: Persistence,
    /// The server's datastore plugin config.
    #[serde(default)]
    pub datastore: Datastore,
    /// SPIFFE federation config, federation is disabled when absent.
    #[serde(default)]
    pub federation: Option<Federation>,

    /// Additional labels applied to every object created for this server.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Node selector of the server pods.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Compute resources of the server container.
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,
    /// Affinity of the server pods.
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_object")]
    pub affinity: Option<Affinity>,
    /// Tolerations of the server pods.
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_array")]
    pub tolerations: Option<Vec<Toleration>>,
}

impl SpireServerSpec {
    pub fn default_bundle_config_map() -> String {
        "spire-bundle".into()
    }

    pub fn default_log_level() -> String {
        "info".into()
    }

    pub fn default_log_format() -> String {
        "text".into()
    }

    pub fn default_ca_validity() -> String {
        "24h".into()
    }

    pub fn default_x509_validity() -> String {
        "1h".into()
    }

    pub fn default_jwt_validity() -> String {
        "5m".into()
    }

    pub fn default_key_type() -> String {
        "rsa-2048".into()
    }

    /// Parse the CA & SVID TTLs of this spec.
    pub fn ttl_config(&self) -> Result<TtlConfig, ConfigError> {
        Ok(TtlConfig {
            ca_ttl: super::parse_duration("caValidity", &self.ca_validity)?,
            default_x509_svid_ttl: super::parse_duration("defaultX509Validity", &self.default_x509_validity)?,
            default_jwt_svid_ttl: super::parse_duration("defaultJWTValidity", &self.default_jwt_validity)?,
        })
    }

    /// True if the operator should expose the federation bundle endpoint via a Route.
    pub fn manages_federation_route(&self) -> bool {
        self.federation.as_ref().map(|fed| fed.managed_route).unwrap_or(false)
    }
}

/// The subject of the server's signing CA.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaSubject {
    #[serde(default = "CaSubject::default_country")]
    pub country: String,
    #[serde(default = "CaSubject::default_organization")]
    pub organization: String,
    #[serde(default)]
    pub common_name: String,
}

impl CaSubject {
    fn default_country() -> String {
        "US".into()
    }

    fn default_organization() -> String {
        "SPIFFE".into()
    }
}

impl Default for CaSubject {
    fn default() -> Self {
        Self {
            country: Self::default_country(),
            organization: Self::default_organization(),
            common_name: String::new(),
        }
    }
}

/// PVC settings for the server's data directory.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Persistence {
    /// The volume size, as a K8s quantity.
    #[serde(default = "Persistence::default_size")]
    pub size: String,
    /// The PVC access mode.
    #[serde(default = "Persistence::default_access_mode")]
    pub access_mode: String,
    /// The storage class to use, the cluster default when empty.
    #[serde(default)]
    pub storage_class: String,
}

impl Persistence {
    fn default_size() -> String {
        "1Gi".into()
    }

    fn default_access_mode() -> String {
        "ReadWriteOnce".into()
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            access_mode: Self::default_access_mode(),
            storage_class: String::new(),
        }
    }
}

/// Settings of the server's SQL datastore plugin.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Datastore {
    /// One of `sqlite3`, `postgres`, `mysql`, `aws_postgresql` or `aws_mysql`.
    #[serde(default = "Datastore::default_database_type")]
    pub database_type: String,
    /// The database connection string, or file path for sqlite3.
    #[serde(default = "Datastore::default_connection_string")]
    pub connection_string: String,
    #[serde(default = "Datastore::default_max_open_conns")]
    pub max_open_conns: i32,
    #[serde(default = "Datastore::default_max_idle_conns")]
    pub max_idle_conns: i32,
    /// Maximum connection lifetime in seconds, `0` for unlimited.
    #[serde(default)]
    pub conn_max_lifetime: i32,
    #[serde(default)]
    pub disable_migration: bool,
}

impl Datastore {
    fn default_database_type() -> String {
        "sqlite3".into()
    }

    fn default_connection_string() -> String {
        "/run/spire/data/datastore.sqlite3".into()
    }

    fn default_max_open_conns() -> i32 {
        100
    }

    fn default_max_idle_conns() -> i32 {
        2
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self {
            database_type: Self::default_database_type(),
            connection_string: Self::default_connection_string(),
            max_open_conns: Self::default_max_open_conns(),
            max_idle_conns: Self::default_max_idle_conns(),
            conn_max_lifetime: 0,
            disable_migration: false,
        }
    }
}

/// SPIFFE federation settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Federation {
    /// The bundle endpoint served by this server.
    #[serde(default)]
    pub bundle_endpoint: BundleEndpoint,
    /// Foreign trust domains whose bundles this server fetches.
    #[serde(default)]
    pub federates_with: Vec<FederatesWith>,
    /// Expose the bundle endpoint through an OpenShift Route managed by the operator.
    #[serde(default = "Federation::default_managed_route")]
    pub managed_route: bool,
}

impl Federation {
    fn default_managed_route() -> bool {
        true
    }
}

/// The federation bundle endpoint served by this server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleEndpoint {
    #[serde(default = "BundleEndpoint::default_port")]
    pub port: i32,
    #[serde(default = "BundleEndpoint::default_address")]
    pub address: String,
    /// Refresh hint advertised to federated servers, in seconds.
    #[serde(default = "BundleEndpoint::default_refresh_hint")]
    pub refresh_hint: i32,
    #[serde(default)]
    pub profile: BundleEndpointProfile,
}

impl BundleEndpoint {
    fn default_port() -> i32 {
        8443
    }

    fn default_address() -> String {
        "0.0.0.0".into()
    }

    fn default_refresh_hint() -> i32 {
        300
    }
}

impl Default for BundleEndpoint {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            address: Self::default_address(),
            refresh_hint: Self::default_refresh_hint(),
            profile: BundleEndpointProfile::default(),
        }
    }
}

/// The authentication profile of a bundle endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BundleEndpointProfile {
    /// The endpoint authenticates with an SVID of the serving trust domain.
    HttpsSpiffe,
    /// The endpoint authenticates with a Web PKI certificate.
    HttpsWeb,
}

impl Default for BundleEndpointProfile {
    fn default() -> Self {
        Self::HttpsSpiffe
    }
}

impl std::fmt::Display for BundleEndpointProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::HttpsSpiffe => "https_spiffe",
                Self::HttpsWeb => "https_web",
            }
        )
    }
}

/// A foreign trust domain to federate with.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FederatesWith {
    pub trust_domain: String,
    /// The foreign bundle endpoint, must be an `https://` URL.
    #[serde(rename = "bundleEndpointURL")]
    pub bundle_endpoint_url: String,
    #[serde(default)]
    pub bundle_endpoint_profile: BundleEndpointProfile,
    /// The SPIFFE ID of the foreign bundle endpoint, required for `https_spiffe`.
    #[serde(default, rename = "endpointSpiffeID")]
    pub endpoint_spiffe_id: Option<String>,
}
