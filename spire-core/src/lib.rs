pub mod crd;
pub mod error;
pub mod ttl;

pub use error::{ConfigError, TtlError};

/// The name of the only `SpireServer` object which the operator reconciles.
pub const SPIRE_SERVER_SINGLETON_NAME: &str = "cluster";

/// The `app.kubernetes.io/managed-by` value stamped on every object the operator owns.
pub const OPERATOR_NAME: &str = "spire-operator";

/// Comma-separated list of canonical label selectors which match the
/// SPIRE Operator's labelling scheme.
pub const OPERATOR_LABEL_SELECTORS: &str = "app.kubernetes.io/part-of=spire,app.kubernetes.io/managed-by=spire-operator";
