//! SPIRE operator error abstractions.

use thiserror::Error;

/// Hard failures of the TTL compatibility check.
///
/// These indicate a configuration which can not be reasoned about any further. TTL combinations
/// which merely risk shortened SVID lifetimes are reported as warnings instead, see `crate::ttl`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TtlError {
    /// A TTL was zero.
    #[error("{field} must be a positive duration")]
    PositiveDurationRequired { field: String },
    /// An SVID TTL outlives the CA which signs it.
    #[error("{ca_field} ({ca_ttl}) must be greater than or equal to {svid_field} ({svid_ttl})")]
    InvalidTtlOrdering {
        ca_field: String,
        ca_ttl: String,
        svid_field: String,
        svid_ttl: String,
    },
}

/// Configuration error variants.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration field could not be parsed.
    #[error("invalid duration {value:?} for {field}: {reason}")]
    InvalidDuration { field: String, value: String, reason: String },
}
