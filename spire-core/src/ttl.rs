//! SVID / CA TTL compatibility policy.
//!
//! SPIRE prepares the next CA once the active CA has lived through a fraction of its lifetime,
//! and only begins issuing SVIDs from it after an activation threshold. An SVID can never
//! outlive the CA which signed it, so an SVID TTL which does not fit into the window left
//! between CA activation and CA expiry will be silently truncated. This module decides whether
//! the configured TTLs fit into that window.
//!
//! Incompatible combinations are reported as warnings, as the server still operates, just with
//! shorter-lived SVIDs than requested. Only non-positive TTLs and SVIDs which outlive their CA
//! are hard errors.

use std::time::Duration;

use crate::error::TtlError;

/// The field name used for the CA TTL in messages.
pub const CA_TTL_FIELD: &str = "ca_ttl";
/// The field name used for the default X.509 SVID TTL in messages.
pub const X509_SVID_TTL_FIELD: &str = "default_x509_svid_ttl";
/// The field name used for the default JWT SVID TTL in messages.
pub const JWT_SVID_TTL_FIELD: &str = "default_jwt_svid_ttl";

/// The ceiling on any SVID TTL which the rotation policy can vouch for, 7 days.
const ACTIVATION_THRESHOLD_CAP: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// The ratio between a CA TTL and the largest SVID TTL it can fully honor.
const ACTIVATION_THRESHOLD_DIVISOR: u32 = 6;

/// The largest SVID TTL this policy will certify, regardless of CA TTL.
pub fn max_svid_ttl() -> Duration {
    ACTIVATION_THRESHOLD_CAP
}

/// The largest SVID TTL which the given CA TTL can fully honor.
pub fn max_svid_ttl_for_ca_ttl(ca_ttl: Duration) -> Duration {
    (ca_ttl / ACTIVATION_THRESHOLD_DIVISOR).min(max_svid_ttl())
}

/// The smallest CA TTL which can fully honor the given SVID TTL.
pub fn min_ca_ttl_for_svid_ttl(svid_ttl: Duration) -> Duration {
    svid_ttl.saturating_mul(ACTIVATION_THRESHOLD_DIVISOR)
}

/// Check if SVIDs with the given TTL can always be issued for their full lifetime by a CA with
/// the given TTL. The bound is inclusive.
pub fn has_compatible_ttl(ca_ttl: Duration, svid_ttl: Duration) -> bool {
    max_svid_ttl_for_ca_ttl(ca_ttl) >= svid_ttl
}

/// An SVID TTL along with the config field it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NamedTtl<'a> {
    /// The config field name, used in messages.
    pub field: &'a str,
    /// The TTL value.
    pub ttl: Duration,
}

impl<'a> NamedTtl<'a> {
    pub fn new(field: &'a str, ttl: Duration) -> Self {
        Self { field, ttl }
    }
}

/// The outcome of a TTL check which passed all hard preconditions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TtlReport {
    /// Remediation messages, one per incompatible SVID TTL, in input order.
    pub warnings: Vec<String>,
    /// A summary of the warnings, `None` when there are none.
    pub status_message: Option<String>,
}

impl TtlReport {
    /// True if any SVID TTL risks being shortened.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// The three TTLs which a SPIRE server is configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlConfig {
    pub ca_ttl: Duration,
    pub default_x509_svid_ttl: Duration,
    pub default_jwt_svid_ttl: Duration,
}

impl TtlConfig {
    /// Check the SVID TTLs against the CA TTL, X.509 first.
    pub fn check(&self) -> Result<TtlReport, TtlError> {
        check_ttls(
            self.ca_ttl,
            &[
                NamedTtl::new(X509_SVID_TTL_FIELD, self.default_x509_svid_ttl),
                NamedTtl::new(JWT_SVID_TTL_FIELD, self.default_jwt_svid_ttl),
            ],
        )
    }
}

/// Check each of the given SVID TTLs for compatibility with the given CA TTL.
///
/// All hard preconditions are evaluated before any compatibility logic runs: every TTL must be
/// positive, and no SVID TTL may exceed the CA TTL.
pub fn check_ttls(ca_ttl: Duration, svid_ttls: &[NamedTtl<'_>]) -> Result<TtlReport, TtlError> {
    if ca_ttl.is_zero() {
        return Err(TtlError::PositiveDurationRequired { field: CA_TTL_FIELD.into() });
    }
    if let Some(svid) = svid_ttls.iter().find(|svid| svid.ttl.is_zero()) {
        return Err(TtlError::PositiveDurationRequired { field: svid.field.into() });
    }
    if let Some(svid) = svid_ttls.iter().find(|svid| svid.ttl > ca_ttl) {
        return Err(TtlError::InvalidTtlOrdering {
            ca_field: CA_TTL_FIELD.into(),
            ca_ttl: fmt_duration(ca_ttl),
            svid_field: svid.field.into(),
            svid_ttl: fmt_duration(svid.ttl),
        });
    }

    let warnings: Vec<String> = svid_ttls
        .iter()
        .filter(|svid| !has_compatible_ttl(ca_ttl, svid.ttl))
        .map(|svid| incompatibility_message(ca_ttl, svid))
        .collect();
    let status_message = if warnings.is_empty() {
        None
    } else {
        Some(format!("TTL configuration warnings: {} issues found", warnings.len()))
    };
    Ok(TtlReport { warnings, status_message })
}

/// Build the remediation message for an SVID TTL which is not compatible with the CA TTL.
fn incompatibility_message(ca_ttl: Duration, svid: &NamedTtl<'_>) -> String {
    let field = svid.field;
    if svid.ttl < max_svid_ttl() {
        // Under the cap, the CA is simply too short-lived to accommodate it.
        format!(
            "{field} is too high for the configured {ca} value. SVIDs with shorter lifetimes may be issued. \
             Set {field} to {max_svid} or less, or {ca} to {min_ca} or more, to guarantee the full {field} \
             lifetime when CA rotations are scheduled.",
            field = field,
            ca = CA_TTL_FIELD,
            max_svid = fmt_duration(max_svid_ttl_for_ca_ttl(ca_ttl)),
            min_ca = fmt_duration(min_ca_ttl_for_svid_ttl(svid.ttl)),
        )
    } else if ca_ttl < min_ca_ttl_for_svid_ttl(max_svid_ttl()) {
        // Over the cap, and the CA could not accommodate even the capped value.
        format!(
            "{field} is too high and the configured {ca} is too low. SVIDs with shorter lifetimes may be issued. \
             Set {field} to {cap} or less, and {ca} to {min_ca} or more, to guarantee the full {field} \
             lifetime when CA rotations are scheduled.",
            field = field,
            ca = CA_TTL_FIELD,
            cap = fmt_duration(max_svid_ttl()),
            min_ca = fmt_duration(min_ca_ttl_for_svid_ttl(max_svid_ttl())),
        )
    } else {
        // Over the cap, but the CA is otherwise large enough.
        format!(
            "{field} is too high. SVIDs with shorter lifetimes may be issued. Set {field} to {max_svid} or \
             less to guarantee the full {field} lifetime when CA rotations are scheduled.",
            field = field,
            max_svid = fmt_duration(max_svid_ttl_for_ca_ttl(ca_ttl)),
        )
    }
}

/// Format a duration using whole days, hours, minutes & seconds, e.g. `1d12h`, which parses
/// back as a valid `SpireServer` duration field.
pub fn fmt_duration(val: Duration) -> String {
    if val.subsec_nanos() != 0 {
        return humantime::format_duration(val).to_string();
    }
    let secs = val.as_secs();
    if secs == 0 {
        return "0s".into();
    }
    let (days, hours, mins, secs) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60, secs % 60);
    [(days, "d"), (hours, "h"), (mins, "m"), (secs, "s")]
        .iter()
        .filter(|(amount, _)| *amount > 0)
        .map(|(amount, unit)| format!("{}{}", amount, unit))
        .collect()
}
