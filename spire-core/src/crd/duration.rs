use std::time::Duration;

use crate::error::ConfigError;

/// Parse a `SpireServer` duration field such as `24h`, `90m` or `1h 30m`.
///
/// A bare `0` is accepted as the zero duration, everything else requires a unit. SPIRE TTLs
/// are whole seconds, so values with a sub-second part are rejected.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = |reason: String| ConfigError::InvalidDuration {
        field: field.into(),
        value: value.into(),
        reason,
    };
    let parsed = humantime::parse_duration(trimmed).map_err(|err| invalid(err.to_string()))?;
    if parsed.subsec_nanos() != 0 {
        return Err(invalid("must be a whole number of seconds".into()));
    }
    Ok(parsed)
}
