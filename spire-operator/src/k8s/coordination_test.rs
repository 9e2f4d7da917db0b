use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};

use super::coordination::{decide, DateTimeUtc, LeaderElectionConfig, LeaseAction};

const IDENTITY: &str = "spire-operator-0";

fn observed_at() -> DateTimeUtc {
    Utc.ymd(2026, 10, 19).and_hms(12, 0, 0)
}

macro_rules! decide_test {
    ({name: $name:ident, holder: $holder:expr, elapsed_secs: $elapsed:expr, expected: $expected:expr}) => {
        #[test]
        fn $name() -> Result<()> {
            let holder: Option<&str> = $holder;
            let now = observed_at() + Duration::seconds($elapsed);
            let action = decide(holder, IDENTITY, observed_at(), now, Duration::seconds(60));
            assert!(action == $expected, "expected {:?} for holder {:?} after {}s, got {:?}", $expected, holder, $elapsed, action);
            Ok(())
        }
    };
}

decide_test!({name: decide_renews_own_lease, holder: Some(IDENTITY), elapsed_secs: 10, expected: LeaseAction::Renew});
decide_test!({name: decide_renews_own_expired_lease, holder: Some(IDENTITY), elapsed_secs: 600, expected: LeaseAction::Renew});
decide_test!({name: decide_follows_live_leader, holder: Some("spire-operator-1"), elapsed_secs: 59, expected: LeaseAction::Follow("spire-operator-1".into())});
decide_test!({name: decide_acquires_at_expiry, holder: Some("spire-operator-1"), elapsed_secs: 60, expected: LeaseAction::Acquire});
decide_test!({name: decide_acquires_expired_lease, holder: Some("spire-operator-1"), elapsed_secs: 120, expected: LeaseAction::Acquire});
decide_test!({name: decide_acquires_unheld_lease, holder: None, elapsed_secs: 0, expected: LeaseAction::Acquire});
decide_test!({name: decide_acquires_released_lease, holder: Some(""), elapsed_secs: 0, expected: LeaseAction::Acquire});

#[test]
fn election_config_requires_renew_before_expiry() {
    let res = LeaderElectionConfig::new("spire-system", "spire-operator", IDENTITY.into(), Duration::seconds(10), Duration::seconds(10));
    assert!(res.is_err(), "expected equal lease duration & renew deadline to be rejected");
}

#[test]
fn election_config_requires_identity() {
    let res = LeaderElectionConfig::new("spire-system", "spire-operator", String::new(), Duration::seconds(60), Duration::seconds(10));
    assert!(res.is_err(), "expected an empty identity to be rejected");
}

#[test]
fn election_config_accepts_recommended_timings() -> Result<()> {
    LeaderElectionConfig::new("spire-system", "spire-operator", IDENTITY.into(), Duration::seconds(60), Duration::seconds(10))?;
    Ok(())
}
