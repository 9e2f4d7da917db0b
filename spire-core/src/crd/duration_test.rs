use std::time::Duration;

use anyhow::Result;

use super::parse_duration;
use crate::error::ConfigError;

macro_rules! duration_test {
    ($name:ident, $input:literal, $expect_secs:expr) => {
        #[test]
        fn $name() -> Result<()> {
            let output = parse_duration("caValidity", $input)?;
            assert!(
                output == Duration::from_secs($expect_secs),
                "expected {:?} to parse as {}s, got {:?}",
                $input,
                $expect_secs,
                output,
            );
            Ok(())
        }
    };
}

duration_test!(parses_hours, "24h", 86_400);
duration_test!(parses_minutes, "5m", 300);
duration_test!(parses_days, "7d", 604_800);
duration_test!(parses_compound_with_space, "1h 30m", 5_400);
duration_test!(parses_bare_zero, "0", 0);
duration_test!(parses_zero_with_unit, "0s", 0);
duration_test!(trims_surrounding_whitespace, " 1h ", 3_600);

#[test]
fn rejects_values_without_units() {
    let res = parse_duration("caValidity", "24");
    assert!(
        matches!(&res, Err(ConfigError::InvalidDuration { field, value, .. }) if field == "caValidity" && value == "24"),
        "expected invalid duration error, got {:?}",
        res
    );
}

#[test]
fn rejects_negative_values() {
    let res = parse_duration("defaultX509Validity", "-1h");
    assert!(res.is_err(), "expected negative duration to be rejected, got {:?}", res);
}

#[test]
fn rejects_empty_values() {
    let res = parse_duration("defaultJWTValidity", "");
    assert!(res.is_err(), "expected empty duration to be rejected, got {:?}", res);
}

#[test]
fn rejects_sub_second_values() {
    for input in ["200ms", "1500ms", "1s 1ns", "100us"].iter() {
        let res = parse_duration("defaultX509Validity", input);
        assert!(
            matches!(&res, Err(ConfigError::InvalidDuration { reason, .. }) if reason == "must be a whole number of seconds"),
            "expected {:?} to be rejected as a sub-second duration, got {:?}",
            input,
            res
        );
    }
}

duration_test!(accepts_whole_seconds_in_millis, "2000ms", 2);
