use anyhow::Result;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::scheduler::*;
use crate::resources::{statefulset, OperandContext};
use spire_core::crd::{ConditionStatus, SpireServer, SpireServerStatus};

const NOW: &str = "2024-01-01T00:00:00+00:00";
const LATER: &str = "2024-01-01T00:05:00+00:00";

fn server(extra: &str) -> Result<SpireServer> {
    let spec = serde_yaml::from_str(&format!(
        "{{trustDomain: example.org, clusterName: demo, jwtIssuer: 'https://oidc.example.org'{}}}",
        extra
    ))?;
    let mut server = SpireServer::new("cluster", spec);
    server.metadata.generation = Some(3);
    Ok(server)
}

fn status_of(status: &SpireServerStatus, type_: &str) -> Option<(ConditionStatus, String, String)> {
    status.condition(type_).map(|cond| (cond.status, cond.reason.clone(), cond.message.clone()))
}

#[test]
fn preflight_passes_valid_server() -> Result<()> {
    let server = server("")?;
    let mut status = SpireServerStatus::default();

    let res = preflight(&server, &mut status, NOW);

    assert!(res == Preflight::Proceed, "expected preflight to proceed, got {:?}", res);
    assert!(status.is_true(CONDITION_CONFIGURATION_VALID), "expected config to be valid, got {:?}", status);
    let ttl = status_of(&status, CONDITION_TTL_CONFIGURATION_VALID);
    assert!(
        ttl == Some((ConditionStatus::True, "ValidTTLConfiguration".into(), "".into())),
        "unexpected TTL condition {:?}",
        ttl
    );
    assert!(status.condition(CONDITION_READY).is_none(), "expected preflight to leave Ready alone, got {:?}", status);
    let observed = status.condition(CONDITION_CONFIGURATION_VALID).map(|cond| cond.observed_generation);
    assert!(observed == Some(3), "expected observed generation 3, got {:?}", observed);
    Ok(())
}

#[test]
fn preflight_rejects_invalid_config() -> Result<()> {
    let mut server = server("")?;
    server.spec.trust_domain = "Example.ORG".into();
    server.spec.cluster_name = "".into();
    let mut status = SpireServerStatus::default();

    let res = preflight(&server, &mut status, NOW);

    assert!(res == Preflight::Invalid, "expected invalid preflight, got {:?}", res);
    let cond = status.condition(CONDITION_CONFIGURATION_VALID).expect("expected a ConfigurationValid condition");
    assert!(cond.status == ConditionStatus::False, "expected ConfigurationValid to be false, got {:?}", cond);
    assert!(cond.reason == "InvalidConfiguration", "unexpected reason {}", cond.reason);
    assert!(cond.message.contains("; "), "expected all errors joined together, got {}", cond.message);
    assert!(cond.message.contains("clusterName"), "expected the clusterName error in the message, got {}", cond.message);
    let ready = status_of(&status, CONDITION_READY).map(|(status, reason, _)| (status, reason));
    assert!(
        ready == Some((ConditionStatus::False, "InvalidConfiguration".into())),
        "unexpected Ready condition {:?}",
        ready
    );
    assert!(
        status.condition(CONDITION_TTL_CONFIGURATION_VALID).is_none(),
        "expected TTLs to be left unchecked, got {:?}",
        status
    );
    Ok(())
}

#[test]
fn preflight_reports_ttl_warnings_without_failing() -> Result<()> {
    let server = server(", defaultX509Validity: 12h")?;
    let mut status = SpireServerStatus::default();

    let res = preflight(&server, &mut status, NOW);

    assert!(res == Preflight::Proceed, "expected TTL warnings not to stop the pass, got {:?}", res);
    let cond = status.condition(CONDITION_TTL_CONFIGURATION_VALID).expect("expected a TTLConfigurationValid condition");
    assert!(cond.status == ConditionStatus::True, "expected TTL warnings to keep the condition true, got {:?}", cond);
    assert!(cond.reason == "TTLWarnings", "unexpected reason {}", cond.reason);
    assert!(
        cond.message.starts_with("TTL configuration warnings: 1 issues found: "),
        "expected the warning summary first, got {}",
        cond.message
    );
    assert!(
        cond.message.contains("default_x509_svid_ttl"),
        "expected the remediation for the X.509 TTL in the message, got {}",
        cond.message
    );
    Ok(())
}

#[test]
fn preflight_rejects_sub_second_ttls() -> Result<()> {
    let server = server(", caValidity: 1500ms, defaultX509Validity: 200ms, defaultJWTValidity: 100ms")?;
    let mut status = SpireServerStatus::default();

    let res = preflight(&server, &mut status, NOW);

    assert!(res == Preflight::Invalid, "expected sub-second TTLs to be rejected, got {:?}", res);
    let cond = status.condition(CONDITION_CONFIGURATION_VALID).expect("expected a ConfigurationValid condition");
    assert!(cond.status == ConditionStatus::False, "expected ConfigurationValid to be false, got {:?}", cond);
    for field in ["caValidity", "defaultX509Validity", "defaultJWTValidity"].iter() {
        assert!(cond.message.contains(field), "expected {} in the message, got {}", field, cond.message);
    }
    assert!(cond.message.contains("whole number of seconds"), "unexpected message {}", cond.message);
    Ok(())
}

#[test]
fn preflight_invalid_config_clears_stale_ttl_condition() -> Result<()> {
    let mut server = server(", defaultX509Validity: 12h")?;
    let mut status = SpireServerStatus::default();
    preflight(&server, &mut status, NOW);
    assert!(status.condition(CONDITION_TTL_CONFIGURATION_VALID).is_some(), "expected a TTL condition after a valid pass");

    server.spec.cluster_name = "".into();
    let res = preflight(&server, &mut status, LATER);

    assert!(res == Preflight::Invalid, "expected invalid preflight, got {:?}", res);
    assert!(
        status.condition(CONDITION_TTL_CONFIGURATION_VALID).is_none(),
        "expected the TTL condition of the previous spec to be removed, got {:?}",
        status
    );
    Ok(())
}

#[test]
fn preflight_rejects_svid_ttl_beyond_ca_ttl() -> Result<()> {
    let server = server(", defaultX509Validity: 48h")?;
    let mut status = SpireServerStatus::default();

    let res = preflight(&server, &mut status, NOW);

    assert!(res == Preflight::Invalid, "expected invalid preflight, got {:?}", res);
    assert!(status.is_true(CONDITION_CONFIGURATION_VALID), "expected the config itself to be valid, got {:?}", status);
    let ttl = status_of(&status, CONDITION_TTL_CONFIGURATION_VALID).map(|(status, reason, _)| (status, reason));
    assert!(
        ttl == Some((ConditionStatus::False, "InvalidTTLConfiguration".into())),
        "unexpected TTL condition {:?}",
        ttl
    );
    assert!(!status.is_true(CONDITION_READY), "expected Ready to be false, got {:?}", status);
    Ok(())
}

#[test]
fn preflight_keeps_transition_time_when_nothing_changes() -> Result<()> {
    let server = server("")?;
    let mut status = SpireServerStatus::default();
    preflight(&server, &mut status, NOW);
    let before = status.clone();

    preflight(&server, &mut status, LATER);

    assert!(status == before, "expected a second identical pass to leave the status untouched, got {:?}", status);
    Ok(())
}

#[test]
fn conditions_fail_marks_group_and_ready() {
    let mut status = SpireServerStatus::default();
    let mut conditions = Conditions { status: &mut status, generation: 1, now: NOW };

    let err = conditions.fail(CONDITION_SERVICES_READY, anyhow::anyhow!("connection refused").context("error creating Service spire-server"));

    assert!(err.to_string() == "error creating Service spire-server", "expected the error to be passed on, got {}", err);
    let svc = status_of(&status, CONDITION_SERVICES_READY);
    assert!(
        svc == Some((
            ConditionStatus::False,
            "ReconcileFailed".into(),
            "error creating Service spire-server: connection refused".into()
        )),
        "unexpected ServicesReady condition {:?}",
        svc
    );
    let ready = status_of(&status, CONDITION_READY);
    assert!(
        ready == Some((ConditionStatus::False, "ReconcileFailed".into(), format!("error reconciling {}", CONDITION_SERVICES_READY))),
        "unexpected Ready condition {:?}",
        ready
    );
}

macro_rules! aggregate_test {
    ({name=$test:ident, conditions=[$(($type_:expr, $val:expr)),*], expected=$expected:expr, message=$message:expr}) => {
        #[test]
        fn $test() {
            let mut status = SpireServerStatus::default();
            $(status.set_condition($type_, $val, "Test", "", 1, NOW);)*

            let (ready, _, message) = aggregate_ready(&status);

            assert!(ready == $expected, "expected ready {}, got {}", $expected, ready);
            assert!(message == $message, "expected message {:?}, got {:?}", $message, message);
        }
    };
}

aggregate_test!({
    name=aggregate_all_operands_ready,
    conditions=[
        (CONDITION_RBAC_READY, true), (CONDITION_SERVICES_READY, true), (CONDITION_CONFIGMAPS_READY, true),
        (CONDITION_STATEFULSET_READY, true), (CONDITION_WEBHOOK_READY, true)
    ],
    expected=true,
    message="all operands are ready"
});
aggregate_test!({
    name=aggregate_ignores_preflight_conditions,
    conditions=[(CONDITION_CONFIGURATION_VALID, true), (CONDITION_TTL_CONFIGURATION_VALID, false), (CONDITION_RBAC_READY, true)],
    expected=true,
    message="all operands are ready"
});
aggregate_test!({
    name=aggregate_lists_pending_operands_in_order,
    conditions=[
        (CONDITION_FEDERATION_ROUTE_READY, false), (CONDITION_RBAC_READY, true), (CONDITION_STATEFULSET_READY, false)
    ],
    expected=false,
    message="waiting on StatefulSetReady, FederationRouteReady"
});

fn sts(replicas: i32, generation: i64, status: StatefulSetStatus) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some("spire-server".into()),
            generation: Some(generation),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(status),
    }
}

#[test]
fn statefulset_ready_requires_observed_updated_and_ready_replicas() {
    let cases = [
        (
            "unobserved",
            sts(1, 2, StatefulSetStatus { observed_generation: Some(1), ready_replicas: Some(1), updated_replicas: Some(1), ..Default::default() }),
            false,
            "StatefulSet update has not been observed yet",
        ),
        (
            "rolling",
            sts(1, 2, StatefulSetStatus { observed_generation: Some(2), ready_replicas: Some(1), updated_replicas: Some(0), ..Default::default() }),
            false,
            "0/1 replicas updated",
        ),
        (
            "starting",
            sts(1, 2, StatefulSetStatus { observed_generation: Some(2), ready_replicas: Some(0), updated_replicas: Some(1), ..Default::default() }),
            false,
            "0/1 replicas ready",
        ),
        (
            "ready",
            sts(1, 2, StatefulSetStatus { observed_generation: Some(2), ready_replicas: Some(1), updated_replicas: Some(1), ..Default::default() }),
            true,
            "1/1 replicas ready",
        ),
    ];
    for (case, sts, expected, expected_message) in cases.iter() {
        let (ready, message) = statefulset_ready(sts);
        assert!(ready == *expected, "case {}: expected ready {}, got {}", case, expected, ready);
        assert!(message == *expected_message, "case {}: expected message {:?}, got {:?}", case, expected_message, message);
    }
}

#[test]
fn statefulset_without_status_is_not_ready() {
    let mut sts = sts(1, 1, StatefulSetStatus::default());
    sts.status = None;

    let (ready, message) = statefulset_ready(&sts);

    assert!(!ready, "expected a StatefulSet without status to not be ready");
    assert!(message == "StatefulSet update has not been observed yet", "unexpected message {:?}", message);
}

fn ctx() -> OperandContext {
    OperandContext {
        namespace: "spire-system".into(),
        server_image: "ghcr.io/spiffe/spire-server:1.12.4".into(),
        controller_manager_image: "ghcr.io/spiffe/spire-controller-manager:0.6.2".into(),
    }
}

fn rolled_out(mut sts: StatefulSet) -> StatefulSet {
    sts.metadata.generation = Some(1);
    sts.status = Some(StatefulSetStatus {
        observed_generation: Some(1),
        ready_replicas: Some(1),
        updated_replicas: Some(1),
        replicas: 1,
        ..Default::default()
    });
    sts
}

#[test]
fn statefulset_condition_reports_immutable_persistence() -> Result<()> {
    let live = rolled_out(statefulset(&server("")?, &ctx(), "aaaa", "bbbb"));
    let desired = statefulset(&server(", persistence: {size: 5Gi}")?, &ctx(), "aaaa", "bbbb");

    let (ready, reason, message) = statefulset_condition(&live, &desired);

    assert!(!ready, "expected a persistence change to keep the StatefulSet from being ready");
    assert!(reason == "PersistenceImmutable", "unexpected reason {}", reason);
    assert!(message.contains("immutable"), "unexpected message {}", message);
    Ok(())
}

#[test]
fn statefulset_condition_follows_rollout_without_persistence_change() -> Result<()> {
    let live = rolled_out(statefulset(&server("")?, &ctx(), "aaaa", "bbbb"));
    let desired = statefulset(&server("")?, &ctx(), "cccc", "bbbb");

    let (ready, reason, message) = statefulset_condition(&live, &desired);

    assert!(ready, "expected a rolled out StatefulSet to be ready, got {}", message);
    assert!(reason == "StatefulSetReady", "unexpected reason {}", reason);
    Ok(())
}
