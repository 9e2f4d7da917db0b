use anyhow::Result;
use kube::api::DynamicObject;

use super::mod_test::{federated_server_fixture, server_fixture};
use super::*;

fn foreign_route() -> DynamicObject {
    DynamicObject::new(FEDERATION_ROUTE_NAME, &route_api_resource()).within("spire-system")
}

#[test]
fn no_route_without_federation() -> Result<()> {
    let route = federation_route(&server_fixture()?, "spire-system");
    assert!(route.is_none(), "expected no Route without federation");
    Ok(())
}

#[test]
fn no_route_when_unmanaged() -> Result<()> {
    let mut server = federated_server_fixture()?;
    if let Some(federation) = server.spec.federation.as_mut() {
        federation.managed_route = false;
    }
    let route = federation_route(&server, "spire-system");
    assert!(route.is_none(), "expected no Route when managedRoute is false");
    Ok(())
}

#[test]
fn route_passes_through_to_federation_port() -> Result<()> {
    let route = federation_route(&federated_server_fixture()?, "spire-system").expect("expected a Route");

    assert!(route.metadata.name.as_deref() == Some(FEDERATION_ROUTE_NAME), "unexpected name {:?}", route.metadata.name);
    assert!(route.metadata.namespace.as_deref() == Some("spire-system"), "unexpected namespace {:?}", route.metadata.namespace);
    assert!(is_operator_managed(&route), "expected Route to carry the managed-by label");
    let spec = &route.data["spec"];
    assert!(spec["tls"]["termination"] == "passthrough", "unexpected tls {}", spec["tls"]);
    assert!(spec["to"]["name"] == SERVER_NAME, "unexpected target {}", spec["to"]);
    assert!(spec["port"]["targetPort"] == "federation", "unexpected port {}", spec["port"]);
    Ok(())
}

macro_rules! plan_test {
    ({name: $name:ident, desired: $desired:expr, existing: $existing:expr, expected: $pat:pat}) => {
        #[test]
        fn $name() -> Result<()> {
            let desired: Option<DynamicObject> = $desired;
            let existing: Option<DynamicObject> = $existing;
            let action = plan_route(desired, existing.as_ref());
            assert!(matches!(action, $pat), "unexpected route action {:?}", action);
            Ok(())
        }
    };
}

plan_test!({name: plan_absent, desired: None, existing: None, expected: RouteAction::Absent});
plan_test!({name: plan_create, desired: federation_route(&federated_server_fixture()?, "spire-system"), existing: None, expected: RouteAction::Create(_)});
plan_test!({name: plan_unchanged, desired: federation_route(&federated_server_fixture()?, "spire-system"), existing: federation_route(&federated_server_fixture()?, "spire-system"), expected: RouteAction::Unchanged});
plan_test!({name: plan_delete_managed, desired: None, existing: federation_route(&federated_server_fixture()?, "spire-system"), expected: RouteAction::Delete});
plan_test!({name: plan_leave_foreign_alone, desired: None, existing: Some(foreign_route()), expected: RouteAction::Absent});
plan_test!({name: plan_conflict_with_foreign, desired: federation_route(&federated_server_fixture()?, "spire-system"), existing: Some(foreign_route()), expected: RouteAction::Conflict});

#[test]
fn plan_update_on_spec_drift() -> Result<()> {
    let desired = federation_route(&federated_server_fixture()?, "spire-system");
    let mut existing = desired.clone().expect("expected a Route");
    existing.data["spec"]["tls"]["termination"] = "edge".into();
    existing.data["spec"]["host"] = "federation.apps.example.org".into();

    let action = plan_route(desired, Some(&existing));

    assert!(matches!(action, RouteAction::Update(_)), "expected an update, got {:?}", action);
    Ok(())
}

#[test]
fn plan_ignores_server_populated_fields() -> Result<()> {
    let desired = federation_route(&federated_server_fixture()?, "spire-system");
    let mut existing = desired.clone().expect("expected a Route");
    existing.data["spec"]["host"] = "federation.apps.example.org".into();
    existing.data["status"] = serde_json::json!({"ingress": []});

    let action = plan_route(desired, Some(&existing));

    assert!(matches!(action, RouteAction::Unchanged), "expected no change, got {:?}", action);
    Ok(())
}
