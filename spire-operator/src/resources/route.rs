//! The OpenShift Route exposing the federation bundle endpoint.
//!
//! Routes are not part of the core K8s API, so they are handled as dynamic objects. A Route of
//! the same name which the operator did not create is never touched.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;

use super::{labels, owner_reference, COMPONENT_FEDERATION, FEDERATION_ROUTE_NAME, LABEL_MANAGED_BY, SERVER_NAME};
use spire_core::crd::SpireServer;
use spire_core::OPERATOR_NAME;

/// The group/version of the OpenShift Route API.
pub const ROUTE_API_VERSION: &str = "route.openshift.io/v1";

/// The action needed to converge the federation Route.
#[derive(Clone, Debug)]
pub enum RouteAction {
    /// No Route exists and none is wanted.
    Absent,
    /// The Route does not exist and must be created.
    Create(DynamicObject),
    /// The operator's Route has drifted and must be updated.
    Update(DynamicObject),
    /// The operator's Route is up to date.
    Unchanged,
    /// The operator's Route is no longer wanted and must be deleted.
    Delete,
    /// A Route of the same name exists which is not managed by the operator.
    Conflict,
}

/// The API resource of OpenShift Routes.
pub fn route_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"), "routes")
}

/// Build the federation Route, if the server wants one.
pub fn federation_route(server: &SpireServer, namespace: &str) -> Option<DynamicObject> {
    if !server.spec.manages_federation_route() {
        return None;
    }
    let mut route = DynamicObject::new(FEDERATION_ROUTE_NAME, &route_api_resource()).within(namespace);
    route.metadata.labels = Some(labels(server, COMPONENT_FEDERATION));
    route.metadata.owner_references = owner_reference(server).map(|owner| vec![owner]);
    route.data = json!({
        "spec": {
            "to": {"kind": "Service", "name": SERVER_NAME, "weight": 100},
            "port": {"targetPort": "federation"},
            "tls": {"termination": "passthrough", "insecureEdgeTerminationPolicy": "None"},
            "wildcardPolicy": "None",
        }
    });
    Some(route)
}

/// Check if the given object carries the operator's `managed-by` label.
pub fn is_operator_managed(obj: &DynamicObject) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .map(|val| val == OPERATOR_NAME)
        .unwrap_or(false)
}

/// Determine how to converge the live Route towards the desired one.
pub fn plan_route(desired: Option<DynamicObject>, existing: Option<&DynamicObject>) -> RouteAction {
    match (desired, existing) {
        (None, None) => RouteAction::Absent,
        (None, Some(existing)) if is_operator_managed(existing) => RouteAction::Delete,
        (None, Some(_)) => RouteAction::Absent,
        (Some(desired), None) => RouteAction::Create(desired),
        (Some(_), Some(existing)) if !is_operator_managed(existing) => RouteAction::Conflict,
        (Some(desired), Some(existing)) => {
            if route_drifted(existing, &desired) {
                RouteAction::Update(desired)
            } else {
                RouteAction::Unchanged
            }
        }
    }
}

/// Compare the operator owned fields of two Routes.
fn route_drifted(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    let labels_drifted = match (desired.metadata.labels.as_ref(), existing.metadata.labels.as_ref()) {
        (Some(desired), Some(existing)) => desired.iter().any(|(key, val)| existing.get(key) != Some(val)),
        (Some(desired), None) => !desired.is_empty(),
        (None, _) => false,
    };
    let spec_drifted = match desired.data.get("spec").and_then(|spec| spec.as_object()) {
        Some(desired_spec) => {
            let existing_spec = existing.data.get("spec");
            desired_spec
                .iter()
                .any(|(key, val)| existing_spec.and_then(|spec| spec.get(key)) != Some(val))
        }
        None => false,
    };
    labels_drifted || spec_drifted
}
