use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;

use super::{object_meta, selector_labels, OperandContext, COMPONENT_SERVER, COMPONENT_WEBHOOK, SERVER_GRPC_PORT, SERVER_NAME, WEBHOOK_NAME, WEBHOOK_PORT};
use spire_core::crd::SpireServer;

/// The annotation instructing OpenShift to mint a serving cert for a Service.
pub const ANNOTATION_SERVING_CERT_SECRET: &str = "service.beta.openshift.io/serving-cert-secret-name";

/// The Service fronting the server's gRPC API, and its federation bundle endpoint when enabled.
pub fn server_service(server: &SpireServer, ctx: &OperandContext) -> Service {
    let mut ports = vec![service_port("grpc", 443, SERVER_GRPC_PORT)];
    if let Some(federation) = server.spec.federation.as_ref() {
        let port = federation.bundle_endpoint.port;
        ports.push(service_port("federation", port, port));
    }

    Service {
        metadata: object_meta(server, SERVER_NAME, Some(&ctx.namespace), COMPONENT_SERVER),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(selector_labels(server)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The Service fronting the controller manager's admission webhook.
pub fn webhook_service(server: &SpireServer, ctx: &OperandContext) -> Service {
    let mut metadata = object_meta(server, WEBHOOK_NAME, Some(&ctx.namespace), COMPONENT_WEBHOOK);
    metadata.annotations = Some(btreemap! {
        ANNOTATION_SERVING_CERT_SECRET.into() => format!("{}-tls", WEBHOOK_NAME),
    });

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(selector_labels(server)),
            ports: Some(vec![service_port("https", 443, WEBHOOK_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32, target_port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        protocol: Some("TCP".into()),
        target_port: Some(IntOrString::Int(target_port)),
        ..Default::default()
    }
}
