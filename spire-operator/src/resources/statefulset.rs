use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;

use super::{
    object_meta, selector_labels, OperandContext, ANNOTATION_CONTROLLER_MANAGER_CONFIG_HASH, ANNOTATION_SERVER_CONFIG_HASH, COMPONENT_SERVER,
    CONTROLLER_MANAGER_CONFIG_DIR, CONTROLLER_MANAGER_CONFIG_KEY, CONTROLLER_MANAGER_HEALTH_PORT, CONTROLLER_MANAGER_NAME, FEDERATION_TLS_DIR,
    FEDERATION_TLS_SECRET, SERVER_CONFIG_DIR, SERVER_CONFIG_KEY, SERVER_DATA_DIR, SERVER_GRPC_PORT, SERVER_HEALTH_PORT, SERVER_METRICS_PORT,
    SERVER_NAME, SERVER_SOCKET_DIR, WEBHOOK_PORT,
};
use spire_core::crd::{BundleEndpointProfile, SpireServer};

/// The pod container name of the SPIRE server.
///
/// NOTE WELL: do not change the name of this container. It will cause breaking changes.
pub const CONTAINER_SERVER: &str = "spire-server";
/// The pod container name of the SPIRE controller manager.
pub const CONTAINER_CONTROLLER_MANAGER: &str = "spire-controller-manager";

const VOLUME_DATA: &str = "spire-data";
const VOLUME_CONFIG: &str = "spire-config";
const VOLUME_CONTROLLER_MANAGER_CONFIG: &str = "controller-manager-config";
const VOLUME_SOCKET: &str = "spire-server-socket";
const VOLUME_FEDERATION_TLS: &str = "federation-tls";

/// Build the StatefulSet running the SPIRE server & its controller manager.
///
/// The given config hashes land in the pod template's annotations, so any change to a rendered
/// config rolls the server pod.
pub fn statefulset(server: &SpireServer, ctx: &OperandContext, server_conf_hash: &str, controller_manager_conf_hash: &str) -> StatefulSet {
    let spec = &server.spec;
    let selector = selector_labels(server);
    let mut pod_labels = spec.labels.clone();
    pod_labels.extend(selector.clone());

    let mut server_ports = vec![
        container_port("grpc", SERVER_GRPC_PORT),
        container_port("healthz", SERVER_HEALTH_PORT),
        container_port("metrics", SERVER_METRICS_PORT),
    ];
    let mut server_mounts = vec![
        volume_mount(VOLUME_CONFIG, SERVER_CONFIG_DIR, true),
        volume_mount(VOLUME_DATA, SERVER_DATA_DIR, false),
        volume_mount(VOLUME_SOCKET, SERVER_SOCKET_DIR, false),
    ];
    let mut volumes = vec![
        Volume {
            name: VOLUME_CONFIG.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(SERVER_NAME.into()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: VOLUME_CONTROLLER_MANAGER_CONFIG.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(CONTROLLER_MANAGER_NAME.into()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: VOLUME_SOCKET.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ];
    if let Some(federation) = spec.federation.as_ref() {
        server_ports.push(container_port("federation", federation.bundle_endpoint.port));
        if federation.bundle_endpoint.profile == BundleEndpointProfile::HttpsWeb {
            server_mounts.push(volume_mount(VOLUME_FEDERATION_TLS, FEDERATION_TLS_DIR, true));
            volumes.push(Volume {
                name: VOLUME_FEDERATION_TLS.into(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(FEDERATION_TLS_SECRET.into()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }

    let server_container = Container {
        // NOTE WELL: do not change the name of this container. It will cause breaking changes.
        name: CONTAINER_SERVER.into(),
        image: Some(ctx.server_image.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(vec!["-config".into(), format!("{}/{}", SERVER_CONFIG_DIR, SERVER_CONFIG_KEY)]),
        ports: Some(server_ports),
        volume_mounts: Some(server_mounts),
        resources: spec.resources.clone(),
        liveness_probe: Some(http_probe("/live", SERVER_HEALTH_PORT, 15, 60)),
        readiness_probe: Some(http_probe("/ready", SERVER_HEALTH_PORT, 5, 5)),
        ..Default::default()
    };
    let controller_manager_container = Container {
        name: CONTAINER_CONTROLLER_MANAGER.into(),
        image: Some(ctx.controller_manager_image.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(vec![format!("--config={}/{}", CONTROLLER_MANAGER_CONFIG_DIR, CONTROLLER_MANAGER_CONFIG_KEY)]),
        ports: Some(vec![container_port("https", WEBHOOK_PORT), container_port("healthz", CONTROLLER_MANAGER_HEALTH_PORT)]),
        volume_mounts: Some(vec![
            volume_mount(VOLUME_SOCKET, SERVER_SOCKET_DIR, true),
            volume_mount(VOLUME_CONTROLLER_MANAGER_CONFIG, CONTROLLER_MANAGER_CONFIG_DIR, true),
        ]),
        liveness_probe: Some(http_probe("/healthz", CONTROLLER_MANAGER_HEALTH_PORT, 15, 20)),
        readiness_probe: Some(http_probe("/readyz", CONTROLLER_MANAGER_HEALTH_PORT, 5, 10)),
        ..Default::default()
    };

    let node_selector = if spec.node_selector.is_empty() { None } else { Some(spec.node_selector.clone()) };
    let storage_class_name = if spec.persistence.storage_class.is_empty() { None } else { Some(spec.persistence.storage_class.clone()) };

    StatefulSet {
        metadata: object_meta(server, SERVER_NAME, Some(&ctx.namespace), COMPONENT_SERVER),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: SERVER_NAME.into(),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".into()),
                rolling_update: None,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(btreemap! {
                        ANNOTATION_SERVER_CONFIG_HASH.into() => server_conf_hash.into(),
                        ANNOTATION_CONTROLLER_MANAGER_CONFIG_HASH.into() => controller_manager_conf_hash.into(),
                    }),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(SERVER_NAME.into()),
                    share_process_namespace: Some(true),
                    termination_grace_period_seconds: Some(30),
                    containers: vec![server_container, controller_manager_container],
                    volumes: Some(volumes),
                    node_selector,
                    affinity: spec.affinity.clone(),
                    tolerations: spec.tolerations.clone(),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(VOLUME_DATA.into()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec![spec.persistence.access_mode.clone()]),
                    storage_class_name,
                    resources: Some(ResourceRequirements {
                        requests: Some(btreemap! {
                            "storage".into() => Quantity(spec.persistence.size.clone()),
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Check if the live volume claim templates differ from the desired ones.
///
/// Claim templates are immutable once the StatefulSet exists, so a persistence change can only
/// be reported, never applied.
pub fn claim_templates_drifted(existing: &StatefulSet, desired: &StatefulSet) -> bool {
    let claims = |sts: &StatefulSet| {
        sts.spec
            .iter()
            .flat_map(|spec| spec.volume_claim_templates.iter().flatten())
            .map(|claim| {
                let spec = claim.spec.clone().unwrap_or_default();
                let storage = spec.resources.and_then(|res| res.requests).and_then(|req| req.get("storage").cloned());
                (claim.metadata.name.clone(), spec.access_modes, spec.storage_class_name, storage)
            })
            .collect::<Vec<_>>()
    };
    claims(existing) != claims(desired)
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32, initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.into()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}
