//! ServiceAccount & RBAC objects of the server and its controller manager.
//!
//! The roles are shipped as embedded manifests, onto which the operator's namespace, labels &
//! owner reference are overlaid.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, Subject};
use serde::de::DeserializeOwned;

use super::{object_meta, overlay_meta, OperandContext, COMPONENT_BUNDLE, COMPONENT_CONTROLLER_MANAGER, COMPONENT_RBAC, COMPONENT_SERVER, SERVER_NAME};
use spire_core::crd::SpireServer;

const SERVER_CLUSTER_ROLE: &str = include_str!("../../manifests/server-clusterrole.yaml");
const SERVER_CLUSTER_ROLE_BINDING: &str = include_str!("../../manifests/server-clusterrolebinding.yaml");
const BUNDLE_ROLE: &str = include_str!("../../manifests/bundle-role.yaml");
const BUNDLE_ROLE_BINDING: &str = include_str!("../../manifests/bundle-rolebinding.yaml");
const CONTROLLER_MANAGER_CLUSTER_ROLE: &str = include_str!("../../manifests/controller-manager-clusterrole.yaml");
const CONTROLLER_MANAGER_CLUSTER_ROLE_BINDING: &str = include_str!("../../manifests/controller-manager-clusterrolebinding.yaml");
const LEADER_ELECTION_ROLE: &str = include_str!("../../manifests/controller-manager-leader-election-role.yaml");
const LEADER_ELECTION_ROLE_BINDING: &str = include_str!("../../manifests/controller-manager-leader-election-rolebinding.yaml");

/// All RBAC objects needed by the server pod.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RbacObjects {
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
}

/// The ServiceAccount used by the server pod.
pub fn service_account(server: &SpireServer, ctx: &OperandContext) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(server, SERVER_NAME, Some(&ctx.namespace), COMPONENT_SERVER),
        ..Default::default()
    }
}

/// Build the RBAC objects of the given server.
pub fn rbac_objects(server: &SpireServer, ctx: &OperandContext) -> Result<RbacObjects> {
    let ns = ctx.namespace.as_str();

    let mut server_role: ClusterRole = decode(SERVER_CLUSTER_ROLE, "server ClusterRole")?;
    overlay_meta(&mut server_role.metadata, server, None, COMPONENT_RBAC);
    let mut cm_role: ClusterRole = decode(CONTROLLER_MANAGER_CLUSTER_ROLE, "controller manager ClusterRole")?;
    overlay_meta(&mut cm_role.metadata, server, None, COMPONENT_CONTROLLER_MANAGER);

    let mut server_binding: ClusterRoleBinding = decode(SERVER_CLUSTER_ROLE_BINDING, "server ClusterRoleBinding")?;
    overlay_meta(&mut server_binding.metadata, server, None, COMPONENT_RBAC);
    overlay_subjects(server_binding.subjects.as_mut(), ns);
    let mut cm_binding: ClusterRoleBinding = decode(CONTROLLER_MANAGER_CLUSTER_ROLE_BINDING, "controller manager ClusterRoleBinding")?;
    overlay_meta(&mut cm_binding.metadata, server, None, COMPONENT_CONTROLLER_MANAGER);
    overlay_subjects(cm_binding.subjects.as_mut(), ns);

    let mut bundle_role: Role = decode(BUNDLE_ROLE, "bundle Role")?;
    overlay_meta(&mut bundle_role.metadata, server, Some(ns), COMPONENT_BUNDLE);
    for rule in bundle_role.rules.iter_mut().flatten() {
        rule.resource_names = Some(vec![server.spec.bundle_config_map.clone()]);
    }
    let mut election_role: Role = decode(LEADER_ELECTION_ROLE, "leader election Role")?;
    overlay_meta(&mut election_role.metadata, server, Some(ns), COMPONENT_CONTROLLER_MANAGER);

    let mut bundle_binding: RoleBinding = decode(BUNDLE_ROLE_BINDING, "bundle RoleBinding")?;
    overlay_meta(&mut bundle_binding.metadata, server, Some(ns), COMPONENT_BUNDLE);
    overlay_subjects(bundle_binding.subjects.as_mut(), ns);
    let mut election_binding: RoleBinding = decode(LEADER_ELECTION_ROLE_BINDING, "leader election RoleBinding")?;
    overlay_meta(&mut election_binding.metadata, server, Some(ns), COMPONENT_CONTROLLER_MANAGER);
    overlay_subjects(election_binding.subjects.as_mut(), ns);

    Ok(RbacObjects {
        cluster_roles: vec![server_role, cm_role],
        cluster_role_bindings: vec![server_binding, cm_binding],
        roles: vec![bundle_role, election_role],
        role_bindings: vec![bundle_binding, election_binding],
    })
}

/// Point all ServiceAccount subjects at the operator's namespace.
fn overlay_subjects(subjects: Option<&mut Vec<Subject>>, namespace: &str) {
    for subject in subjects.into_iter().flatten() {
        if subject.kind == "ServiceAccount" {
            subject.namespace = Some(namespace.into());
        }
    }
}

pub(super) fn decode<T: DeserializeOwned>(manifest: &str, what: &str) -> Result<T> {
    serde_yaml::from_str(manifest).with_context(|| format!("error decoding embedded {} manifest", what))
}
