use anyhow::Result;

use super::mod_test::{ctx_fixture, server_fixture};
use super::*;

#[test]
fn rbac_objects_decode_and_carry_operator_metadata() -> Result<()> {
    let objects = rbac_objects(&server_fixture()?, &ctx_fixture())?;

    assert!(objects.cluster_roles.len() == 2, "expected 2 ClusterRoles, got {}", objects.cluster_roles.len());
    assert!(objects.cluster_role_bindings.len() == 2, "expected 2 ClusterRoleBindings, got {}", objects.cluster_role_bindings.len());
    assert!(objects.roles.len() == 2, "expected 2 Roles, got {}", objects.roles.len());
    assert!(objects.role_bindings.len() == 2, "expected 2 RoleBindings, got {}", objects.role_bindings.len());
    for role in objects.cluster_roles.iter() {
        assert!(role.metadata.namespace.is_none(), "expected cluster scoped ClusterRole, got {:?}", role.metadata.namespace);
        assert!(role.metadata.owner_references.is_some(), "expected owner reference on {:?}", role.metadata.name);
        let labels = role.metadata.labels.clone().unwrap_or_default();
        assert!(labels.get(LABEL_MANAGED_BY).map(String::as_str) == Some("spire-operator"), "unexpected labels {:?}", labels);
    }
    for role in objects.roles.iter() {
        assert!(role.metadata.namespace.as_deref() == Some("spire-system"), "unexpected Role namespace {:?}", role.metadata.namespace);
    }
    Ok(())
}

#[test]
fn binding_subjects_point_at_operator_namespace() -> Result<()> {
    let objects = rbac_objects(&server_fixture()?, &ctx_fixture())?;

    let subjects = objects
        .cluster_role_bindings
        .iter()
        .flat_map(|binding| binding.subjects.iter().flatten())
        .chain(objects.role_bindings.iter().flat_map(|binding| binding.subjects.iter().flatten()));
    for subject in subjects {
        assert!(subject.kind == "ServiceAccount", "unexpected subject kind {}", subject.kind);
        assert!(subject.name == SERVER_NAME, "unexpected subject name {}", subject.name);
        assert!(subject.namespace.as_deref() == Some("spire-system"), "unexpected subject namespace {:?}", subject.namespace);
    }
    Ok(())
}

#[test]
fn bundle_role_is_scoped_to_bundle_configmap() -> Result<()> {
    let mut server = server_fixture()?;
    server.spec.bundle_config_map = "trust-bundle".into();

    let objects = rbac_objects(&server, &ctx_fixture())?;

    let bundle_role = objects
        .roles
        .iter()
        .find(|role| role.metadata.name.as_deref() == Some("spire-bundle"))
        .expect("expected the bundle Role");
    for rule in bundle_role.rules.iter().flatten() {
        assert!(
            rule.resource_names.as_deref() == Some(&["trust-bundle".to_string()][..]),
            "unexpected resource names {:?}",
            rule.resource_names
        );
    }
    Ok(())
}

#[test]
fn service_account_is_namespaced() -> Result<()> {
    let sa = service_account(&server_fixture()?, &ctx_fixture());

    assert!(sa.metadata.name.as_deref() == Some(SERVER_NAME), "unexpected name {:?}", sa.metadata.name);
    assert!(sa.metadata.namespace.as_deref() == Some("spire-system"), "unexpected namespace {:?}", sa.metadata.namespace);
    Ok(())
}
