use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use maplit::btreemap;

use super::{
    object_meta, render_controller_manager_config, render_server_config, OperandContext, COMPONENT_BUNDLE, COMPONENT_CONTROLLER_MANAGER,
    COMPONENT_SERVER, CONTROLLER_MANAGER_CONFIG_KEY, CONTROLLER_MANAGER_NAME, SERVER_CONFIG_KEY, SERVER_NAME,
};
use spire_core::crd::SpireServer;

/// The ConfigMap holding the server's `server.conf`.
pub fn server_configmap(server: &SpireServer, ctx: &OperandContext) -> Result<ConfigMap> {
    let conf = render_server_config(server, ctx)?;
    Ok(ConfigMap {
        metadata: object_meta(server, SERVER_NAME, Some(&ctx.namespace), COMPONENT_SERVER),
        data: Some(btreemap! { SERVER_CONFIG_KEY.into() => conf }),
        ..Default::default()
    })
}

/// The ConfigMap holding the controller manager's config.
pub fn controller_manager_configmap(server: &SpireServer, ctx: &OperandContext) -> Result<ConfigMap> {
    let conf = render_controller_manager_config(server, ctx)?;
    Ok(ConfigMap {
        metadata: object_meta(server, CONTROLLER_MANAGER_NAME, Some(&ctx.namespace), COMPONENT_CONTROLLER_MANAGER),
        data: Some(btreemap! { CONTROLLER_MANAGER_CONFIG_KEY.into() => conf }),
        ..Default::default()
    })
}

/// The ConfigMap into which the server's k8sbundle notifier publishes the trust bundle.
///
/// Its data belongs to SPIRE, so it is created without any.
pub fn bundle_configmap(server: &SpireServer, ctx: &OperandContext) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(server, &server.spec.bundle_config_map, Some(&ctx.namespace), COMPONENT_BUNDLE),
        ..Default::default()
    }
}
