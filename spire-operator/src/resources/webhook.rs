use anyhow::Result;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;

use super::rbac::decode;
use super::{overlay_meta, OperandContext, COMPONENT_WEBHOOK, WEBHOOK_NAME};
use spire_core::crd::SpireServer;

const WEBHOOK_CONFIGURATION: &str = include_str!("../../manifests/webhook.yaml");

/// The annotation instructing OpenShift to inject the service CA into the webhooks.
pub const ANNOTATION_INJECT_CABUNDLE: &str = "service.beta.openshift.io/inject-cabundle";

/// The controller manager's ValidatingWebhookConfiguration.
///
/// The webhooks' CA bundles are injected out of band, and are carried over from the live object
/// on update.
pub fn validating_webhook_configuration(server: &SpireServer, ctx: &OperandContext) -> Result<ValidatingWebhookConfiguration> {
    let mut vwc: ValidatingWebhookConfiguration = decode(WEBHOOK_CONFIGURATION, "ValidatingWebhookConfiguration")?;
    overlay_meta(&mut vwc.metadata, server, None, COMPONENT_WEBHOOK);
    vwc.metadata.name = Some(WEBHOOK_NAME.into());
    vwc.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_INJECT_CABUNDLE.into(), "true".into());
    for webhook in vwc.webhooks.iter_mut().flatten() {
        if let Some(service) = webhook.client_config.service.as_mut() {
            service.name = WEBHOOK_NAME.into();
            service.namespace = ctx.namespace.clone();
        }
    }
    Ok(vwc)
}
