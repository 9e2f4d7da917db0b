//! SPIRE operator CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns
//! - https://spiffe.io/docs/latest/deploying/spire_server/

mod duration;
#[cfg(test)]
mod duration_test;
mod spire_server;
mod status;
mod validation;
#[cfg(test)]
mod validation_test;

use kube::Resource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

pub use duration::parse_duration;
pub use spire_server::{
    BundleEndpoint, BundleEndpointProfile, CaSubject, Datastore, Federation, FederatesWith, Persistence, SpireServer, SpireServerSpec,
};
pub use status::{Condition, ConditionStatus, SpireServerStatus};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The name of this object.
    fn name(&self) -> &str;

    /// The generation of this object's spec, `0` if unknown.
    fn generation(&self) -> i64;
}

impl RequiredMetadata for SpireServer {
    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or_default()
    }
}

/// Schema for free-form K8s objects (resources, affinity) passed through to the operand pods.
pub(crate) fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert("x-kubernetes-preserve-unknown-fields".into(), serde_json::Value::Bool(true));
    Schema::Object(schema)
}

/// Schema for lists of free-form K8s objects (tolerations) passed through to the operand pods.
pub(crate) fn preserve_unknown_array(gen: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        ..Default::default()
    };
    schema.array().items = Some(preserve_unknown_object(gen).into());
    Schema::Object(schema)
}
