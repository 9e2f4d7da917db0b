use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher::Event;
use kube::Resource;

use crate::k8s::scheduler::SchedulerTask;
use crate::k8s::{Controller, EventResult};
use crate::resources::LABEL_INSTANCE;
use spire_core::crd::SpireServer;

/// The delay applied after a watcher error, before polling the watcher again.
const WATCHER_ERROR_DELAY: Duration = Duration::from_secs(10);

//////////////////////////////////////////////////////////////////////////////
// SpireServer Events ////////////////////////////////////////////////////////
impl Controller {
    /// Handle `SpireServer` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_spireserver_event(&mut self, res: EventResult<SpireServer>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from SpireServer k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.spireserver_applied(obj),
            Event::Deleted(obj) => self.spireserver_deleted(obj),
            Event::Restarted(objs) => {
                for obj in objs {
                    self.spireserver_applied(obj);
                }
            }
        }
    }

    fn spireserver_applied(&mut self, server: SpireServer) {
        let name_str = match server.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let (name, requeue) = match self.spireservers.get_key_value(name_str) {
            Some((key, old)) => {
                if old == &server {
                    return;
                }
                (Arc::clone(key), spec_changed(old, &server))
            }
            None => (Arc::new(name_str.clone()), true),
        };
        // Status updates are cached, but only spec changes need a reconciliation pass.
        self.spireservers.insert(name.clone(), server);
        if requeue {
            self.spawn_scheduler_task(SchedulerTask::SpireServerUpdated(name), false);
        }
    }

    fn spireserver_deleted(&mut self, server: SpireServer) {
        let name_str = match server.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return,
        };
        if let Some((name, _server)) = self.spireservers.remove_entry(name_str) {
            self.spawn_scheduler_task(SchedulerTask::SpireServerDeleted(name), false);
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// Operand Events ////////////////////////////////////////////////////////////
impl Controller {
    /// Handle `StatefulSet` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_sts_event(&mut self, res: EventResult<StatefulSet>) {
        let owners = match res {
            Ok(event) => cache_event(&mut self.statefulsets, event),
            Err(err) => {
                tracing::error!(error = ?err, "error from StatefulSet k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        self.requeue_owners(owners);
    }

    /// Handle `ConfigMap` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_configmap_event(&mut self, res: EventResult<ConfigMap>) {
        let owners = match res {
            Ok(event) => cache_event(&mut self.configmaps, event),
            Err(err) => {
                tracing::error!(error = ?err, "error from ConfigMap k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        self.requeue_owners(owners);
    }

    /// Handle `Service` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_service_event(&mut self, res: EventResult<Service>) {
        let owners = match res {
            Ok(event) => cache_event(&mut self.services, event),
            Err(err) => {
                tracing::error!(error = ?err, "error from Service k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        self.requeue_owners(owners);
    }

    /// Requeue the given SpireServers, if they are known.
    fn requeue_owners(&self, owners: Vec<String>) {
        for owner in owners {
            if let Some((name, _)) = self.spireservers.get_key_value(&owner) {
                self.spawn_scheduler_task(SchedulerTask::SpireServerUpdated(name.clone()), false);
            }
        }
    }
}

/// Apply a watcher event to the given operand cache.
///
/// Returns the names of the SpireServers owning any object which changed or was deleted.
pub(super) fn cache_event<K>(cache: &mut HashMap<Arc<String>, K>, event: Event<K>) -> Vec<String>
where
    K: Resource + PartialEq,
{
    let mut owners = Vec::new();
    match event {
        Event::Applied(obj) => owners.extend(cache_applied(cache, obj)),
        Event::Deleted(obj) => {
            if let Some(name) = obj.meta().name.as_ref() {
                cache.remove(name);
            }
            owners.extend(owner_name(obj.meta()));
        }
        Event::Restarted(objs) => {
            for obj in objs {
                owners.extend(cache_applied(cache, obj));
            }
        }
    }
    owners.sort();
    owners.dedup();
    owners
}

/// Cache the given object, returning the name of its owning SpireServer if it changed.
fn cache_applied<K>(cache: &mut HashMap<Arc<String>, K>, obj: K) -> Option<String>
where
    K: Resource + PartialEq,
{
    let name_str = obj.meta().name.as_ref()?;
    let name = match cache.get_key_value(name_str) {
        Some((key, old)) => {
            if old == &obj {
                return None;
            }
            Arc::clone(key) // No additional alloc.
        }
        None => Arc::new(name_str.clone()),
    };
    let owner = owner_name(obj.meta());
    cache.insert(name, obj);
    owner
}

/// The name of the SpireServer controlling the object with the given metadata.
///
/// The controller owner reference is authoritative, the instance label is used as a fallback
/// for objects whose owner references were stripped.
pub(super) fn owner_name(meta: &ObjectMeta) -> Option<String> {
    let kind = SpireServer::kind(&());
    let from_owner = meta
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.kind == kind && owner.controller == Some(true))
        .map(|owner| owner.name.clone());
    from_owner.or_else(|| meta.labels.as_ref().and_then(|labels| labels.get(LABEL_INSTANCE)).cloned())
}

/// Check if a SpireServer changed in a way which requires a reconciliation pass.
///
/// Status updates, most of which are written by the operator itself, do not.
pub(super) fn spec_changed(old: &SpireServer, new: &SpireServer) -> bool {
    old.spec != new.spec || old.metadata.generation != new.metadata.generation || old.metadata.labels != new.metadata.labels
}
