//! Reconciliation of SpireServer objects.
//!
//! ## Overview
//! A reconciliation pass renders every operand of a SpireServer from scratch, compares it against
//! the live object, and only writes when an operator owned field has drifted. Writes use K8s
//! [Server-Side Apply](https://kubernetes.io/docs/reference/using-api/server-side-apply/) with
//! forced ownership, so fields owned by other managers (injected CA bundles, trust bundle data
//! written by SPIRE) are left untouched.
//!
//! Every write is fenced by re-reading the operator lease. A replica which lost leadership in
//! the middle of a pass fails its writes instead of racing the new leader.
//!
//! The outcome of each pass is surfaced through the SpireServer's status conditions. The status
//! is only patched when a condition actually changed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::Resource;
use serde_json::json;
use tokio::time::timeout;

use crate::k8s::coordination::LeaderState;
use crate::k8s::Controller;
use crate::resources::{
    self, config_hash, federation_route, plan_route, route_api_resource, Operand, RouteAction, CONTROLLER_MANAGER_CONFIG_KEY, FEDERATION_ROUTE_NAME,
    ROUTE_API_VERSION, SERVER_CONFIG_KEY,
};
use spire_core::crd::{RequiredMetadata, SpireServer, SpireServerStatus};
use spire_core::{OPERATOR_NAME, SPIRE_SERVER_SINGLETON_NAME};

/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(5);

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_CONFIGURATION_VALID: &str = "ConfigurationValid";
pub const CONDITION_TTL_CONFIGURATION_VALID: &str = "TTLConfigurationValid";
pub const CONDITION_RBAC_READY: &str = "RBACReady";
pub const CONDITION_SERVICES_READY: &str = "ServicesReady";
pub const CONDITION_CONFIGMAPS_READY: &str = "ConfigMapsReady";
pub const CONDITION_STATEFULSET_READY: &str = "StatefulSetReady";
pub const CONDITION_WEBHOOK_READY: &str = "WebhookReady";
pub const CONDITION_FEDERATION_ROUTE_READY: &str = "FederationRouteReady";

/// The operand conditions which make up the aggregate `Ready` condition, in reconciliation order.
const OPERAND_CONDITIONS: &[&str] = &[
    CONDITION_RBAC_READY,
    CONDITION_SERVICES_READY,
    CONDITION_CONFIGMAPS_READY,
    CONDITION_STATEFULSET_READY,
    CONDITION_WEBHOOK_READY,
    CONDITION_FEDERATION_ROUTE_READY,
];

const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

const METRIC_RECONCILE_TOTAL: &str = "spire_operator_reconcile_total";
const METRIC_RECONCILE_DURATION: &str = "spire_operator_reconcile_duration_seconds";
const METRIC_TTL_WARNINGS: &str = "spire_operator_ttl_warnings";

/// Register the scheduler's metrics with the global recorder.
pub(super) fn register_metrics() {
    metrics::register_counter!(METRIC_RECONCILE_TOTAL, metrics::Unit::Count, "the number of SpireServer reconciliation passes, by result");
    metrics::register_histogram!(METRIC_RECONCILE_DURATION, metrics::Unit::Seconds, "the duration of SpireServer reconciliation passes");
    metrics::register_gauge!(METRIC_TTL_WARNINGS, metrics::Unit::Count, "the number of TTL warnings of the reconciled SpireServer");
}

/// A scheduling task to be performed.
#[derive(Debug)]
pub enum SchedulerTask {
    SpireServerUpdated(Arc<String>),
    SpireServerDeleted(Arc<String>),
}

/// The result of a reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ReconcileOutcome {
    /// All operands are up-to-date & ready.
    Ready,
    /// All operands were applied, some are not ready yet.
    Progressing,
    /// The SpireServer's config is invalid, nothing was applied.
    Invalid,
    /// The pass failed, and will be retried.
    Error,
}

impl ReconcileOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Progressing => "progressing",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

impl Controller {
    /// Handle scheduler tasks.
    pub(super) async fn handle_scheduler_task(&mut self, task: SchedulerTask, state: LeaderState) {
        if !matches!(state, LeaderState::Leading) {
            return;
        }
        match task {
            SchedulerTask::SpireServerUpdated(name) => self.scheduler_spireserver_updated(name).await,
            SchedulerTask::SpireServerDeleted(name) => self.scheduler_spireserver_deleted(name).await,
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// SpireServer Reconciliation ////////////////////////////////////////////////
impl Controller {
    #[tracing::instrument(level = "debug", skip(self, name), fields(name = %name))]
    async fn scheduler_spireserver_updated(&mut self, name: Arc<String>) {
        tracing::debug!("handling scheduler spireserver updated");
        if name.as_str() != SPIRE_SERVER_SINGLETON_NAME {
            tracing::warn!(%name, "ignoring SpireServer, only the SpireServer named {:?} is reconciled", SPIRE_SERVER_SINGLETON_NAME);
            return;
        }
        let server = match self.spireservers.get(&name) {
            Some(server) => server.clone(),
            None => return,
        };

        let start = Instant::now();
        let mut status = server.status.clone().unwrap_or_default();
        let mut outcome = match self.reconcile_spireserver(&server, &mut status).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = ?err, %name, "error reconciling SpireServer");
                ReconcileOutcome::Error
            }
        };

        // Status is written even when the pass failed, it carries the failure.
        if server.status.as_ref() != Some(&status) {
            match self.patch_spireserver_status(&server, &status).await {
                Ok(updated) => {
                    self.spireservers.insert(name.clone(), updated);
                }
                Err(err) => {
                    tracing::error!(error = ?err, %name, "error updating SpireServer status");
                    outcome = ReconcileOutcome::Error;
                }
            }
        }

        metrics::increment_counter!(METRIC_RECONCILE_TOTAL, "result" => outcome.as_str());
        metrics::histogram!(METRIC_RECONCILE_DURATION, start.elapsed().as_secs_f64());
        tracing::info!(%name, result = outcome.as_str(), "finished SpireServer reconciliation");
        if outcome == ReconcileOutcome::Error {
            self.spawn_scheduler_task(SchedulerTask::SpireServerUpdated(name), true);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, name), fields(name = %name))]
    async fn scheduler_spireserver_deleted(&mut self, name: Arc<String>) {
        tracing::debug!("handling scheduler spireserver deleted");
        if name.as_str() != SPIRE_SERVER_SINGLETON_NAME {
            return;
        }
        // Operands carry a controller owner reference, the garbage collector removes them.
        tracing::info!(%name, "SpireServer deleted, operands will be garbage collected");
        metrics::gauge!(METRIC_TTL_WARNINGS, 0.0);
    }

    /// Run a reconciliation pass over the given server, recording the results in `status`.
    async fn reconcile_spireserver(&self, server: &SpireServer, status: &mut SpireServerStatus) -> Result<ReconcileOutcome> {
        let (generation, now) = (server.generation(), Utc::now().to_rfc3339());
        if preflight(server, status, &now) == Preflight::Invalid {
            return Ok(ReconcileOutcome::Invalid);
        }
        let ctx = &self.ctx;
        let mut conditions = Conditions { status, generation, now: &now };

        self.apply_operand(self.namespaced(), resources::service_account(server, ctx))
            .await
            .map_err(|err| conditions.fail(CONDITION_RBAC_READY, err))?;

        self.apply_services(server).await.map_err(|err| conditions.fail(CONDITION_SERVICES_READY, err))?;
        conditions.set(CONDITION_SERVICES_READY, true, "ServicesReady", "");

        self.apply_rbac(server).await.map_err(|err| conditions.fail(CONDITION_RBAC_READY, err))?;
        conditions.set(CONDITION_RBAC_READY, true, "RBACReady", "");

        let (server_conf_hash, cm_conf_hash) = self
            .apply_configmaps(server)
            .await
            .map_err(|err| conditions.fail(CONDITION_CONFIGMAPS_READY, err))?;
        conditions.set(CONDITION_CONFIGMAPS_READY, true, "ConfigMapsReady", "");

        let desired_sts = resources::statefulset(server, ctx, &server_conf_hash, &cm_conf_hash);
        let live_sts = self
            .apply_operand(self.namespaced(), desired_sts.clone())
            .await
            .map_err(|err| conditions.fail(CONDITION_STATEFULSET_READY, err))?;
        let (sts_ready, sts_reason, sts_message) = statefulset_condition(&live_sts, &desired_sts);
        conditions.set(CONDITION_STATEFULSET_READY, sts_ready, sts_reason, sts_message);

        let vwc = resources::validating_webhook_configuration(server, ctx).map_err(|err| conditions.fail(CONDITION_WEBHOOK_READY, err))?;
        self.apply_operand(Api::all(self.client.clone()), vwc)
            .await
            .map_err(|err| conditions.fail(CONDITION_WEBHOOK_READY, err))?;
        conditions.set(CONDITION_WEBHOOK_READY, true, "WebhookReady", "");

        let route = self
            .reconcile_federation_route(server)
            .await
            .map_err(|err| conditions.fail(CONDITION_FEDERATION_ROUTE_READY, err))?;
        match route {
            Some((ready, reason, message)) => conditions.set(CONDITION_FEDERATION_ROUTE_READY, ready, reason, message),
            None => {
                conditions.status.remove_condition(CONDITION_FEDERATION_ROUTE_READY);
            }
        }

        let (ready, reason, message) = aggregate_ready(&*conditions.status);
        conditions.set(CONDITION_READY, ready, reason, message);
        Ok(if ready { ReconcileOutcome::Ready } else { ReconcileOutcome::Progressing })
    }

    /// Apply the server & webhook Services.
    async fn apply_services(&self, server: &SpireServer) -> Result<()> {
        self.apply_operand(self.namespaced(), resources::server_service(server, &self.ctx)).await?;
        self.apply_operand(self.namespaced(), resources::webhook_service(server, &self.ctx)).await?;
        Ok(())
    }

    /// Apply all Roles, ClusterRoles & their bindings.
    async fn apply_rbac(&self, server: &SpireServer) -> Result<()> {
        let rbac = resources::rbac_objects(server, &self.ctx)?;
        for role in rbac.cluster_roles {
            self.apply_operand(Api::all(self.client.clone()), role).await?;
        }
        for binding in rbac.cluster_role_bindings {
            self.apply_operand(Api::all(self.client.clone()), binding).await?;
        }
        for role in rbac.roles {
            self.apply_operand(self.namespaced(), role).await?;
        }
        for binding in rbac.role_bindings {
            self.apply_operand(self.namespaced(), binding).await?;
        }
        Ok(())
    }

    /// Apply the bundle & config ConfigMaps, returning the hashes of the server & controller manager configs.
    async fn apply_configmaps(&self, server: &SpireServer) -> Result<(String, String)> {
        self.apply_operand(self.namespaced(), resources::bundle_configmap(server, &self.ctx)).await?;
        let server_cm = resources::server_configmap(server, &self.ctx)?;
        let server_conf_hash = data_hash(&server_cm, SERVER_CONFIG_KEY);
        self.apply_operand(self.namespaced(), server_cm).await?;
        let cm_cm = resources::controller_manager_configmap(server, &self.ctx)?;
        let cm_conf_hash = data_hash(&cm_cm, CONTROLLER_MANAGER_CONFIG_KEY);
        self.apply_operand(self.namespaced(), cm_cm).await?;
        Ok((server_conf_hash, cm_conf_hash))
    }

    /// Converge the federation Route, returning the Route's condition, if it should have one.
    ///
    /// Clusters without the Route API & Routes not managed by the operator are reported through
    /// the condition rather than failing the pass.
    async fn reconcile_federation_route(&self, server: &SpireServer) -> Result<Option<(bool, &'static str, String)>> {
        let desired = federation_route(server, &self.ctx.namespace);
        if !self.route_api_available().await? {
            return Ok(desired.map(|_| {
                (false, "RouteAPIUnavailable", format!("the {} API is not served by this cluster", ROUTE_API_VERSION))
            }));
        }

        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &self.ctx.namespace, &route_api_resource());
        let existing = timeout(API_TIMEOUT, api.get(FEDERATION_ROUTE_NAME)).await.context("timeout while fetching Route")?;
        let existing = match existing {
            Ok(route) => Some(route),
            Err(kube::Error::Api(err)) if err.code == 404 => None,
            Err(err) => return Err(err).context("error fetching Route"),
        };

        match plan_route(desired, existing.as_ref()) {
            RouteAction::Absent => Ok(None),
            RouteAction::Unchanged => Ok(Some((true, "RouteReady", String::new()))),
            RouteAction::Conflict => {
                tracing::warn!(route = FEDERATION_ROUTE_NAME, "federation Route exists but is not managed by the operator, leaving it untouched");
                Ok(Some((false, "RouteConflict", format!("Route {} exists and is not managed by {}", FEDERATION_ROUTE_NAME, OPERATOR_NAME))))
            }
            RouteAction::Create(route) => {
                self.fence().await?;
                tracing::info!(route = FEDERATION_ROUTE_NAME, "creating federation Route");
                timeout(API_TIMEOUT, api.create(&PostParams::default(), &route))
                    .await
                    .context("timeout while creating Route")?
                    .context("error creating Route")?;
                Ok(Some((true, "RouteReady", String::new())))
            }
            RouteAction::Update(route) => {
                self.fence().await?;
                tracing::info!(route = FEDERATION_ROUTE_NAME, "patching federation Route");
                timeout(API_TIMEOUT, api.patch(FEDERATION_ROUTE_NAME, &apply_params(), &Patch::Apply(&route)))
                    .await
                    .context("timeout while patching Route")?
                    .context("error patching Route")?;
                Ok(Some((true, "RouteReady", String::new())))
            }
            RouteAction::Delete => {
                self.fence().await?;
                tracing::info!(route = FEDERATION_ROUTE_NAME, "deleting federation Route");
                let res = timeout(API_TIMEOUT, api.delete(FEDERATION_ROUTE_NAME, &Default::default()))
                    .await
                    .context("timeout while deleting Route")?;
                match res {
                    Ok(_) => Ok(None),
                    Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
                    Err(err) => Err(err).context("error deleting Route"),
                }
            }
        }
    }

    /// Check if the cluster serves the OpenShift Route API.
    async fn route_api_available(&self) -> Result<bool> {
        let res = timeout(API_TIMEOUT, self.client.list_api_group_resources(ROUTE_API_VERSION))
            .await
            .context("timeout while discovering Route API")?;
        match res {
            Ok(list) => Ok(list.resources.iter().any(|res| res.name == "routes")),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
            Err(err) => Err(err).context("error discovering Route API"),
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// K8s API Methods ///////////////////////////////////////////////////////////
impl Controller {
    /// An API handle for the operator's namespace.
    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.ctx.namespace)
    }

    /// Converge a single operand: create it if missing, else patch it if it has drifted.
    #[tracing::instrument(level = "debug", skip(self, api, desired))]
    async fn apply_operand<K: Operand>(&self, api: Api<K>, mut desired: K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let name = match desired.meta().name.clone() {
            Some(name) => name,
            None => bail!("{} operand has no name", kind),
        };
        let existing = timeout(API_TIMEOUT, api.get(&name))
            .await
            .with_context(|| format!("timeout while fetching {} {}", kind, name))?;
        let existing = match existing {
            Ok(existing) => existing,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                self.fence().await?;
                tracing::info!(%kind, %name, "creating operand");
                return timeout(API_TIMEOUT, api.create(&PostParams::default(), &desired))
                    .await
                    .with_context(|| format!("timeout while creating {} {}", kind, name))?
                    .with_context(|| format!("error creating {} {}", kind, name));
            }
            Err(err) => return Err(err).with_context(|| format!("error fetching {} {}", kind, name)),
        };

        K::merge_existing(&mut desired, &existing);
        if !K::needs_update(&existing, &desired) {
            tracing::debug!(%kind, %name, "operand is up-to-date");
            return Ok(existing);
        }
        self.fence().await?;
        tracing::info!(%kind, %name, "patching drifted operand");
        desired.meta_mut().managed_fields = None;
        timeout(API_TIMEOUT, api.patch(&name, &apply_params(), &Patch::Apply(&desired)))
            .await
            .with_context(|| format!("timeout while patching {} {}", kind, name))?
            .with_context(|| format!("error patching {} {}", kind, name))
    }

    /// Patch the status of the given SpireServer using Server-Side Apply.
    #[tracing::instrument(level = "debug", skip(self, server, status))]
    async fn patch_spireserver_status(&self, server: &SpireServer, status: &SpireServerStatus) -> Result<SpireServer> {
        self.fence().await?;
        tracing::debug!(name = server.name(), "patching SpireServer status");
        let api: Api<SpireServer> = Api::all(self.client.clone());
        let patch = json!({
            "apiVersion": SpireServer::api_version(&()),
            "kind": SpireServer::kind(&()),
            "status": status,
        });
        timeout(API_TIMEOUT, api.patch_status(server.name(), &apply_params(), &Patch::Apply(&patch)))
            .await
            .context("timeout while updating SpireServer status")?
            .context("error updating SpireServer status")
    }

    /// Ensure we have ownership of the lease, else return an error.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn fence(&self) -> Result<()> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let lease = timeout(API_TIMEOUT, api.get(&self.lease_name))
            .await
            .context("timeout while fetching lease")?
            .context("error fetching lease")?;
        let is_lease_holder = lease
            .spec
            .as_ref()
            .and_then(|spec| spec.holder_identity.as_deref())
            .map(|holder_id| holder_id == self.config.pod_name.as_str())
            .unwrap_or(false);
        if !is_lease_holder {
            bail!("lease is no longer held by this pod");
        }
        Ok(())
    }
}

/// Server-Side Apply params of the operator.
fn apply_params() -> PatchParams {
    let mut params = PatchParams::apply(OPERATOR_NAME);
    params.force = true;
    params
}

/// The config hash of the given ConfigMap key.
fn data_hash(cm: &ConfigMap, key: &str) -> String {
    config_hash(cm.data.as_ref().and_then(|data| data.get(key)).map(String::as_str).unwrap_or_default())
}

//////////////////////////////////////////////////////////////////////////////
// Status Conditions /////////////////////////////////////////////////////////

/// A status being built up over a single reconciliation pass.
pub(super) struct Conditions<'a> {
    pub status: &'a mut SpireServerStatus,
    pub generation: i64,
    pub now: &'a str,
}

impl<'a> Conditions<'a> {
    pub fn set(&mut self, type_: &str, status: bool, reason: &str, message: impl Into<String>) {
        self.status.set_condition(type_, status, reason, message, self.generation, self.now);
    }

    /// Mark the given operand condition & `Ready` as failed, passing on the error.
    pub fn fail(&mut self, type_: &str, err: anyhow::Error) -> anyhow::Error {
        self.set(type_, false, REASON_RECONCILE_FAILED, format!("{:#}", err));
        self.set(CONDITION_READY, false, REASON_RECONCILE_FAILED, format!("error reconciling {}", type_));
        err
    }
}

/// The result of checking a SpireServer before anything is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Preflight {
    Proceed,
    Invalid,
}

/// Validate the server's spec & TTLs, recording the results in `status`.
///
/// TTL warnings do not stop the pass, they are logged & surfaced in the TTL condition.
pub(super) fn preflight(server: &SpireServer, status: &mut SpireServerStatus, now: &str) -> Preflight {
    let mut conditions = Conditions { status, generation: server.generation(), now };
    if let Err(errs) = server.spec.validate() {
        let message = errs.join("; ");
        conditions.status.remove_condition(CONDITION_TTL_CONFIGURATION_VALID);
        tracing::warn!(name = server.name(), errors = %message, "SpireServer configuration is invalid");
        conditions.set(CONDITION_CONFIGURATION_VALID, false, "InvalidConfiguration", message);
        conditions.set(CONDITION_READY, false, "InvalidConfiguration", "SpireServer configuration is invalid");
        return Preflight::Invalid;
    }
    conditions.set(CONDITION_CONFIGURATION_VALID, true, "ValidConfiguration", "");

    let report = server.spec.ttl_config().map_err(|err| err.to_string()).and_then(|ttls| ttls.check().map_err(|err| err.to_string()));
    let report = match report {
        Ok(report) => report,
        Err(message) => {
            tracing::warn!(name = server.name(), error = %message, "SpireServer TTL configuration is invalid");
            conditions.set(CONDITION_TTL_CONFIGURATION_VALID, false, "InvalidTTLConfiguration", message);
            conditions.set(CONDITION_READY, false, "InvalidTTLConfiguration", "SpireServer TTL configuration is invalid");
            return Preflight::Invalid;
        }
    };
    for warning in report.warnings.iter() {
        tracing::warn!(name = server.name(), "{}", warning);
    }
    metrics::gauge!(METRIC_TTL_WARNINGS, report.warnings.len() as f64);
    match report.status_message {
        Some(summary) => {
            let message = format!("{}: {}", summary, report.warnings.join("; "));
            conditions.set(CONDITION_TTL_CONFIGURATION_VALID, true, "TTLWarnings", message)
        }
        None => conditions.set(CONDITION_TTL_CONFIGURATION_VALID, true, "ValidTTLConfiguration", ""),
    }
    Preflight::Proceed
}

/// The `StatefulSetReady` condition of the live StatefulSet.
///
/// A persistence change which the live claim templates can not take is reported ahead of
/// rollout progress, as it needs manual intervention.
pub(super) fn statefulset_condition(live: &StatefulSet, desired: &StatefulSet) -> (bool, &'static str, String) {
    if resources::claim_templates_drifted(live, desired) {
        let message = "volume claim templates are immutable, persistence changes require the StatefulSet to be recreated";
        return (false, "PersistenceImmutable", message.into());
    }
    match statefulset_ready(live) {
        (true, message) => (true, "StatefulSetReady", message),
        (false, message) => (false, "StatefulSetNotReady", message),
    }
}

/// Check if the server StatefulSet has rolled out & all of its replicas are ready.
pub(super) fn statefulset_ready(sts: &StatefulSet) -> (bool, String) {
    let desired = sts.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
    let status = sts.status.clone().unwrap_or_default();
    if status.observed_generation.unwrap_or_default() < sts.metadata.generation.unwrap_or_default() {
        return (false, "StatefulSet update has not been observed yet".into());
    }
    let (updated, ready) = (status.updated_replicas.unwrap_or_default(), status.ready_replicas.unwrap_or_default());
    if updated < desired {
        return (false, format!("{}/{} replicas updated", updated, desired));
    }
    (ready >= desired, format!("{}/{} replicas ready", ready, desired))
}

/// Aggregate the operand conditions into the `Ready` condition.
pub(super) fn aggregate_ready(status: &SpireServerStatus) -> (bool, &'static str, String) {
    let pending: Vec<&str> = OPERAND_CONDITIONS
        .iter()
        .copied()
        .filter(|type_| status.condition(type_).is_some() && !status.is_true(type_))
        .collect();
    if pending.is_empty() {
        (true, "Reconciled", "all operands are ready".into())
    } else {
        (false, "OperandsNotReady", format!("waiting on {}", pending.join(", ")))
    }
}
