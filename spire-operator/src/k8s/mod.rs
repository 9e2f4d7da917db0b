//! Kubernetes controller.
//!
//! This controller observes `SpireServer` resources and the operands created for them, caching
//! what it sees and spawning scheduler tasks as things change. Only the replica holding the
//! operator lease acts upon scheduler tasks, every other replica just keeps its caches warm so it
//! can take over quickly.

mod coordination;
#[cfg(test)]
mod coordination_test;
mod data;
mod scheduler;
#[cfg(test)]
mod scheduler_test;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::prelude::*;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use maplit::btreemap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, ReceiverStream, WatchStream};

use crate::config::Config;
use crate::k8s::coordination::{LeaderElectionConfig, LeaderElector, LeaderState};
use crate::k8s::scheduler::SchedulerTask;
use crate::resources::{OperandContext, LABEL_MANAGED_BY, LABEL_PART_OF};
use spire_core::crd::SpireServer;
use spire_core::{OPERATOR_LABEL_SELECTORS, OPERATOR_NAME};

/// The timeout duration used before rescheduling a scheduler task.
const RESCHEDULE_TIMEOUT: Duration = Duration::from_secs(5);

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Kubernetes controller for watching SpireServer CRs & their operands.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// Runtime values used to render operands.
    ctx: OperandContext,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// The configuration used to drive the leader election system, moved out after being spawned.
    leader_election_config: Option<LeaderElectionConfig>,
    /// The name of the lease used by the operator.
    lease_name: String,
    /// The currently known leader state.
    leader_state: Option<LeaderState>,

    /// A channel of scheduler tasks.
    scheduler_tasks_tx: mpsc::Sender<SchedulerTask>,
    /// A channel of scheduler tasks.
    scheduler_tasks_rx: ReceiverStream<SchedulerTask>,

    /// All known SpireServer objects.
    spireservers: HashMap<Arc<String>, SpireServer>,
    /// All known StatefulSets managed by this operator.
    statefulsets: HashMap<Arc<String>, StatefulSet>,
    /// All known ConfigMaps managed by this operator.
    configmaps: HashMap<Arc<String>, ConfigMap>,
    /// All known Services managed by this operator.
    services: HashMap<Arc<String>, Service>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let lease_name = Self::generate_lease_name();
        let elect_conf = LeaderElectionConfig::new(
            &config.namespace,
            &lease_name,
            config.pod_name.clone(),
            chrono::Duration::seconds(config.lease_duration_seconds as i64),
            chrono::Duration::seconds(config.lease_renew_seconds as i64),
        )
        .context("invalid lease coordination config")?;
        let (scheduler_tasks_tx, scheduler_tasks_rx) = mpsc::channel(1000);
        scheduler::register_metrics();
        Ok(Self {
            client,
            ctx: OperandContext::from(config.as_ref()),
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            scheduler_tasks_tx,
            scheduler_tasks_rx: ReceiverStream::new(scheduler_tasks_rx),
            leader_election_config: Some(elect_conf),
            lease_name,
            leader_state: None,
            spireservers: Default::default(),
            statefulsets: Default::default(),
            configmaps: Default::default(),
            services: Default::default(),
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        // Spawn leader elector.
        let elect_config = match self.leader_election_config.take() {
            Some(elect_config) => elect_config,
            None => {
                let _ = self.shutdown_tx.send(());
                anyhow::bail!("error accessing leader election config, this should never happen");
            }
        };
        let lease = Self::generate_lease(&self.config);
        let (elector, state_rx_raw) = LeaderElector::new(lease, elect_config, OPERATOR_NAME, self.client.clone(), self.shutdown_tx.subscribe());
        let (elector, mut state_rx) = (elector.spawn(), WatchStream::new(state_rx_raw.clone()));

        // Build watcher streams.
        let params_labels = Self::list_params_operator_labels();
        let spireservers: Api<SpireServer> = Api::all(self.client.clone());
        let spireservers_watcher = watcher(spireservers, ListParams::default());
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let statefulsets_watcher = watcher(statefulsets, params_labels.clone());
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let configmaps_watcher = watcher(configmaps, params_labels.clone());
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let services_watcher = watcher(services, params_labels);
        let mut resync = IntervalStream::new(tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.resync_interval(),
            self.config.resync_interval(),
        ));
        tokio::pin!(spireservers_watcher, statefulsets_watcher, configmaps_watcher, services_watcher);

        tracing::info!("k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = spireservers_watcher.next() => self.handle_spireserver_event(k8s_event_res).await,
                Some(k8s_event_res) = statefulsets_watcher.next() => self.handle_sts_event(k8s_event_res).await,
                Some(k8s_event_res) = configmaps_watcher.next() => self.handle_configmap_event(k8s_event_res).await,
                Some(k8s_event_res) = services_watcher.next() => self.handle_service_event(k8s_event_res).await,
                Some(_) = resync.next() => self.resync(),
                Some(new_leader_state) = state_rx.next() => {
                    // If just becoming a leader, then perform a full data reconciliation to ensure
                    // there are no outstanding tasks which need to be performed since the last leader.
                    //
                    // NOTE WELL: this routine will block this controller from making progress elsewhere.
                    // This is required as an up-to-date view of the system data is required.
                    tracing::debug!(state = ?new_leader_state, "new leader state detected");
                    let was_leading = matches!(&self.leader_state, Some(LeaderState::Leading));
                    self.leader_state = Some(new_leader_state);
                    if !was_leading && matches!(&self.leader_state, Some(LeaderState::Leading)) {
                        loop {
                            if let Err(err) = self.full_data_reconciliation().await {
                                tracing::error!(error = ?err, "error performing full data reconciliation");
                                tokio::time::sleep(RESCHEDULE_TIMEOUT).await;
                                continue;
                            }
                            break;
                        }
                    }
                }
                Some(scheduler_task) = self.scheduler_tasks_rx.next() => {
                    let state = { state_rx_raw.borrow().clone() }; // Ensure borrow ref doesn't leak read lock.
                    self.handle_scheduler_task(scheduler_task, state).await;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutting down");
        if let Err(err) = elector.await {
            tracing::error!(error = ?err, "error shutting down leader elector");
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// Fetch all needed data from the backing K8s cluster, requeuing every SpireServer.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn full_data_reconciliation(&mut self) -> Result<()> {
        let api: Api<SpireServer> = Api::all(self.client.clone());
        let spireservers = api.list(&ListParams::default()).await.context("error fetching spireservers")?;

        let params_labels = Self::list_params_operator_labels();
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let statefulsets = api.list(&params_labels).await.context("error fetching statefulsets")?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let configmaps = api.list(&params_labels).await.context("error fetching configmaps")?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let services = api.list(&params_labels).await.context("error fetching services")?;

        // Operands first, so that their caches are warm when the servers are reconciled.
        self.handle_sts_event(Ok(Event::Restarted(statefulsets.items))).await;
        self.handle_configmap_event(Ok(Event::Restarted(configmaps.items))).await;
        self.handle_service_event(Ok(Event::Restarted(services.items))).await;
        self.handle_spireserver_event(Ok(Event::Restarted(spireservers.items))).await;
        self.resync();

        Ok(())
    }

    /// Requeue every known SpireServer.
    fn resync(&self) {
        tracing::debug!(count = self.spireservers.len(), "resyncing spireservers");
        for name in self.spireservers.keys() {
            self.spawn_scheduler_task(SchedulerTask::SpireServerUpdated(name.clone()), false);
        }
    }

    /// Spawn a task which emits a new scheduler task.
    ///
    /// This indirection keeps the task queue bounded without blocking the controller, which
    /// would dead-lock it once the queue hits its cap. Pending sends pile up as spawned tasks
    /// instead, and drain as the controller works through the queue.
    fn spawn_scheduler_task(&self, task: SchedulerTask, is_retry: bool) {
        let tx = self.scheduler_tasks_tx.clone();
        tokio::spawn(async move {
            if is_retry {
                tokio::time::sleep(RESCHEDULE_TIMEOUT).await;
            }
            let _res = tx.send(task).await;
        });
    }

    /// Create a list params object which selects only objects managed by the operator.
    fn list_params_operator_labels() -> ListParams {
        ListParams {
            label_selector: Some(OPERATOR_LABEL_SELECTORS.into()),
            ..Default::default()
        }
    }

    /// Generate the name to be used for the lease.
    fn generate_lease_name() -> String {
        OPERATOR_NAME.into()
    }

    /// Generate a lease object to be used with the leader coordination system.
    fn generate_lease(config: &Config) -> Lease {
        let now = chrono::Utc::now();
        Lease {
            metadata: ObjectMeta {
                name: Some(Self::generate_lease_name()),
                namespace: Some(config.namespace.clone()),
                labels: Some(btreemap! {
                    LABEL_PART_OF.into() => "spire".into(),
                    LABEL_MANAGED_BY.into() => OPERATOR_NAME.into(),
                }),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                acquire_time: Some(MicroTime(now)),
                holder_identity: Some(config.pod_name.clone()),
                lease_duration_seconds: Some(config.lease_duration_seconds as i32),
                lease_transitions: Some(0),
                renew_time: Some(MicroTime(now)),
            }),
        }
    }
}
