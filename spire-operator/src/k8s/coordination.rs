//! Leader election built around the `coordination.k8s.io/v1` API.
//!
//! Modeled after the client-go leader election protocol: a single `Lease` names the current
//! holder, candidates wait a full lease duration without observing a change before taking over,
//! and the holder renews well before the lease expires.
//!
//! The Lease API does not guarantee that only one client acts as leader at a time. Before any
//! write the scheduler re-reads the lease (see `Controller::fence`), which gives a strong degree
//! of fencing as long as every replica follows the same protocol.

use anyhow::{ensure, Context, Result};
use chrono::{prelude::*, Duration};
use futures::prelude::*;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::{
    watcher,
    watcher::{Event, Result as WatcherResult},
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;

pub(super) type DateTimeUtc = DateTime<Utc>;

const METRIC_IS_LEADER: &str = "spire_operator_is_leader";
const METRIC_LEADERSHIP_CHANGE: &str = "spire_operator_num_leadership_changes";

/// Different states which a leader elector may be in.
#[derive(Clone, Debug, PartialEq)]
pub enum LeaderState {
    /// This client instance is the leader.
    Leading,
    /// A different client is currently the leader, identified by the encapsulated string.
    Following(String),
    /// The lease state is unknown, does not exist, or the elector is starting or stopping.
    Standby,
}

/// The action a candidate should take given the last observed state of the lease.
#[derive(Clone, Debug, PartialEq)]
pub enum LeaseAction {
    /// Another candidate holds an unexpired lease.
    Follow(String),
    /// The lease is free or expired, and should be taken over.
    Acquire,
    /// The lease is held by this candidate, and should be renewed.
    Renew,
}

/// Decide what to do with a lease.
///
/// A lease held by another candidate is only considered expired once `lease_duration` has passed
/// since a change to it was last observed. Local observation times are used instead of the
/// lease's own timestamps so that clock skew between nodes does not matter.
pub fn decide(holder: Option<&str>, identity: &str, last_observed_change: DateTimeUtc, now: DateTimeUtc, lease_duration: Duration) -> LeaseAction {
    match holder {
        Some(holder) if holder == identity => LeaseAction::Renew,
        Some(holder) if !holder.is_empty() && last_observed_change + lease_duration > now => LeaseAction::Follow(holder.into()),
        _ => LeaseAction::Acquire,
    }
}

/// Configuration for leader election.
#[derive(Clone, Debug)]
pub struct LeaderElectionConfig {
    /// The name of the lease object.
    name: String,
    /// The namespace of the lease object.
    namespace: String,
    /// The identity to use when the lease is acquired.
    identity: String,
    /// The duration that non-leader candidates will wait to force acquire leadership, measured
    /// against the time of the last observed change.
    ///
    /// When all candidates are restarted under new names they must wait a full `lease_duration`
    /// before acquiring, so keep it as short as clock skew tolerance allows.
    lease_duration: Duration,
    /// The duration after which the current lease holder renews the lease.
    renew_deadline: Duration,
}

impl LeaderElectionConfig {
    /// Create a new `LeaderElectionConfig` instance, validating given inputs.
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>, identity: String, lease_duration: Duration, renew_deadline: Duration) -> Result<Self> {
        ensure!(lease_duration > renew_deadline, "lease_duration must be greater than renew_deadline");
        ensure!(lease_duration.num_seconds() >= 1, "lease_duration must be at least 1 second");
        ensure!(renew_deadline.num_seconds() >= 1, "renew_deadline must be at least 1 second");
        ensure!(!identity.is_empty(), "leader election identity must not be empty");
        Ok(Self {
            name: name.as_ref().to_string(),
            namespace: namespace.as_ref().to_string(),
            identity,
            lease_duration,
            renew_deadline,
        })
    }
}

/// A task which is responsible for acquiring and maintaining a `coordination.k8s.io/v1` `Lease`
/// to establish leadership.
pub struct LeaderElector {
    /// An K8s API wrapper around the client.
    api: Api<Lease>,
    /// The name to use for managing lease fields for Server-Side Apply.
    manager: String,
    /// Leader election config.
    config: LeaderElectionConfig,
    /// Sender for the current state of the leadership coordination system.
    state_tx: watch::Sender<LeaderState>,
    /// The last known leader state.
    state: LeaderState,
    /// A broadcast channel used to trigger task shutdown.
    shutdown: BroadcastStream<()>,

    /// The last observed state of the lease.
    last_observed_lease: Lease,
    /// The last time when a change was observed on the lease.
    last_observed_change: DateTimeUtc,
}

impl LeaderElector {
    /// Create a new `LeaderElector` instance.
    pub fn new(lease: Lease, config: LeaderElectionConfig, manager: impl AsRef<str>, client: Client, shutdown: broadcast::Receiver<()>) -> (Self, watch::Receiver<LeaderState>) {
        metrics::register_gauge!(METRIC_LEADERSHIP_CHANGE, metrics::Unit::Count, "the number of leadership changes of the operator lease");
        metrics::register_gauge!(
            METRIC_IS_LEADER,
            metrics::Unit::Count,
            "a gauge indicating if this pod is the leader, where 1.0 indicates leadership, any other value does not"
        );
        let (state_tx, state_rx) = watch::channel(LeaderState::Standby);
        (
            LeaderElector {
                api: Api::namespaced(client, &config.namespace),
                last_observed_lease: lease,
                last_observed_change: Utc::now(),
                config,
                manager: manager.as_ref().to_string(),
                state_tx,
                state: LeaderState::Standby,
                shutdown: BroadcastStream::new(shutdown),
            },
            state_rx,
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!(identity = %self.config.identity, lease = %self.config.name, "leader elector task started");

        if let Err(err) = self.try_acquire_or_renew().await {
            tracing::error!(error = ?err, "error attempting to acquire/renew lease");
        }

        let lease_watcher = watcher(
            self.api.clone(),
            ListParams {
                field_selector: Some(format!("metadata.name={}", self.config.name)),
                ..Default::default()
            },
        );
        tokio::pin!(lease_watcher);

        loop {
            let delay_duration = self.get_next_acquire_renew_time();
            tracing::debug!("delaying for {}s", delay_duration.as_secs());
            let delay = tokio::time::sleep(delay_duration);
            tokio::pin!(delay);
            tokio::select! {
                Some(lease_change_res) = lease_watcher.next() => self.handle_lease_watcher_change(lease_change_res).await,
                _ = &mut delay => {
                    if let Err(err) = self.try_acquire_or_renew().await {
                        tracing::error!(error = ?err, "error during call to try_acquire_or_renew");
                        if !matches!(&self.state, LeaderState::Standby) {
                            self.set_state(LeaderState::Standby);
                        }
                        self.last_observed_change = Utc::now();
                    }
                }
                _ = self.shutdown.next() => break,
            }
        }

        self.set_state(LeaderState::Standby);
        tracing::info!("leader elector task stopped");
    }

    /// Handle a change from the lease watcher.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_lease_watcher_change(&mut self, res: WatcherResult<Event<Lease>>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from lease watcher stream");
                return;
            }
        };
        let lease = match event {
            Event::Applied(lease) => lease,
            Event::Restarted(mut leases) => match leases.pop() {
                Some(lease) => lease,
                None => return,
            },
            Event::Deleted(_) => return,
        };
        if lease != self.last_observed_lease {
            tracing::debug!("lease update observed from watcher stream");
            self.last_observed_change = Utc::now();
            self.update_lease_from_api(lease);
        }
    }

    /// Ensure that the target lease exists, refreshing the observed lease.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn ensure_lease(&mut self) -> Result<()> {
        let now = Utc::now();
        let get_res = timeout(Self::timeout(), self.api.get(&self.config.name))
            .await
            .context("timeout fetching lease")?;
        match get_res {
            Ok(lease) => {
                if self.last_observed_lease != lease {
                    self.last_observed_change = now;
                    self.update_lease_from_api(lease);
                }
                return Ok(());
            }
            Err(kube::Error::Api(err)) if err.code == 404 => (),
            Err(err) => return Err(err).context("error fetching lease"),
        }

        tracing::info!(lease = %self.config.name, "creating lease");
        let lease = timeout(Self::timeout(), self.api.create(&Default::default(), &self.last_observed_lease))
            .await
            .context("timeout creating lease")?
            .context("error creating lease")?;
        self.last_observed_change = now;
        self.update_lease_from_api(lease);
        Ok(())
    }

    /// Attempt to acquire or renew the target lease.
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn try_acquire_or_renew(&mut self) -> Result<()> {
        self.ensure_lease().await.context("error ensuring lease exists")?;

        let now = Utc::now();
        let holder = self.last_observed_lease.spec.as_ref().and_then(|spec| spec.holder_identity.as_deref());
        let action = decide(holder, &self.config.identity, self.last_observed_change, now, self.config.lease_duration);
        let mut lease = self.last_observed_lease.clone();
        let spec = lease.spec.get_or_insert_with(Default::default);
        match action {
            LeaseAction::Follow(other) => {
                tracing::debug!("leadership lease is held by {} and has not yet expired", other);
                return Ok(());
            }
            LeaseAction::Renew => (),
            LeaseAction::Acquire => {
                tracing::info!(identity = %self.config.identity, "attempting to acquire leadership lease");
                spec.holder_identity = Some(self.config.identity.clone());
                spec.acquire_time = Some(MicroTime(now));
                spec.lease_transitions = Some(spec.lease_transitions.map(|val| val + 1).unwrap_or(0));
            }
        }
        spec.lease_duration_seconds = Some(self.config.lease_duration.num_seconds() as i32);
        spec.renew_time = Some(MicroTime(now));
        lease.metadata.managed_fields = None; // Can not pass this along for update.

        let mut params = PatchParams::apply(&self.manager);
        params.force = true; // Still blocked by the server if the lease is not up-to-date.
        let lease = timeout(Self::timeout(), self.api.patch(&self.config.name, &params, &Patch::Apply(lease)))
            .await
            .context("timeout while updating lease")?
            .context("error updating lease")?;
        self.last_observed_change = now;
        self.update_lease_from_api(lease);

        Ok(())
    }

    /// Update the lease object as observed from the API, updating leadership state as needed.
    #[tracing::instrument(level = "debug", skip(self, lease))]
    fn update_lease_from_api(&mut self, lease: Lease) {
        self.last_observed_lease = lease;
        let spec = self.last_observed_lease.spec.as_ref();
        if let Some(transitions) = spec.and_then(|spec| spec.lease_transitions) {
            metrics::gauge!(METRIC_LEADERSHIP_CHANGE, transitions as f64);
        }
        let holder = spec.and_then(|spec| spec.holder_identity.as_deref()).unwrap_or_default();
        let lease_is_held = holder == self.config.identity;
        let state_opt = match &self.state {
            LeaderState::Leading if lease_is_held => None,
            LeaderState::Following(id) if id == holder => None,
            _ if lease_is_held => Some(LeaderState::Leading),
            _ => Some(LeaderState::Following(holder.into())),
        };
        if let Some(state) = state_opt {
            self.set_state(state);
        }
    }

    /// Get the duration to delay before attempting the next lease update.
    fn get_next_acquire_renew_time(&self) -> std::time::Duration {
        let addend = match &self.state {
            LeaderState::Leading => self.config.renew_deadline,
            _ => self.config.lease_duration,
        };
        (self.last_observed_change + addend - Utc::now()).to_std().unwrap_or_default()
    }

    /// Set the current leader state & emit a state update.
    fn set_state(&mut self, state: LeaderState) {
        if self.state != state {
            tracing::info!(from = ?self.state, to = ?state, "leader state changed");
        }
        self.state = state;
        let _ = self.state_tx.send(self.state.clone());
        metrics::gauge!(METRIC_IS_LEADER, if matches!(self.state, LeaderState::Leading) { 1.0 } else { 0.0 });
    }

    /// The default timeout to use for interacting with the K8s API.
    fn timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}
