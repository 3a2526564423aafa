use super::batch::{BatchEvictor, EvictionSummary};
use super::error::{self, EvictionError, Result};
use super::filter::{dedup_pods, exclude_by_owner_kind, select_by_node, OwnerFilterPolicy};
use super::jitter;
use super::session::{DrainOutcome, DrainSession};
use crate::constants::{
    DAEMONSET_KIND, EVICTION_RETRY_INTERVAL, KUBE_DNS_LABEL_KEY, KUBE_DNS_LABEL_VALUE,
    KUBE_DNS_NAME, PODS_PER_BATCH, POLL_BASE_INTERVAL, SYSTEM_NAMESPACE,
};
use crate::gateway::{ClusterGateway, PodSelector};

use k8s_openapi::api::core::v1::Pod;
use snafu::ResultExt;
use std::collections::BTreeMap;
use tokio::task::JoinError;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// Tunables for a drain. The defaults match `kubectl drain`-like pacing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrainConfig {
    pub pods_per_batch: usize,
    /// Delay between eviction attempts while eviction admission is throttled.
    pub eviction_retry_interval: Duration,
    /// Base of the jittered delay between checks for pending Pods.
    pub poll_interval: Duration,
    pub owner_filter: OwnerFilterPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        DrainConfig {
            pods_per_batch: PODS_PER_BATCH,
            eviction_retry_interval: EVICTION_RETRY_INTERVAL,
            poll_interval: POLL_BASE_INTERVAL,
            owner_filter: OwnerFilterPolicy::default(),
        }
    }
}

/// Which Pods a drain targets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DrainVariant {
    /// Every Pod on the node outside the system namespace, except DaemonSet members.
    Workloads,
    /// The Pods of one system service that happen to be running on the node.
    SystemService {
        name: String,
        namespace: String,
        labels: BTreeMap<String, String>,
    },
}

impl DrainVariant {
    /// The cluster DNS service.
    pub fn kube_dns() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            KUBE_DNS_LABEL_KEY.to_string(),
            KUBE_DNS_LABEL_VALUE.to_string(),
        );
        DrainVariant::SystemService {
            name: KUBE_DNS_NAME.to_string(),
            namespace: SYSTEM_NAMESPACE.to_string(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Workloads => "workloads",
            Self::SystemService { name, .. } => name,
        }
    }

    fn selector(&self, node_name: &str) -> PodSelector {
        match self {
            Self::Workloads => PodSelector::OnNode {
                node_name: node_name.to_string(),
                excluded_namespace: SYSTEM_NAMESPACE.to_string(),
            },
            Self::SystemService {
                namespace, labels, ..
            } => PodSelector::Labelled {
                namespace: namespace.clone(),
                labels: labels.clone(),
            },
        }
    }

    fn select_targets(&self, node_name: &str, pods: &[Pod], policy: OwnerFilterPolicy) -> Vec<Pod> {
        let selected = match self {
            Self::Workloads => exclude_by_owner_kind(pods, DAEMONSET_KIND, policy),
            Self::SystemService { .. } => select_by_node(pods, node_name),
        };
        dedup_pods(selected)
    }
}

/// Runs drain sessions for one [`DrainVariant`].
#[derive(Clone)]
pub struct DrainCoordinator<G: ClusterGateway> {
    gateway: G,
    variant: DrainVariant,
    config: DrainConfig,
}

impl<G: ClusterGateway> DrainCoordinator<G> {
    pub fn new(gateway: G, variant: DrainVariant, config: DrainConfig) -> Self {
        DrainCoordinator {
            gateway,
            variant,
            config,
        }
    }

    /// Removes every target Pod from `node_name`, giving up after `drain_timeout_seconds`.
    pub async fn drain(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome> {
        let session = DrainSession::new(
            node_name,
            Duration::from_secs(drain_timeout_seconds),
            cancel,
        );
        self.run(&session).await
    }

    /// Drives a session to completion.
    ///
    /// Evictions and the pending-Pod poller run concurrently, and the session resolves on whichever
    /// comes first: the poller seeing no target Pods, the timeout, external cancellation, or the
    /// eviction pipeline finishing with a fatal error. Timeout and cancellation are not errors; they
    /// are reported through [`DrainOutcome`]. A fatal eviction error always wins over the outcome.
    #[instrument(skip(self, session), fields(node = %session.node_name(), variant = %self.variant.name()), err)]
    pub async fn run(&self, session: &DrainSession) -> Result<DrainOutcome> {
        let node_name = session.node_name().to_string();

        let pods = self
            .gateway
            .list_pods(&self.variant.selector(&node_name))
            .await
            .context(error::FindTargetPodsSnafu {
                node_name: node_name.clone(),
            })?;
        let target_pods = self.select_targets(&node_name, &pods);

        event!(
            Level::INFO,
            node = %node_name,
            pod_count = target_pods.len(),
            "{} {} pod(s) found",
            target_pods.len(),
            self.variant.name()
        );

        if target_pods.is_empty() {
            session.stop();
            event!(Level::INFO, node = %node_name, "Done draining node");
            return Ok(DrainOutcome::Drained);
        }

        // The spawned actors must not outlive this call, even when the caller drops it early.
        let _stop_evicting_on_drop = session.stop_evicting().clone().drop_guard();
        let _stop_polling_on_drop = session.stop_polling().clone().drop_guard();

        let evictor = BatchEvictor::new(
            self.gateway.clone(),
            self.config.pods_per_batch,
            self.config.eviction_retry_interval,
        );
        let stop_evicting = session.stop_evicting().clone();
        let mut eviction =
            tokio::spawn(async move { evictor.evict_all(target_pods, stop_evicting).await });

        let drained = CancellationToken::new();
        let polling = tokio::spawn(self.clone().poll_until_drained(
            node_name.clone(),
            session.stop_polling().clone(),
            drained.clone(),
        ));

        let timeout = sleep(session.timeout());
        tokio::pin!(timeout);
        let mut eviction_joined = false;

        let resolution = loop {
            tokio::select! {
                _ = drained.cancelled() => break Ok(DrainOutcome::Drained),
                _ = &mut timeout => {
                    event!(Level::WARN, node = %node_name, "Draining node timeout reached");
                    break Ok(DrainOutcome::TimedOut);
                }
                _ = session.cancellation().cancelled() => {
                    event!(Level::WARN, node = %node_name, "Draining node cancelled");
                    break Ok(DrainOutcome::Cancelled);
                }
                joined = &mut eviction, if !eviction_joined => {
                    eviction_joined = true;
                    match eviction_result(joined, &node_name) {
                        Ok(summary) => event!(
                            Level::INFO,
                            node = %node_name,
                            batches = summary.batches,
                            "All evictions completed, waiting for pods to terminate"
                        ),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        session.stop();
        if let Err(e) = polling.await {
            event!(Level::ERROR, node = %node_name, error = %e, "Pending pod poller did not complete");
        }
        if !eviction_joined {
            // A stopped evictor returns at once, carrying any fatal error it already observed.
            eviction_result(eviction.await, &node_name)?;
        }

        let outcome = resolution?;
        if outcome.is_complete() {
            event!(Level::INFO, node = %node_name, "Done draining node");
        }
        Ok(outcome)
    }

    fn select_targets(&self, node_name: &str, pods: &[Pod]) -> Vec<Pod> {
        self.variant
            .select_targets(node_name, pods, self.config.owner_filter)
    }

    /// Re-lists target Pods after a jittered delay until none remain, then raises `drained`.
    async fn poll_until_drained(
        self,
        node_name: String,
        stop: CancellationToken,
        drained: CancellationToken,
    ) {
        let selector = self.variant.selector(&node_name);
        loop {
            let interval = jitter::apply(self.config.poll_interval);
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = sleep(interval) => {}
            }

            let listed = tokio::select! {
                _ = stop.cancelled() => return,
                listed = self.gateway.list_pods(&selector) => listed,
            };

            match listed {
                Ok(pods) => {
                    let pending = self.select_targets(&node_name, &pods).len();
                    if pending == 0 {
                        drained.cancel();
                        return;
                    }
                    event!(
                        Level::INFO,
                        node = %node_name,
                        pending,
                        "{} pod(s) pending deletion",
                        pending
                    );
                }
                Err(e) => {
                    event!(
                        Level::ERROR,
                        node = %node_name,
                        error = %e,
                        "Error getting list of pending pods"
                    );
                }
            }
        }
    }
}

fn eviction_result(
    joined: std::result::Result<std::result::Result<EvictionSummary, EvictionError>, JoinError>,
    node_name: &str,
) -> Result<EvictionSummary> {
    match joined {
        Ok(result) => result.context(error::EvictPodsSnafu { node_name }),
        Err(e) => Err(e).context(error::EvictionPipelineSnafu { node_name }),
    }
}
