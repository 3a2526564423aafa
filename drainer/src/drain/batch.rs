use super::error::EvictionError;
use super::evict::{EvictionOutcome, PodEvictor};
use crate::gateway::ClusterGateway;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Tally of eviction outcomes across a whole run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EvictionSummary {
    /// Number of batches whose barrier completed.
    pub batches: usize,
    pub evicted: usize,
    pub already_gone: usize,
    pub namespace_terminating: usize,
    pub stopped: usize,
    pub failed: usize,
}

impl EvictionSummary {
    fn record(&mut self, outcome: EvictionOutcome) {
        match outcome {
            EvictionOutcome::Evicted => self.evicted += 1,
            EvictionOutcome::AlreadyGone => self.already_gone += 1,
            EvictionOutcome::NamespaceTerminating => self.namespace_terminating += 1,
            EvictionOutcome::Stopped => self.stopped += 1,
        }
    }
}

/// Evicts Pods in consecutive fixed-size batches; the Pods of one batch are evicted in parallel.
#[derive(Clone)]
pub struct BatchEvictor<G: ClusterGateway> {
    evictor: PodEvictor<G>,
    pods_per_batch: usize,
}

impl<G: ClusterGateway> BatchEvictor<G> {
    pub fn new(gateway: G, pods_per_batch: usize, retry_interval: Duration) -> Self {
        BatchEvictor {
            evictor: PodEvictor::new(gateway, retry_interval),
            pods_per_batch: pods_per_batch.max(1),
        }
    }

    /// Evicts every Pod in `pods`.
    ///
    /// Batch `n + 1` is only dispatched once every eviction of batch `n` has finished. Raising `stop`
    /// closes the stop signal of each in-flight eviction and returns without waiting for them.
    ///
    /// If any eviction fails, the most recently observed failure is returned; earlier ones are
    /// logged and superseded.
    pub async fn evict_all(
        &self,
        pods: Vec<Pod>,
        stop: CancellationToken,
    ) -> Result<EvictionSummary, EvictionError> {
        let mut summary = EvictionSummary::default();
        let mut last_error = None;

        for (batch_index, batch) in pods.chunks(self.pods_per_batch).enumerate() {
            if stop.is_cancelled() {
                break;
            }
            event!(
                Level::DEBUG,
                batch = batch_index,
                pod_count = batch.len(),
                "Dispatching eviction batch"
            );

            let mut tasks = JoinSet::new();
            for pod in batch.iter().cloned() {
                let evictor = self.evictor.clone();
                // Child tokens are cancelled along with `stop`.
                let pod_stop = stop.child_token();
                tasks.spawn(async move {
                    let result = evictor.evict(&pod, &pod_stop).await;
                    (pod, result)
                });
            }

            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        event!(
                            Level::WARN,
                            batch = batch_index,
                            in_flight = tasks.len(),
                            "Eviction stopped before the batch completed"
                        );
                        tasks.detach_all();
                        return finish(summary, last_error);
                    }
                    joined = tasks.join_next() => match joined {
                        None => break,
                        Some(Ok((_, Ok(outcome)))) => summary.record(outcome),
                        Some(Ok((pod, Err(e)))) => {
                            event!(
                                Level::ERROR,
                                pod = %pod.name_any(),
                                error = %e,
                                "Failed to evict pod"
                            );
                            summary.failed += 1;
                            last_error = Some(e);
                        }
                        Some(Err(join_error)) => {
                            event!(Level::ERROR, error = %join_error, "Eviction task did not complete");
                            summary.failed += 1;
                            last_error = Some(EvictionError::Task { source: join_error });
                        }
                    }
                }
            }
            summary.batches += 1;
        }

        finish(summary, last_error)
    }
}

fn finish(
    summary: EvictionSummary,
    last_error: Option<EvictionError>,
) -> Result<EvictionSummary, EvictionError> {
    event!(
        Level::INFO,
        batches = summary.batches,
        evicted = summary.evicted,
        already_gone = summary.already_gone,
        namespace_terminating = summary.namespace_terminating,
        stopped = summary.stopped,
        failed = summary.failed,
        "Finished evicting pods"
    );
    match last_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
