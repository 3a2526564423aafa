use super::error::{self, EvictionError};
use crate::constants::DEFAULT_NAMESPACE;
use crate::gateway::{ApiErrorKind, ClusterGateway};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use snafu::ResultExt;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// How a single Pod eviction ended, short of a fatal error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvictionOutcome {
    /// The eviction API accepted the request.
    Evicted,
    /// The Pod no longer existed.
    AlreadyGone,
    /// The Pod's namespace is being deleted, so its finalizers will remove it.
    NamespaceTerminating,
    /// The stop signal was raised before the eviction was accepted.
    Stopped,
}

/// Evicts one Pod through the eviction API, retrying for as long as eviction admission is throttled.
#[derive(Clone)]
pub struct PodEvictor<G: ClusterGateway> {
    gateway: G,
    retry_interval: Duration,
}

impl<G: ClusterGateway> PodEvictor<G> {
    pub fn new(gateway: G, retry_interval: Duration) -> Self {
        PodEvictor {
            gateway,
            retry_interval,
        }
    }

    /// Creates an eviction for the desired Pod.
    ///
    /// There is no attempt limit: a Pod protected by an unsatisfiable PodDisruptionBudget is retried
    /// until `stop` is raised, at which point this returns `Ok(EvictionOutcome::Stopped)`. Whether
    /// that is acceptable is the caller's decision.
    pub async fn evict(
        &self,
        pod: &Pod,
        stop: &CancellationToken,
    ) -> Result<EvictionOutcome, EvictionError> {
        let pod_name = pod.name_any();
        let namespace = pod
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_default();

        event!(Level::INFO, node = %node_name, pod = %pod_name, namespace = %namespace, "Evicting pod");

        loop {
            match self.gateway.evict_pod(&pod_name, &namespace).await {
                Ok(()) => {
                    event!(Level::INFO, pod = %pod_name, namespace = %namespace, "Pod evicted");
                    return Ok(EvictionOutcome::Evicted);
                }
                Err(e) => match e.kind() {
                    ApiErrorKind::NotFound => {
                        event!(Level::INFO, pod = %pod_name, namespace = %namespace, "Pod already gone");
                        return Ok(EvictionOutcome::AlreadyGone);
                    }
                    // A 429 means eviction admission wants us to wait, typically for a PodDisruptionBudget.
                    ApiErrorKind::TooManyRequests => {
                        event!(
                            Level::INFO,
                            pod = %pod_name,
                            namespace = %namespace,
                            error = %e,
                            "Too many evictions for pod, this may be due to a pod disruption budget. Retrying in {:.2}s.",
                            self.retry_interval.as_secs_f64()
                        );
                        tokio::select! {
                            _ = stop.cancelled() => {}
                            _ = sleep(self.retry_interval) => {}
                        }
                    }
                    ApiErrorKind::NamespaceTerminating => {
                        event!(
                            Level::WARN,
                            pod = %pod_name,
                            namespace = %namespace,
                            "Cannot evict pod, namespace is being deleted"
                        );
                        return Ok(EvictionOutcome::NamespaceTerminating);
                    }
                    ApiErrorKind::Conflict | ApiErrorKind::Other => {
                        return Err(e).context(error::FatalSnafu {
                            pod_name,
                            namespace,
                        });
                    }
                },
            }

            if stop.is_cancelled() {
                event!(
                    Level::INFO,
                    pod = %pod_name,
                    namespace = %namespace,
                    "Stopped evicting pod before the eviction was accepted"
                );
                return Ok(EvictionOutcome::Stopped);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drain::filter::test::fake_pod;
    use crate::gateway::error::test::api_error;
    use crate::gateway::{GatewayError, MockClusterGateway};

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn eviction_error(code: u16, reason: &str, message: &str) -> GatewayError {
        GatewayError::EvictPod {
            source: api_error(code, reason, message),
            pod_name: "web-0".to_string(),
            namespace: "shop".to_string(),
        }
    }

    fn throttled() -> GatewayError {
        eviction_error(
            429,
            "TooManyRequests",
            "Cannot evict pod as it would violate the pod's disruption budget.",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_while_throttled() {
        let throttled_attempts = 3;
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let mut gateway = MockClusterGateway::new();
        let recorded = attempts.clone();
        gateway
            .expect_evict_pod()
            .withf(|pod_name, namespace| pod_name == "web-0" && namespace == "shop")
            .times(throttled_attempts + 1)
            .returning(move |_, _| {
                let mut recorded = recorded.lock().unwrap();
                recorded.push(Instant::now());
                if recorded.len() <= throttled_attempts {
                    Err(throttled())
                } else {
                    Ok(())
                }
            });

        let evictor = PodEvictor::new(Arc::new(gateway), Duration::from_secs(5));
        let pod = fake_pod("web-0", "node-a", &["ReplicaSet"]);
        let outcome = evictor.evict(&pod, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, EvictionOutcome::Evicted);
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), throttled_attempts + 1);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test]
    async fn test_not_found_is_success_without_retry() {
        let mut gateway = MockClusterGateway::new();
        gateway
            .expect_evict_pod()
            .times(1)
            .returning(|_, _| Err(eviction_error(404, "NotFound", "pods \"web-0\" not found")));

        let evictor = PodEvictor::new(Arc::new(gateway), Duration::from_secs(5));
        let pod = fake_pod("web-0", "node-a", &["ReplicaSet"]);
        let outcome = evictor.evict(&pod, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, EvictionOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_namespace_terminating_is_success() {
        let mut gateway = MockClusterGateway::new();
        gateway.expect_evict_pod().times(1).returning(|_, _| {
            Err(eviction_error(
                403,
                "Forbidden",
                "pods \"web-0\" is forbidden: unable to create new content in namespace shop because it is being terminated",
            ))
        });

        let evictor = PodEvictor::new(Arc::new(gateway), Duration::from_secs(5));
        let pod = fake_pod("web-0", "node-a", &["ReplicaSet"]);
        let outcome = evictor.evict(&pod, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, EvictionOutcome::NamespaceTerminating);
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let test_cases = vec![
            eviction_error(403, "Forbidden", "User \"drainer\" cannot create resource \"pods/eviction\""),
            eviction_error(500, "InternalError", "multiple disruption budgets select this pod"),
            eviction_error(409, "Conflict", "conflict"),
        ];
        for err in test_cases {
            let mut gateway = MockClusterGateway::new();
            let err = Mutex::new(Some(err));
            gateway
                .expect_evict_pod()
                .times(1)
                .returning(move |_, _| Err(err.lock().unwrap().take().unwrap()));

            let evictor = PodEvictor::new(Arc::new(gateway), Duration::from_secs(5));
            let pod = fake_pod("web-0", "node-a", &["ReplicaSet"]);
            let result = evictor.evict(&pod, &CancellationToken::new()).await;

            match result {
                Err(EvictionError::Fatal {
                    pod_name,
                    namespace,
                    ..
                }) => {
                    assert_eq!(pod_name, "web-0");
                    assert_eq!(namespace, "shop");
                }
                other => panic!("expected a fatal eviction error, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_throttled_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let mut gateway = MockClusterGateway::new();
        let counted = attempts.clone();
        let stop_after_two = stop.clone();
        gateway.expect_evict_pod().returning(move |_, _| {
            if counted.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                stop_after_two.cancel();
            }
            Err(throttled())
        });

        let evictor = PodEvictor::new(Arc::new(gateway), Duration::from_secs(5));
        let pod = fake_pod("web-0", "node-a", &["ReplicaSet"]);
        let outcome = evictor.evict(&pod, &stop).await.unwrap();

        assert_eq!(outcome, EvictionOutcome::Stopped);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
