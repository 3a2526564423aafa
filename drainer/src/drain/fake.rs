//! An in-memory cluster for exercising the drain pipeline with real concurrency and paused time.
use crate::gateway::error::test::api_error;
use crate::gateway::error::Result;
use crate::gateway::{ClusterGateway, GatewayError, PodSelector};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

/// A scripted answer to an eviction request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Reply {
    Accept,
    NotFound,
    Throttle,
    NamespaceTerminating,
    Reject,
}

#[derive(Clone, Debug)]
pub(crate) struct EvictionCall {
    pub(crate) pod_name: String,
    pub(crate) started: Instant,
    pub(crate) finished: Instant,
}

#[derive(Default)]
struct State {
    pods: Vec<Pod>,
    // The last scripted reply for a Pod repeats forever.
    replies: HashMap<String, VecDeque<Reply>>,
    evict_latency: Duration,
    in_flight: usize,
    max_in_flight: usize,
    evictions: Vec<EvictionCall>,
    list_calls: usize,
    listed_at: Vec<Instant>,
    failing_list_calls: HashSet<usize>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub(crate) fn with_pods(pods: Vec<Pod>) -> Self {
        let cluster = FakeCluster::default();
        cluster.state.lock().unwrap().pods = pods;
        cluster
    }

    pub(crate) fn evict_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().evict_latency = latency;
        self
    }

    pub(crate) fn reply(self, pod_name: &str, replies: &[Reply]) -> Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(pod_name.to_string(), replies.iter().copied().collect());
        self
    }

    /// Fails the Pod listings with the given call numbers, counting from 1.
    pub(crate) fn fail_lists(self, calls: &[usize]) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_list_calls
            .extend(calls.iter().copied());
        self
    }

    pub(crate) fn evictions(&self) -> Vec<EvictionCall> {
        self.state.lock().unwrap().evictions.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub(crate) fn list_call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().listed_at.clone()
    }

    pub(crate) fn remaining_pods(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pods
            .iter()
            .map(|pod| pod.name_any())
            .collect()
    }

    fn next_reply(&self, pod_name: &str) -> Reply {
        let mut state = self.state.lock().unwrap();
        match state.replies.get_mut(pod_name) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap_or(Reply::Accept),
            Some(replies) => replies.front().copied().unwrap_or(Reply::Accept),
            None => Reply::Accept,
        }
    }
}

fn matches(selector: &PodSelector, pod: &Pod) -> bool {
    match selector {
        PodSelector::OnNode {
            node_name,
            excluded_namespace,
        } => {
            let assigned = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref());
            assigned == Some(node_name.as_str())
                && pod.namespace().as_deref() != Some(excluded_namespace.as_str())
        }
        PodSelector::Labelled { namespace, labels } => {
            pod.namespace().as_deref() == Some(namespace.as_str())
                && labels
                    .iter()
                    .all(|(key, value)| pod.labels().get(key) == Some(value))
        }
    }
}

fn eviction_error(pod_name: &str, namespace: &str, code: u16, reason: &str, message: &str) -> GatewayError {
    GatewayError::EvictPod {
        source: api_error(code, reason, message),
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn get_node(&self, _node_name: &str) -> Result<Node> {
        unimplemented!("the fake cluster only models Pods")
    }

    async fn list_nodes(&self, _label_filters: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        unimplemented!("the fake cluster only models Pods")
    }

    async fn delete_node(&self, _node_name: &str) -> Result<()> {
        unimplemented!("the fake cluster only models Pods")
    }

    async fn update_node(&self, _node: &Node) -> Result<Node> {
        unimplemented!("the fake cluster only models Pods")
    }

    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        state.listed_at.push(Instant::now());
        if state.failing_list_calls.contains(&state.list_calls) {
            return Err(GatewayError::ListPods {
                source: api_error(500, "InternalError", "etcdserver: request timed out"),
                selector: selector.to_string(),
            });
        }
        Ok(state
            .pods
            .iter()
            .filter(|pod| matches(selector, pod))
            .cloned()
            .collect())
    }

    async fn evict_pod(&self, pod_name: &str, namespace: &str) -> Result<()> {
        let (started, latency) = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            (Instant::now(), state.evict_latency)
        };
        sleep(latency).await;

        let reply = self.next_reply(pod_name);
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        state.evictions.push(EvictionCall {
            pod_name: pod_name.to_string(),
            started,
            finished: Instant::now(),
        });

        match reply {
            Reply::Accept => {
                state.pods.retain(|pod| {
                    !(pod.name_any() == pod_name && pod.namespace().as_deref() == Some(namespace))
                });
                Ok(())
            }
            Reply::NotFound => Err(eviction_error(pod_name, namespace, 404, "NotFound", "pods not found")),
            Reply::Throttle => Err(eviction_error(
                pod_name,
                namespace,
                429,
                "TooManyRequests",
                "Cannot evict pod as it would violate the pod's disruption budget.",
            )),
            Reply::NamespaceTerminating => Err(eviction_error(
                pod_name,
                namespace,
                403,
                "Forbidden",
                "unable to create new content in namespace because it is being terminated",
            )),
            Reply::Reject => Err(eviction_error(
                pod_name,
                namespace,
                500,
                "InternalError",
                "This pod has more than one PodDisruptionBudget",
            )),
        }
    }
}
