//! The only part of the crate that performs network I/O against the Kubernetes control plane.
//!
//! Everything above this layer talks to a [`ClusterGateway`], which keeps retry policy out of the
//! transport and lets tests substitute a mock or an in-memory fake cluster.
pub mod error;
mod k8s;
mod selector;

pub use self::error::{ApiErrorKind, Error as GatewayError};
pub use self::k8s::K8SClusterGateway;
pub use self::selector::{label_selector, PodSelector};
use self::error::Result;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

#[async_trait]
/// The set of control-plane capabilities the drain engine and node operations rely on.
///
/// Implementations perform exactly one API call per method. No retries, batching or caching.
pub trait ClusterGateway: Clone + Sized + Send + Sync + 'static {
    async fn get_node(&self, node_name: &str) -> Result<Node>;
    /// Lists Nodes carrying every label in `label_filters`.
    async fn list_nodes(&self, label_filters: &BTreeMap<String, String>) -> Result<Vec<Node>>;
    async fn delete_node(&self, node_name: &str) -> Result<()>;
    /// Overwrites a Node. The write is rejected with a conflict if the Node changed since it was read.
    async fn update_node(&self, node: &Node) -> Result<Node>;
    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>>;
    /// Requests a graceful removal of the Pod through the eviction API.
    async fn evict_pod(&self, pod_name: &str, namespace: &str) -> Result<()>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock ClusterGateway for use in tests.
    pub ClusterGateway {}
    #[async_trait]
    impl ClusterGateway for ClusterGateway {
        async fn get_node(&self, node_name: &str) -> Result<Node>;
        async fn list_nodes(&self, label_filters: &BTreeMap<String, String>) -> Result<Vec<Node>>;
        async fn delete_node(&self, node_name: &str) -> Result<()>;
        async fn update_node(&self, node: &Node) -> Result<Node>;
        async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>>;
        async fn evict_pod(&self, pod_name: &str, namespace: &str) -> Result<()>;
    }

    impl Clone for ClusterGateway {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> ClusterGateway for Arc<T>
where
    T: ClusterGateway,
{
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        (**self).get_node(node_name).await
    }

    async fn list_nodes(&self, label_filters: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        (**self).list_nodes(label_filters).await
    }

    async fn delete_node(&self, node_name: &str) -> Result<()> {
        (**self).delete_node(node_name).await
    }

    async fn update_node(&self, node: &Node) -> Result<Node> {
        (**self).update_node(node).await
    }

    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>> {
        (**self).list_pods(selector).await
    }

    async fn evict_pod(&self, pod_name: &str, namespace: &str) -> Result<()> {
        (**self).evict_pod(pod_name, namespace).await
    }
}
