use super::error::{self, Result};
use super::selector::{label_selector, PodSelector};
use super::ClusterGateway;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, PostParams};
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::BTreeMap;
use tracing::instrument;

#[derive(Clone)]
/// Concrete implementation of the `ClusterGateway` trait backed by a `kube::Client`. This
/// implementation will almost certainly be used in any case that isn't a unit test.
pub struct K8SClusterGateway {
    k8s_client: kube::client::Client,
}

impl K8SClusterGateway {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SClusterGateway { k8s_client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.k8s_client.clone())
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.k8s_client.clone(), ns),
            None => Api::all(self.k8s_client.clone()),
        }
    }
}

#[async_trait]
impl ClusterGateway for K8SClusterGateway {
    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        self.nodes()
            .get(node_name)
            .await
            .context(error::GetNodeSnafu { node_name })
    }

    #[instrument(skip(self), err)]
    async fn list_nodes(&self, label_filters: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        let label_selector = label_selector(label_filters);
        let nodes = self
            .nodes()
            .list(&ListParams::default().labels(&label_selector))
            .await
            .context(error::ListNodesSnafu {
                label_selector: label_selector.clone(),
            })?;

        Ok(nodes.items)
    }

    #[instrument(skip(self), err)]
    async fn delete_node(&self, node_name: &str) -> Result<()> {
        self.nodes()
            .delete(node_name, &DeleteParams::default())
            .await
            .context(error::DeleteNodeSnafu { node_name })?;

        Ok(())
    }

    #[instrument(skip(self, node), fields(node = %node.name_any()), err)]
    async fn update_node(&self, node: &Node) -> Result<Node> {
        let node_name = node.name_any();
        self.nodes()
            .replace(&node_name, &PostParams::default(), node)
            .await
            .context(error::UpdateNodeSnafu {
                node_name: node_name.clone(),
            })
    }

    #[instrument(skip(self), err)]
    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>> {
        let pods = self
            .pods(selector.namespace())
            .list(&selector.list_params())
            .await
            .context(error::ListPodsSnafu {
                selector: selector.to_string(),
            })?;

        Ok(pods.items)
    }

    // Failures here are classified and logged by the evictor, so they are not recorded on the span.
    #[instrument(skip(self))]
    async fn evict_pod(&self, pod_name: &str, namespace: &str) -> Result<()> {
        self.pods(Some(namespace))
            .evict(pod_name, &EvictParams::default())
            .await
            .context(error::EvictPodSnafu {
                pod_name,
                namespace,
            })?;

        Ok(())
    }
}
