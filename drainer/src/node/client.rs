use super::error::{self, Result};
use super::{parse_provider_id, preemptible_label_filters, NodeIdentity};
use crate::drain::{DrainConfig, DrainCoordinator, DrainOutcome, DrainVariant};
use crate::gateway::ClusterGateway;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[cfg(any(feature = "mockall", test))]
use mockall::{mock, predicate::*};

#[async_trait]
/// The operations a scheduling loop needs to retire preemptible Nodes. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
pub trait PreemptibleNodeClient: Clone + Sized + Send + Sync {
    /// Evicts all workload Pods from the Node, leaving DaemonSet Pods and the system namespace alone.
    async fn drain_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome>;
    /// Evicts the cluster DNS Pods running on the Node.
    async fn drain_kube_dns_from_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome>;
    async fn get_node(&self, node_name: &str) -> Result<Node>;
    async fn delete_node(&self, node_name: &str) -> Result<()>;
    /// Lists preemptible Nodes that also match every label in `filters`.
    async fn get_preemptible_nodes(&self, filters: &BTreeMap<String, String>) -> Result<Vec<Node>>;
    async fn get_node_identity(&self, node_name: &str) -> Result<NodeIdentity>;
    // Re-reads the Node before writing; a concurrent modification surfaces as a conflict.
    async fn set_node_annotation(&self, node_name: &str, key: &str, value: &str) -> Result<()>;
    async fn set_unschedulable_state(&self, node_name: &str, unschedulable: bool) -> Result<()>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock PreemptibleNodeClient for use in tests.
    pub PreemptibleNodeClient {}
    #[async_trait]
    impl PreemptibleNodeClient for PreemptibleNodeClient {
        async fn drain_node(
            &self,
            node_name: &str,
            drain_timeout_seconds: u64,
            cancel: CancellationToken,
        ) -> Result<DrainOutcome>;
        async fn drain_kube_dns_from_node(
            &self,
            node_name: &str,
            drain_timeout_seconds: u64,
            cancel: CancellationToken,
        ) -> Result<DrainOutcome>;
        async fn get_node(&self, node_name: &str) -> Result<Node>;
        async fn delete_node(&self, node_name: &str) -> Result<()>;
        async fn get_preemptible_nodes(&self, filters: &BTreeMap<String, String>) -> Result<Vec<Node>>;
        async fn get_node_identity(&self, node_name: &str) -> Result<NodeIdentity>;
        async fn set_node_annotation(&self, node_name: &str, key: &str, value: &str) -> Result<()>;
        async fn set_unschedulable_state(&self, node_name: &str, unschedulable: bool) -> Result<()>;
    }

    impl Clone for PreemptibleNodeClient {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> PreemptibleNodeClient for Arc<T>
where
    T: PreemptibleNodeClient,
{
    async fn drain_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome> {
        (**self)
            .drain_node(node_name, drain_timeout_seconds, cancel)
            .await
    }

    async fn drain_kube_dns_from_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome> {
        (**self)
            .drain_kube_dns_from_node(node_name, drain_timeout_seconds, cancel)
            .await
    }

    async fn get_node(&self, node_name: &str) -> Result<Node> {
        (**self).get_node(node_name).await
    }

    async fn delete_node(&self, node_name: &str) -> Result<()> {
        (**self).delete_node(node_name).await
    }

    async fn get_preemptible_nodes(&self, filters: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        (**self).get_preemptible_nodes(filters).await
    }

    async fn get_node_identity(&self, node_name: &str) -> Result<NodeIdentity> {
        (**self).get_node_identity(node_name).await
    }

    async fn set_node_annotation(&self, node_name: &str, key: &str, value: &str) -> Result<()> {
        (**self).set_node_annotation(node_name, key, value).await
    }

    async fn set_unschedulable_state(&self, node_name: &str, unschedulable: bool) -> Result<()> {
        (**self)
            .set_unschedulable_state(node_name, unschedulable)
            .await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `PreemptibleNodeClient` trait, backed by a [`ClusterGateway`].
pub struct ClusterPreemptibleNodeClient<G: ClusterGateway> {
    gateway: G,
    workloads: DrainCoordinator<G>,
    kube_dns: DrainCoordinator<G>,
}

impl<G: ClusterGateway> ClusterPreemptibleNodeClient<G> {
    pub fn new(gateway: G, config: DrainConfig) -> Self {
        ClusterPreemptibleNodeClient {
            workloads: DrainCoordinator::new(
                gateway.clone(),
                DrainVariant::Workloads,
                config.clone(),
            ),
            kube_dns: DrainCoordinator::new(gateway.clone(), DrainVariant::kube_dns(), config),
            gateway,
        }
    }

    async fn modify_node<F>(&self, node_name: &str, modify: F) -> Result<()>
    where
        F: FnOnce(&mut Node) + Send,
    {
        let mut node = self.get_node(node_name).await?;
        modify(&mut node);
        self.gateway
            .update_node(&node)
            .await
            .context(error::WriteNodeSnafu { node_name })?;
        Ok(())
    }
}

#[async_trait]
impl<G: ClusterGateway> PreemptibleNodeClient for ClusterPreemptibleNodeClient<G> {
    #[instrument(skip(self, cancel), err)]
    async fn drain_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome> {
        self.workloads
            .drain(node_name, drain_timeout_seconds, cancel)
            .await
            .context(error::DrainSnafu)
    }

    #[instrument(skip(self, cancel), err)]
    async fn drain_kube_dns_from_node(
        &self,
        node_name: &str,
        drain_timeout_seconds: u64,
        cancel: CancellationToken,
    ) -> Result<DrainOutcome> {
        self.kube_dns
            .drain(node_name, drain_timeout_seconds, cancel)
            .await
            .context(error::DrainSnafu)
    }

    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Node> {
        self.gateway
            .get_node(node_name)
            .await
            .context(error::FetchNodeSnafu { node_name })
    }

    #[instrument(skip(self), err)]
    async fn delete_node(&self, node_name: &str) -> Result<()> {
        self.gateway
            .delete_node(node_name)
            .await
            .context(error::RemoveNodeSnafu { node_name })?;
        event!(Level::INFO, node = %node_name, "Deleted node");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_preemptible_nodes(&self, filters: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        self.gateway
            .list_nodes(&preemptible_label_filters(filters))
            .await
            .context(error::ListPreemptibleNodesSnafu)
    }

    #[instrument(skip(self), err)]
    async fn get_node_identity(&self, node_name: &str) -> Result<NodeIdentity> {
        let node = self.get_node(node_name).await?;
        let provider_id = node
            .spec
            .and_then(|spec| spec.provider_id)
            .context(error::MissingProviderIdSnafu { node_name })?;
        parse_provider_id(node_name, &provider_id)
    }

    #[instrument(skip(self), err)]
    async fn set_node_annotation(&self, node_name: &str, key: &str, value: &str) -> Result<()> {
        self.modify_node(node_name, |node| {
            node.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn set_unschedulable_state(&self, node_name: &str, unschedulable: bool) -> Result<()> {
        self.modify_node(node_name, |node| {
            node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
        })
        .await?;
        event!(Level::INFO, node = %node_name, unschedulable, "Updated node schedulability");
        Ok(())
    }
}
