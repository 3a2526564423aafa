use crate::gateway::GatewayError;

use snafu::Snafu;

/// The drain result type.
pub type Result<T> = std::result::Result<T, DrainError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EvictionError {
    #[snafu(display("Unable to evict Pod '{}/{}': '{}'", namespace, pod_name, source))]
    /// The eviction API rejected the request in a way that retrying will not fix.
    Fatal {
        source: GatewayError,
        pod_name: String,
        namespace: String,
    },

    #[snafu(display("An eviction task did not complete: '{}'", source))]
    Task { source: tokio::task::JoinError },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Unable to find drainable Pods for Node '{}': '{}'", node_name, source))]
    FindTargetPods {
        source: GatewayError,
        node_name: String,
    },

    #[snafu(display(
        "Error evicting Pods from Node '{}', last error was: '{}'",
        node_name,
        source
    ))]
    EvictPods {
        source: EvictionError,
        node_name: String,
    },

    #[snafu(display("Eviction pipeline for Node '{}' did not complete: '{}'", node_name, source))]
    EvictionPipeline {
        source: tokio::task::JoinError,
        node_name: String,
    },
}
