use crate::drain::DrainError;
use crate::gateway::GatewayError;

use snafu::Snafu;

/// The node client result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to fetch Node '{}': '{}'", node_name, source))]
    FetchNode {
        source: GatewayError,
        node_name: String,
    },

    #[snafu(display("Unable to list preemptible Nodes: '{}'", source))]
    ListPreemptibleNodes { source: GatewayError },

    #[snafu(display("Unable to remove Node '{}' from the cluster: '{}'", node_name, source))]
    RemoveNode {
        source: GatewayError,
        node_name: String,
    },

    #[snafu(display("Unable to write changes to Node '{}': '{}'", node_name, source))]
    WriteNode {
        source: GatewayError,
        node_name: String,
    },

    #[snafu(display("Node '{}' has no provider ID", node_name))]
    MissingProviderId { node_name: String },

    #[snafu(display(
        "Node '{}' has provider ID '{}', expected '<scheme>://<project>/<zone>/<instance>'",
        node_name,
        provider_id
    ))]
    MalformedProviderId {
        node_name: String,
        provider_id: String,
    },

    #[snafu(display("{}", source))]
    Drain { source: DrainError },
}
