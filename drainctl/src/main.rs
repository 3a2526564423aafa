use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::path::PathBuf;

use drainer::constants::DEFAULT_DRAIN_TIMEOUT_SECONDS;
use drainer::drain::{DrainConfig, DrainOutcome, OwnerFilterPolicy};
use drainer::gateway::K8SClusterGateway;
use drainer::node::{ClusterPreemptibleNodeClient, PreemptibleNodeClient};
use drainer::telemetry;

use argh::FromArgs;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::ResourceExt;
use snafu::{ensure, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// The module-wide result type.
type Result<T> = std::result::Result<T, drainctl_error::Error>;

type NodeClient = ClusterPreemptibleNodeClient<K8SClusterGateway>;

#[derive(FromArgs, Debug)]
/// Drains, cordons and retires preemptible Kubernetes nodes.
struct Arguments {
    /// path to a kubeconfig file. Without it, in-cluster credentials or $KUBECONFIG are used.
    #[argh(option)]
    kubeconfig: Option<PathBuf>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Drain(DrainArgs),
    DrainKubeDns(DrainKubeDnsArgs),
    Retire(RetireArgs),
    Identity(IdentityArgs),
    List(ListArgs),
    Annotate(AnnotateArgs),
    Cordon(CordonArgs),
    Uncordon(UncordonArgs),
    Delete(DeleteArgs),
}

#[derive(FromArgs, Debug)]
/// Evict all workload pods from a node.
#[argh(subcommand, name = "drain")]
struct DrainArgs {
    /// name of the node
    #[argh(option)]
    node: String,

    /// seconds to wait for the node to empty
    #[argh(option, default = "DEFAULT_DRAIN_TIMEOUT_SECONDS")]
    timeout_seconds: u64,

    /// how pods with several owners are matched against DaemonSet ownership
    #[argh(option, default = "OwnerFilterPolicy::default()")]
    owner_filter: OwnerFilterPolicy,
}

#[derive(FromArgs, Debug)]
/// Evict the cluster DNS pods running on a node.
#[argh(subcommand, name = "drain-kube-dns")]
struct DrainKubeDnsArgs {
    /// name of the node
    #[argh(option)]
    node: String,

    /// seconds to wait for the DNS pods to leave the node
    #[argh(option, default = "DEFAULT_DRAIN_TIMEOUT_SECONDS")]
    timeout_seconds: u64,
}

#[derive(FromArgs, Debug)]
/// Cordon a node, drain cluster DNS and then workloads from it, and delete it.
#[argh(subcommand, name = "retire")]
struct RetireArgs {
    /// name of the node
    #[argh(option)]
    node: String,

    /// seconds to wait for each drain
    #[argh(option, default = "DEFAULT_DRAIN_TIMEOUT_SECONDS")]
    timeout_seconds: u64,

    /// how pods with several owners are matched against DaemonSet ownership
    #[argh(option, default = "OwnerFilterPolicy::default()")]
    owner_filter: OwnerFilterPolicy,
}

#[derive(FromArgs, Debug)]
/// Print the cloud project and zone backing a node.
#[argh(subcommand, name = "identity")]
struct IdentityArgs {
    /// name of the node
    #[argh(option)]
    node: String,
}

#[derive(FromArgs, Debug)]
/// List preemptible nodes.
#[argh(subcommand, name = "list")]
struct ListArgs {
    /// additional label filter as key=value, may be repeated
    #[argh(option)]
    filter: Vec<String>,
}

#[derive(FromArgs, Debug)]
/// Set an annotation on a node.
#[argh(subcommand, name = "annotate")]
struct AnnotateArgs {
    /// name of the node
    #[argh(option)]
    node: String,

    /// annotation key
    #[argh(option)]
    key: String,

    /// annotation value
    #[argh(option)]
    value: String,
}

#[derive(FromArgs, Debug)]
/// Mark a node unschedulable.
#[argh(subcommand, name = "cordon")]
struct CordonArgs {
    /// name of the node
    #[argh(option)]
    node: String,
}

#[derive(FromArgs, Debug)]
/// Mark a node schedulable again.
#[argh(subcommand, name = "uncordon")]
struct UncordonArgs {
    /// name of the node
    #[argh(option)]
    node: String,
}

#[derive(FromArgs, Debug)]
/// Delete a node object from the cluster.
#[argh(subcommand, name = "delete")]
struct DeleteArgs {
    /// name of the node
    #[argh(option)]
    node: String,
}

fn parse_filter(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, label_value)) if !key.is_empty() => {
            Ok((key.to_string(), label_value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", value)),
    }
}

fn parse_filters(filters: &[String]) -> Result<BTreeMap<String, String>> {
    filters
        .iter()
        .map(|filter| parse_filter(filter))
        .collect::<std::result::Result<_, _>>()
        .map_err(|message| drainctl_error::Error::InvalidFilter { message })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Arguments = argh::from_env();

    telemetry::init_telemetry_from_env().context(drainctl_error::TelemetrySnafu)?;

    let config = match &args.kubeconfig {
        Some(path) => {
            let kubeconfig =
                Kubeconfig::read_from(path).context(drainctl_error::KubeconfigReadSnafu)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(drainctl_error::KubeconfigLoadSnafu)?
        }
        None => Config::infer()
            .await
            .context(drainctl_error::ConfigInferSnafu)?,
    };
    let k8s_client =
        kube::client::Client::try_from(config).context(drainctl_error::ClientCreateSnafu)?;

    // Ctrl-C stops any drain in progress; the drain reports itself as cancelled.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            event!(Level::WARN, "Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let node_client = |owner_filter: OwnerFilterPolicy| -> NodeClient {
        ClusterPreemptibleNodeClient::new(
            K8SClusterGateway::new(k8s_client.clone()),
            DrainConfig {
                owner_filter,
                ..DrainConfig::default()
            },
        )
    };

    match args.subcommand {
        SubCommand::Drain(drain_args) => {
            let outcome = node_client(drain_args.owner_filter)
                .drain_node(&drain_args.node, drain_args.timeout_seconds, cancel)
                .await
                .context(drainctl_error::NodeSnafu)?;
            ensure_complete(&drain_args.node, outcome)?;
        }
        SubCommand::DrainKubeDns(drain_args) => {
            let outcome = node_client(OwnerFilterPolicy::default())
                .drain_kube_dns_from_node(&drain_args.node, drain_args.timeout_seconds, cancel)
                .await
                .context(drainctl_error::NodeSnafu)?;
            ensure_complete(&drain_args.node, outcome)?;
        }
        SubCommand::Retire(retire_args) => {
            retire(
                &node_client(retire_args.owner_filter),
                &retire_args.node,
                retire_args.timeout_seconds,
                cancel,
            )
            .await?;
        }
        SubCommand::Identity(identity_args) => {
            let identity = node_client(OwnerFilterPolicy::default())
                .get_node_identity(&identity_args.node)
                .await
                .context(drainctl_error::NodeSnafu)?;
            println!("project={} zone={}", identity.project_id, identity.zone);
        }
        SubCommand::List(list_args) => {
            let filters = parse_filters(&list_args.filter)?;
            let nodes = node_client(OwnerFilterPolicy::default())
                .get_preemptible_nodes(&filters)
                .await
                .context(drainctl_error::NodeSnafu)?;
            for node in nodes {
                println!("{}", node.name_any());
            }
        }
        SubCommand::Annotate(annotate_args) => {
            node_client(OwnerFilterPolicy::default())
                .set_node_annotation(
                    &annotate_args.node,
                    &annotate_args.key,
                    &annotate_args.value,
                )
                .await
                .context(drainctl_error::NodeSnafu)?;
        }
        SubCommand::Cordon(cordon_args) => {
            node_client(OwnerFilterPolicy::default())
                .set_unschedulable_state(&cordon_args.node, true)
                .await
                .context(drainctl_error::NodeSnafu)?;
        }
        SubCommand::Uncordon(uncordon_args) => {
            node_client(OwnerFilterPolicy::default())
                .set_unschedulable_state(&uncordon_args.node, false)
                .await
                .context(drainctl_error::NodeSnafu)?;
        }
        SubCommand::Delete(delete_args) => {
            node_client(OwnerFilterPolicy::default())
                .delete_node(&delete_args.node)
                .await
                .context(drainctl_error::NodeSnafu)?;
        }
    }
    Ok(())
}

/// Cordons the node, moves cluster DNS and then workloads off it, and deletes it. The node is only
/// deleted once both drains have completed.
async fn retire<T: PreemptibleNodeClient>(
    node_client: &T,
    node_name: &str,
    drain_timeout_seconds: u64,
    cancel: CancellationToken,
) -> Result<()> {
    node_client
        .set_unschedulable_state(node_name, true)
        .await
        .context(drainctl_error::NodeSnafu)?;

    let outcome = node_client
        .drain_kube_dns_from_node(node_name, drain_timeout_seconds, cancel.clone())
        .await
        .context(drainctl_error::NodeSnafu)?;
    ensure_complete(node_name, outcome)?;

    let outcome = node_client
        .drain_node(node_name, drain_timeout_seconds, cancel)
        .await
        .context(drainctl_error::NodeSnafu)?;
    ensure_complete(node_name, outcome)?;

    node_client
        .delete_node(node_name)
        .await
        .context(drainctl_error::NodeSnafu)?;
    event!(Level::INFO, node = %node_name, "Node retired");
    Ok(())
}

fn ensure_complete(node_name: &str, outcome: DrainOutcome) -> Result<()> {
    ensure!(
        outcome.is_complete(),
        drainctl_error::DrainIncompleteSnafu {
            node_name,
            outcome: format!("{:?}", outcome),
        }
    );
    Ok(())
}

pub mod drainctl_error {
    use drainer::node::NodeError;
    use drainer::telemetry;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Error configuring telemetry: '{}'", source))]
        Telemetry {
            source: telemetry::TelemetryConfigError,
        },

        #[snafu(display("Unable to read kubeconfig: '{}'", source))]
        KubeconfigRead {
            source: kube::config::KubeconfigError,
        },

        #[snafu(display("Unable to load kubeconfig: '{}'", source))]
        KubeconfigLoad {
            source: kube::config::KubeconfigError,
        },

        #[snafu(display("Unable to infer Kubernetes client config: '{}'", source))]
        ConfigInfer {
            source: kube::config::InferConfigError,
        },

        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("{}", source))]
        Node { source: NodeError },

        #[snafu(display("Invalid label filter: '{}'", message))]
        InvalidFilter { message: String },

        #[snafu(display("Drain of Node '{}' did not complete: {}", node_name, outcome))]
        DrainIncomplete { node_name: String, outcome: String },
    }
}
