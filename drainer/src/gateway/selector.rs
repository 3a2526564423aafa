use kube::api::ListParams;
use std::collections::BTreeMap;
use std::fmt;

/// Renders a set of label requirements as a Kubernetes equality-based label selector.
///
/// Keys are emitted in sorted order so that the same filters always produce the same selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Describes which Pods a listing should return.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PodSelector {
    /// Every Pod scheduled onto `node_name`, across all namespaces except `excluded_namespace`.
    OnNode {
        node_name: String,
        excluded_namespace: String,
    },
    /// Pods in `namespace` carrying all of `labels`, on any node.
    Labelled {
        namespace: String,
        labels: BTreeMap<String, String>,
    },
}

impl PodSelector {
    /// The namespace to scope the listing to, or `None` for a cluster-wide listing.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::OnNode { .. } => None,
            Self::Labelled { namespace, .. } => Some(namespace),
        }
    }

    pub fn list_params(&self) -> ListParams {
        match self {
            Self::OnNode {
                node_name,
                excluded_namespace,
            } => ListParams::default().fields(&format!(
                "spec.nodeName={},metadata.namespace!={}",
                node_name, excluded_namespace
            )),
            Self::Labelled { labels, .. } => ListParams::default().labels(&label_selector(labels)),
        }
    }
}

impl fmt::Display for PodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnNode {
                node_name,
                excluded_namespace,
            } => write!(
                f,
                "spec.nodeName={},metadata.namespace!={}",
                node_name, excluded_namespace
            ),
            Self::Labelled { namespace, labels } => {
                write!(f, "{} in namespace {}", label_selector(labels), namespace)
            }
        }
    }
}
