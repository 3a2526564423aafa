use kube::error::ErrorResponse;
use snafu::Snafu;

/// The gateway result type.
pub type Result<T> = std::result::Result<T, Error>;

const STATUS_CODE_403_FORBIDDEN: u16 = 403;
const STATUS_CODE_404_NOT_FOUND: u16 = 404;
const STATUS_CODE_409_CONFLICT: u16 = 409;
const STATUS_CODE_429_TOO_MANY_REQUESTS: u16 = 429;

// kube-rs does not surface `status.details.causes`, so a forbidden eviction in a deleting namespace
// is recognized from the message the API server attaches to it.
const NAMESPACE_TERMINATING_MESSAGE: &str = "because it is being terminated";

/// Error type representing failed calls to the Kubernetes control plane.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to get Node '{}': '{}'", node_name, source))]
    GetNode {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to list Nodes matching '{}': '{}'", label_selector, source))]
    ListNodes {
        source: kube::Error,
        label_selector: String,
    },

    #[snafu(display("Unable to delete Node '{}': '{}'", node_name, source))]
    DeleteNode {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to update Node '{}': '{}'", node_name, source))]
    UpdateNode {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to list Pods matching '{}': '{}'", selector, source))]
    ListPods {
        source: kube::Error,
        selector: String,
    },

    #[snafu(display(
        "Unable to create eviction for Pod '{}/{}': '{}'",
        namespace,
        pod_name,
        source
    ))]
    EvictPod {
        source: kube::Error,
        pod_name: String,
        namespace: String,
    },
}

/// Coarse classification of a control-plane failure, independent of which call produced it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ApiErrorKind {
    NotFound,
    Conflict,
    /// Eviction admission refused the request, typically to honor a PodDisruptionBudget.
    TooManyRequests,
    /// The object lives in a namespace that is being deleted; its finalizers will remove it.
    NamespaceTerminating,
    Other,
}

impl ApiErrorKind {
    pub fn of(err: &kube::Error) -> Self {
        match err {
            kube::Error::Api(ErrorResponse {
                code: STATUS_CODE_404_NOT_FOUND,
                ..
            }) => Self::NotFound,
            kube::Error::Api(ErrorResponse {
                code: STATUS_CODE_409_CONFLICT,
                ..
            }) => Self::Conflict,
            kube::Error::Api(ErrorResponse {
                code: STATUS_CODE_429_TOO_MANY_REQUESTS,
                ..
            }) => Self::TooManyRequests,
            kube::Error::Api(ErrorResponse {
                code: STATUS_CODE_403_FORBIDDEN,
                message,
                ..
            }) if message.contains(NAMESPACE_TERMINATING_MESSAGE) => Self::NamespaceTerminating,
            _ => Self::Other,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ApiErrorKind {
        ApiErrorKind::of(self.kube_error())
    }

    fn kube_error(&self) -> &kube::Error {
        match self {
            Self::GetNode { source, .. }
            | Self::ListNodes { source, .. }
            | Self::DeleteNode { source, .. }
            | Self::UpdateNode { source, .. }
            | Self::ListPods { source, .. }
            | Self::EvictPod { source, .. } => source,
        }
    }
}
