use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a drain session ended when no fatal eviction error occurred.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrainOutcome {
    /// The poller observed zero pending target Pods.
    Drained,
    /// The session timeout elapsed while target Pods were still pending.
    TimedOut,
    /// The external cancellation token fired while target Pods were still pending.
    Cancelled,
}

impl DrainOutcome {
    /// Whether the node was observed to be free of target Pods.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Drained)
    }
}

/// State for a single drain invocation.
///
/// Both internal stop signals are raised together by [`DrainSession::stop`]. Raising them is
/// idempotent, so the timeout, cancellation, and failure paths can all route through it.
#[derive(Clone, Debug)]
pub struct DrainSession {
    node_name: String,
    timeout: Duration,
    cancel: CancellationToken,
    stop_evicting: CancellationToken,
    stop_polling: CancellationToken,
}

impl DrainSession {
    pub fn new<S: Into<String>>(node_name: S, timeout: Duration, cancel: CancellationToken) -> Self {
        DrainSession {
            node_name: node_name.into(),
            timeout,
            cancel,
            stop_evicting: CancellationToken::new(),
            stop_polling: CancellationToken::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The external cancellation input.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stop_evicting(&self) -> &CancellationToken {
        &self.stop_evicting
    }

    pub fn stop_polling(&self) -> &CancellationToken {
        &self.stop_polling
    }

    pub fn stop(&self) {
        self.stop_polling.cancel();
        self.stop_evicting.cancel();
    }
}
