use tokio::time::Duration;

/// Returns a random delay in `[base, 2 * base)`.
///
/// Many drain sessions may poll the control plane at once, so each iteration waits a freshly
/// randomized interval rather than the fixed base.
pub fn apply(base: Duration) -> Duration {
    base + tokio_retry::strategy::jitter(base)
}
