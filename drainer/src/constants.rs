use tokio::time::Duration;

// Node labels
pub const PREEMPTIBLE_LABEL_KEY: &str = "cloud.google.com/gke-preemptible";
pub const PREEMPTIBLE_LABEL_VALUE: &str = "true";

// Namespace holding cluster system services. General workload drains leave it alone.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

// Pods owned by this kind are never evicted by a workload drain; the DaemonSet controller ignores cordons.
pub const DAEMONSET_KIND: &str = "DaemonSet";

// Cluster DNS pods, drained separately from general workloads.
pub const KUBE_DNS_NAME: &str = "kube-dns";
pub const KUBE_DNS_LABEL_KEY: &str = "k8s-app";
pub const KUBE_DNS_LABEL_VALUE: &str = "kube-dns";

// Used for pods that come back from the API without a namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

// Drain defaults.
pub const PODS_PER_BATCH: usize = 10;
// `kubectl drain` similarly waits 5 seconds between eviction attempts.
pub const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const POLL_BASE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: u64 = 300;
