//! Node-retirement operations for preemptible Nodes.
pub mod client;
pub mod error;

pub use self::client::{ClusterPreemptibleNodeClient, PreemptibleNodeClient};
#[cfg(any(feature = "mockall", test))]
pub use self::client::MockPreemptibleNodeClient;
pub use self::error::Error as NodeError;

use crate::constants::{PREEMPTIBLE_LABEL_KEY, PREEMPTIBLE_LABEL_VALUE};
use error::Result;

use snafu::OptionExt;
use std::collections::BTreeMap;

/// Where a Node's backing instance lives at the cloud provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeIdentity {
    pub project_id: String,
    pub zone: String,
}

/// Reads the project and zone out of a provider ID such as `gce://my-project/us-central1-b/instance-1`.
pub fn parse_provider_id(node_name: &str, provider_id: &str) -> Result<NodeIdentity> {
    let segments: Vec<&str> = provider_id.split('/').collect();
    let (project_id, zone) = segments
        .get(2)
        .zip(segments.get(3))
        .context(error::MalformedProviderIdSnafu {
            node_name,
            provider_id,
        })?;

    Ok(NodeIdentity {
        project_id: project_id.to_string(),
        zone: zone.to_string(),
    })
}

/// The label filter selecting preemptible Nodes, extended with `filters`. A filter on the
/// preemptible label itself replaces the default value.
pub fn preemptible_label_filters(filters: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    merged.insert(
        PREEMPTIBLE_LABEL_KEY.to_string(),
        PREEMPTIBLE_LABEL_VALUE.to_string(),
    );
    merged.extend(filters.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
