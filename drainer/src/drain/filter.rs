//! Pure selection rules narrowing a Pod listing down to the Pods a drain should act on.
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;

/// How [`exclude_by_owner_kind`] treats Pods with several owner references.
///
/// Under both policies a Pod without any owner reference is never selected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerFilterPolicy {
    /// Emit the Pod once for every owner reference whose kind differs from the excluded kind.
    /// A Pod with mixed ownership is selected, possibly more than once.
    #[default]
    PerOwnerReference,
    /// Select the Pod once, and only if none of its owner references has the excluded kind.
    AnyOwnerReference,
}

impl FromStr for OwnerFilterPolicy {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_plain::from_str(s)
    }
}

/// Drops Pods owned by `kind`, according to `policy`.
pub fn exclude_by_owner_kind(pods: &[Pod], kind: &str, policy: OwnerFilterPolicy) -> Vec<Pod> {
    let owner_kinds = |pod: &Pod| -> Vec<String> {
        pod.owner_references()
            .iter()
            .map(|reference| reference.kind.clone())
            .collect()
    };

    match policy {
        OwnerFilterPolicy::PerOwnerReference => pods
            .iter()
            .flat_map(|pod| {
                owner_kinds(pod)
                    .into_iter()
                    .filter(|owner_kind| owner_kind != kind)
                    .map(move |_| pod.clone())
            })
            .collect(),
        OwnerFilterPolicy::AnyOwnerReference => pods
            .iter()
            .filter(|pod| {
                let kinds = owner_kinds(pod);
                !kinds.is_empty() && kinds.iter().all(|owner_kind| owner_kind != kind)
            })
            .cloned()
            .collect(),
    }
}

/// Keeps the Pods assigned to `node_name`.
pub fn select_by_node(pods: &[Pod], node_name: &str) -> Vec<Pod> {
    pods.iter()
        .filter(|pod| {
            pod.spec
                .as_ref()
                .and_then(|spec| spec.node_name.as_deref())
                .map_or(false, |assigned| assigned == node_name)
        })
        .cloned()
        .collect()
}

/// Removes repeated Pods, keeping the first occurrence of each namespace/name pair.
pub fn dedup_pods(pods: Vec<Pod>) -> Vec<Pod> {
    let mut seen = HashSet::new();
    pods.into_iter()
        .filter(|pod| seen.insert((pod.namespace(), pod.name_any())))
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    pub(crate) fn fake_pod(name: &str, node_name: &str, owner_kinds: &[&str]) -> Pod {
        let owner_references = owner_kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: format!("{}-owner-{}", name, i),
                uid: format!("{}-uid-{}", name, i),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("shop".to_string()),
                owner_references: if owner_references.is_empty() {
                    None
                } else {
                    Some(owner_references)
                },
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node_name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn names(pods: &[Pod]) -> Vec<String> {
        pods.iter().map(|pod| pod.name_any()).collect()
    }

    #[test]
    fn test_exclude_by_owner_kind_per_owner_reference() {
        let pods = vec![
            fake_pod("web-0", "node-a", &["ReplicaSet"]),
            fake_pod("fluentd-x", "node-a", &["DaemonSet"]),
            fake_pod("bare", "node-a", &[]),
            fake_pod("mixed", "node-a", &["DaemonSet", "ReplicaSet"]),
            fake_pod("twice", "node-a", &["ReplicaSet", "StatefulSet"]),
        ];

        let selected =
            exclude_by_owner_kind(&pods, "DaemonSet", OwnerFilterPolicy::PerOwnerReference);
        assert_eq!(names(&selected), vec!["web-0", "mixed", "twice", "twice"]);
    }

    #[test]
    fn test_exclude_by_owner_kind_any_owner_reference() {
        let pods = vec![
            fake_pod("web-0", "node-a", &["ReplicaSet"]),
            fake_pod("fluentd-x", "node-a", &["DaemonSet"]),
            fake_pod("bare", "node-a", &[]),
            fake_pod("mixed", "node-a", &["DaemonSet", "ReplicaSet"]),
            fake_pod("twice", "node-a", &["ReplicaSet", "StatefulSet"]),
        ];

        let selected =
            exclude_by_owner_kind(&pods, "DaemonSet", OwnerFilterPolicy::AnyOwnerReference);
        assert_eq!(names(&selected), vec!["web-0", "twice"]);
    }

    #[test]
    fn test_single_matching_owner_and_bare_pods_never_selected() {
        let pods = vec![
            fake_pod("fluentd-x", "node-a", &["DaemonSet"]),
            fake_pod("bare", "node-a", &[]),
        ];
        for policy in [
            OwnerFilterPolicy::PerOwnerReference,
            OwnerFilterPolicy::AnyOwnerReference,
        ] {
            assert!(exclude_by_owner_kind(&pods, "DaemonSet", policy).is_empty());
        }
    }

    #[test]
    fn test_select_by_node() {
        let mut unscheduled = fake_pod("pending", "node-a", &["ReplicaSet"]);
        unscheduled.spec = None;
        let pods = vec![
            fake_pod("dns-1", "node-a", &["ReplicaSet"]),
            fake_pod("dns-2", "node-b", &["ReplicaSet"]),
            unscheduled,
            fake_pod("dns-3", "node-a", &["ReplicaSet"]),
        ];

        assert_eq!(names(&select_by_node(&pods, "node-a")), vec!["dns-1", "dns-3"]);
        assert!(select_by_node(&pods, "node-c").is_empty());
    }

    #[test]
    fn test_dedup_pods() {
        let mut other_namespace = fake_pod("web-0", "node-a", &["ReplicaSet"]);
        other_namespace.metadata.namespace = Some("blog".to_string());
        let pods = vec![
            fake_pod("web-0", "node-a", &["ReplicaSet"]),
            fake_pod("web-0", "node-a", &["ReplicaSet"]),
            other_namespace,
            fake_pod("web-1", "node-a", &["ReplicaSet"]),
        ];

        let deduped = dedup_pods(pods);
        assert_eq!(names(&deduped), vec!["web-0", "web-0", "web-1"]);
        assert_eq!(deduped[1].namespace().as_deref(), Some("blog"));
    }

    #[test]
    fn test_owner_filter_policy_parsing() {
        assert_eq!(
            "per-owner-reference".parse::<OwnerFilterPolicy>().unwrap(),
            OwnerFilterPolicy::PerOwnerReference
        );
        assert_eq!(
            "any-owner-reference".parse::<OwnerFilterPolicy>().unwrap(),
            OwnerFilterPolicy::AnyOwnerReference
        );
        assert_eq!(OwnerFilterPolicy::default(), OwnerFilterPolicy::PerOwnerReference);
        assert!("first".parse::<OwnerFilterPolicy>().is_err());
    }
}
