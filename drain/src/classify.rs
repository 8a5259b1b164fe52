//! Decides which Pods on a Node are evicted during a drain.
use crate::constants::ENABLE_DAEMONSET_EVICTION_ANNOTATION;
use crate::error::SnapshotError;
use crate::pod::{is_daemon_set_pod, is_mirror_pod};
use crate::snapshot::PodSnapshot;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{event, instrument, Level};

/// Resolves whether a DaemonSet Pod should be evicted.
///
/// A Pod's own `enable-ds-eviction` annotation always wins over the cluster-wide setting. Any annotation value
/// other than "true" disables eviction for that Pod.
pub fn effective_daemon_set_eviction(evict_by_default: bool, annotation: Option<&str>) -> bool {
    match annotation {
        Some(value) => value == "true",
        None => evict_by_default,
    }
}

/// Filters DaemonSet Pods down to the ones that should be evicted.
pub fn daemon_set_pods_to_evict<I>(pods: I, evict_by_default: bool) -> Vec<Pod>
where
    I: IntoIterator<Item = Pod>,
{
    pods.into_iter()
        .filter(|pod| {
            let annotation = pod
                .annotations()
                .get(ENABLE_DAEMONSET_EVICTION_ANNOTATION)
                .map(String::as_str);
            effective_daemon_set_eviction(evict_by_default, annotation)
        })
        .collect()
}

/// Splits the Pods running on a Node into the DaemonSet Pods to evict and all other Pods.
///
/// Mirror Pods are never returned: they are static and cannot be controlled through the API. DaemonSet Pods are
/// only returned if eviction is enabled for them, either by `evict_daemon_sets_by_default` or by their own
/// annotation. Every other Pod is returned in the second list.
#[instrument(skip(snapshot), err)]
pub fn pods_to_evict<S: PodSnapshot>(
    snapshot: &S,
    node_name: &str,
    evict_daemon_sets_by_default: bool,
) -> Result<(Vec<Pod>, Vec<Pod>), SnapshotError> {
    let mut daemon_set_pods = Vec::new();
    let mut other_pods = Vec::new();

    for pod in snapshot.pods_on_node(node_name)? {
        if is_mirror_pod(&pod) {
            event!(
                Level::DEBUG,
                pod = %pod.name_any(),
                "Not draining Pod: Pod is a static Mirror Pod"
            );
        } else if is_daemon_set_pod(&pod) {
            daemon_set_pods.push(pod);
        } else {
            other_pods.push(pod);
        }
    }

    let daemon_set_pods = daemon_set_pods_to_evict(daemon_set_pods, evict_daemon_sets_by_default);
    Ok((daemon_set_pods, other_pods))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pod::test::{ds_pod, mirror_pod, regular_pod};
    use crate::snapshot::BasicClusterSnapshot;

    use std::collections::BTreeSet;

    fn names(pods: &[Pod]) -> BTreeSet<String> {
        pods.iter().map(ResourceExt::name_any).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_effective_daemon_set_eviction() {
        let test_cases = vec![
            (true, None, true),
            (false, None, false),
            (true, Some("true"), true),
            (false, Some("true"), true),
            (true, Some("false"), false),
            (false, Some("false"), false),
            (true, Some("yes"), false),
        ];

        for (evict_by_default, annotation, expected) in test_cases {
            assert_eq!(
                effective_daemon_set_eviction(evict_by_default, annotation),
                expected,
                "default: {}, annotation: {:?}",
                evict_by_default,
                annotation
            );
        }
    }

    #[test]
    fn test_pods_to_evict() {
        // (description, pods, DaemonSet eviction enabled, expected DaemonSet pods, expected other pods)
        let test_cases = vec![
            ("no pods", vec![], true, vec![], vec![]),
            (
                "mirror pods are never returned",
                vec![mirror_pod("pod-1"), mirror_pod("pod-2")],
                true,
                vec![],
                vec![],
            ),
            (
                "non-DS pods are correctly returned",
                vec![regular_pod("pod-1"), regular_pod("pod-2")],
                true,
                vec![],
                vec!["pod-1", "pod-2"],
            ),
            (
                "DS pods are returned when DS eviction is enabled",
                vec![ds_pod("pod-1", None), ds_pod("pod-2", None)],
                true,
                vec!["pod-1", "pod-2"],
                vec![],
            ),
            (
                "DS pods are not returned when DS eviction is disabled and not marked evictable",
                vec![ds_pod("pod-1", None), ds_pod("pod-2", None)],
                false,
                vec![],
                vec![],
            ),
            (
                "DS pods marked evictable are returned when DS eviction is disabled",
                vec![
                    ds_pod("pod-1", Some(true)),
                    ds_pod("pod-2", None),
                    ds_pod("pod-3", Some(true)),
                ],
                false,
                vec!["pod-1", "pod-3"],
                vec![],
            ),
            (
                "DS pods marked not evictable are skipped when DS eviction is enabled",
                vec![ds_pod("pod-1", Some(false)), ds_pod("pod-2", None)],
                true,
                vec!["pod-2"],
                vec![],
            ),
            (
                "all pod kinds are correctly handled together",
                vec![
                    ds_pod("ds-pod-1", None),
                    ds_pod("ds-pod-2", None),
                    regular_pod("regular-pod-1"),
                    regular_pod("regular-pod-2"),
                    mirror_pod("mirror-pod-1"),
                    mirror_pod("mirror-pod-2"),
                ],
                true,
                vec!["ds-pod-1", "ds-pod-2"],
                vec!["regular-pod-1", "regular-pod-2"],
            ),
        ];

        for (description, pods, ds_eviction_enabled, want_ds_pods, want_other_pods) in test_cases {
            let mut snapshot = BasicClusterSnapshot::new();
            snapshot.add_node_with_pods("test-node", pods);

            let (ds_pods, other_pods) =
                pods_to_evict(&snapshot, "test-node", ds_eviction_enabled).unwrap();
            assert_eq!(names(&ds_pods), set(&want_ds_pods), "{}", description);
            assert_eq!(names(&other_pods), set(&want_other_pods), "{}", description);
        }
    }

    #[test]
    fn test_pods_to_evict_unknown_node() {
        let mut snapshot = BasicClusterSnapshot::new();
        snapshot.add_node_with_pods("test-node", vec![regular_pod("pod-1"), regular_pod("pod-2")]);

        let result = pods_to_evict(&snapshot, "unknown-node", true);
        assert!(matches!(result, Err(SnapshotError::NodeNotFound { .. })));
    }
}
