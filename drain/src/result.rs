use crate::error::{GetPodError, PodEvictionError};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use std::collections::btree_map::{self, BTreeMap};

/// The outcome of evicting a single Pod.
///
/// `err` is set when the Eviction could not be created at all. `timed_out` is set when the Eviction was created
/// but the Pod could not be confirmed gone before its deadline. Both are unset when the Pod was evicted and left
/// the Node.
#[derive(Debug)]
pub struct EvictionResult {
    pub pod: Pod,
    pub err: Option<PodEvictionError>,
    pub timed_out: bool,
    /// The last error seen while confirming the Pod's removal. Only informative: the eviction itself succeeded.
    pub last_confirmation_error: Option<GetPodError>,
}

impl EvictionResult {
    /// The placeholder held for a Pod whose eviction has not resolved yet.
    pub(crate) fn pending(pod: Pod) -> Self {
        EvictionResult {
            pod,
            err: None,
            timed_out: true,
            last_confirmation_error: None,
        }
    }

    pub(crate) fn evicted(pod: Pod) -> Self {
        EvictionResult {
            pod,
            err: None,
            timed_out: false,
            last_confirmation_error: None,
        }
    }

    pub(crate) fn failed(pod: Pod, err: PodEvictionError) -> Self {
        EvictionResult {
            pod,
            err: Some(err),
            timed_out: false,
            last_confirmation_error: None,
        }
    }

    pub(crate) fn confirmation_timed_out(pod: Pod, last_error: Option<GetPodError>) -> Self {
        EvictionResult {
            pod,
            err: None,
            timed_out: true,
            last_confirmation_error: last_error,
        }
    }

    /// Returns true if the Eviction was created, regardless of whether the Pod was seen leaving.
    pub fn was_eviction_successful(&self) -> bool {
        self.err.is_none()
    }

    /// Returns true if the Pod was evicted and is confirmed to no longer occupy the Node.
    pub fn is_drained(&self) -> bool {
        self.err.is_none() && !self.timed_out
    }
}

/// Per-Pod eviction outcomes for a single drain call, keyed by Pod name.
#[derive(Debug, Default)]
pub struct EvictionResults {
    results: BTreeMap<String, EvictionResult>,
}

impl EvictionResults {
    pub(crate) fn insert(&mut self, result: EvictionResult) {
        self.results.insert(result.pod.name_any(), result);
    }

    pub fn get(&self, pod_name: &str) -> Option<&EvictionResult> {
        self.results.get(pod_name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, EvictionResult> {
        self.results.iter()
    }

    /// Returns true if every Pod was evicted and confirmed gone.
    pub fn all_drained(&self) -> bool {
        self.results.values().all(EvictionResult::is_drained)
    }

    /// Names of the Pods that failed to evict or timed out.
    pub fn undrained_pod_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| !result.is_drained())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl IntoIterator for EvictionResults {
    type Item = (String, EvictionResult);
    type IntoIter = btree_map::IntoIter<String, EvictionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a EvictionResults {
    type Item = (&'a String, &'a EvictionResult);
    type IntoIter = btree_map::Iter<'a, String, EvictionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{EvictError, PodEvictionError};
    use crate::pod::test::regular_pod;

    #[test]
    fn test_result_predicates() {
        let evicted = EvictionResult::evicted(regular_pod("p1"));
        assert!(evicted.was_eviction_successful());
        assert!(evicted.is_drained());

        // The eviction call succeeded, only the confirmation ran out of time.
        let unconfirmed = EvictionResult::confirmation_timed_out(regular_pod("p2"), None);
        assert!(unconfirmed.was_eviction_successful());
        assert!(!unconfirmed.is_drained());

        let failed = EvictionResult::failed(
            regular_pod("p3"),
            PodEvictionError::EvictionFailed {
                source: EvictError::NonRetriableEviction {
                    source: "forbidden".into(),
                    pod_name: "p3".to_string(),
                },
                pod_name: "p3".to_string(),
            },
        );
        assert!(!failed.was_eviction_successful());
        assert!(!failed.is_drained());
        assert!(!failed.timed_out);

        assert!(!EvictionResult::pending(regular_pod("p4")).is_drained());
    }

    #[test]
    fn test_results_keyed_by_pod_name() {
        let mut results = EvictionResults::default();
        results.insert(EvictionResult::pending(regular_pod("p1")));
        results.insert(EvictionResult::evicted(regular_pod("p2")));
        assert_eq!(results.len(), 2);
        assert_eq!(results.undrained_pod_names(), vec!["p1"]);
        assert!(!results.all_drained());

        // Resolving a Pod replaces its placeholder.
        results.insert(EvictionResult::evicted(regular_pod("p1")));
        assert_eq!(results.len(), 2);
        assert!(results.all_drained());
        assert!(results.get("p1").map_or(false, EvictionResult::is_drained));
    }
}
