//! Predicates over the parts of a Pod that matter to a drain.
use crate::constants::{
    DAEMONSET_KIND, DAEMONSET_POD_ANNOTATION, DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS,
    MIRROR_POD_ANNOTATION,
};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Mirror Pods are the API server's view of static Pods. They cannot be evicted, and disappear on their own once
/// the kubelet stops the static Pod backing them.
pub fn is_mirror_pod(pod: &Pod) -> bool {
    pod.annotations().contains_key(MIRROR_POD_ANNOTATION)
}

/// Returns true if the Pod is controlled by a DaemonSet, or has been explicitly annotated as a DaemonSet Pod.
pub fn is_daemon_set_pod(pod: &Pod) -> bool {
    let controlled_by_daemon_set = pod
        .owner_references()
        .iter()
        .any(|reference| reference.controller == Some(true) && reference.kind == DAEMONSET_KIND);

    controlled_by_daemon_set
        || pod
            .annotations()
            .get(DAEMONSET_POD_ANNOTATION)
            .map_or(false, |value| value == "true")
}

/// The name of the Node the Pod is bound to, if it has been scheduled.
pub fn bound_node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref())
}

/// The namespace used to address the Pod, falling back to "default" like the API server does.
pub fn namespace_of(pod: &Pod) -> String {
    pod.namespace().unwrap_or_else(|| "default".to_string())
}

/// The grace period to request when evicting the Pod.
///
/// This is the Pod's own `terminationGracePeriodSeconds` (or the Kubernetes default when unset), capped at the
/// configured maximum.
pub fn eviction_grace_period_seconds(pod: &Pod, max_graceful_termination_secs: u32) -> u32 {
    let requested = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.termination_grace_period_seconds)
        .unwrap_or(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS)
        .max(0);

    u32::try_from(requested)
        .unwrap_or(u32::MAX)
        .min(max_graceful_termination_secs)
}
