/// Marks a Pod as the API server's mirror of a static Pod managed directly by the kubelet.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Marks a Pod as belonging to a DaemonSet even when it has no DaemonSet controller reference.
pub const DAEMONSET_POD_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/daemonset-pod";

/// Overrides, per Pod, whether a DaemonSet Pod is evicted during a drain. Recognized values are "true" and "false".
pub const ENABLE_DAEMONSET_EVICTION_ANNOTATION: &str =
    "cluster-autoscaler.kubernetes.io/enable-ds-eviction";

pub const DAEMONSET_KIND: &str = "DaemonSet";

/// The grace period Kubernetes applies to a Pod which does not specify `terminationGracePeriodSeconds`.
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
