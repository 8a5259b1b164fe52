use crate::result::EvictionResults;

use snafu::Snafu;
use tokio::time::Duration;

/// The result type for a drain call.
pub type Result<T> = std::result::Result<T, DrainError>;

/// The source error type returned by the API behind a [`PodClient`](crate::client::PodClient).
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort a drain call as a whole.
///
/// Failures of individual Pods outside of the DaemonSet stage never surface here directly; they are recorded in
/// the [`EvictionResults`] carried by [`DrainError::PodsNotDrained`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Unable to find Pods to evict on Node '{}': '{}'", node_name, source))]
    ClassifyPods {
        source: SnapshotError,
        node_name: String,
    },

    #[snafu(display(
        "Failed to drain: following DaemonSet pod failed to evict on the Node '{}': '{}'",
        node_name,
        source
    ))]
    DaemonSetEviction {
        source: PodEvictionError,
        node_name: String,
    },

    #[snafu(display(
        "Failed to drain: failed to create DaemonSet eviction for {:.2}s on the Node '{}'. Pods still pending: {:?}",
        timeout.as_secs_f64(),
        node_name,
        pending_pods
    ))]
    DaemonSetEvictionTimeout {
        node_name: String,
        timeout: Duration,
        pending_pods: Vec<String>,
    },

    #[snafu(display(
        "Failed to drain Node '{}': {} of {} Pods were not removed: {:?}",
        node_name,
        results.undrained_pod_names().len(),
        results.len(),
        results.undrained_pod_names()
    ))]
    PodsNotDrained {
        node_name: String,
        results: EvictionResults,
    },
}

impl DrainError {
    /// The per-Pod results, if the drain got as far as evicting non-DaemonSet Pods.
    pub fn eviction_results(&self) -> Option<&EvictionResults> {
        match self {
            Self::PodsNotDrained { results, .. } => Some(results),
            _ => None,
        }
    }
}

/// Errors returned by a [`PodSnapshot`](crate::snapshot::PodSnapshot).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SnapshotError {
    #[snafu(display("Node '{}' is not present in the cluster snapshot", node_name))]
    NodeNotFound { node_name: String },
}

/// Errors returned when creating an Eviction for a Pod.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EvictError {
    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod_name, source))]
    /// The eviction was refused but may succeed later, typically to respect a PodDisruptionBudget.
    RetriableEviction { source: ClientError, pod_name: String },

    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod_name, source))]
    /// The eviction was refused and retrying will not help.
    NonRetriableEviction { source: ClientError, pod_name: String },

    #[snafu(display("Pod '{}' no longer exists", pod_name))]
    /// There is nothing left to evict.
    PodNotFound { pod_name: String },
}

impl EvictError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::RetriableEviction { .. } => true,
            Self::NonRetriableEviction { .. } | Self::PodNotFound { .. } => false,
        }
    }
}

/// Errors returned when looking up a Pod.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GetPodError {
    #[snafu(display("Unable to get Pod '{}/{}': '{}'", namespace, pod_name, source))]
    GetPod {
        source: ClientError,
        namespace: String,
        pod_name: String,
    },
}

/// The reason an individual Pod could not be evicted.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PodEvictionError {
    #[snafu(display("Failed to evict Pod '{}': '{}'", pod_name, source))]
    EvictionFailed { source: EvictError, pod_name: String },

    #[snafu(display(
        "Failed to evict Pod '{}' within allowed timeout after {} attempts (last error: '{}')",
        pod_name,
        attempts,
        source
    ))]
    EvictionRetriesExhausted {
        source: EvictError,
        pod_name: String,
        attempts: usize,
    },
}

impl PodEvictionError {
    pub fn pod_name(&self) -> &str {
        match self {
            Self::EvictionFailed { pod_name, .. } | Self::EvictionRetriesExhausted { pod_name, .. } => {
                pod_name
            }
        }
    }
}
