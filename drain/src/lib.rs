//! Drains a Kubernetes Node which has been selected for removal.
//!
//! Every Pod running on the Node is evicted through the Eviction API, which respects PodDisruptionBudgets.
//! DaemonSet Pods are evicted first, in a short and strictly bounded stage. All remaining Pods are then evicted
//! concurrently, each with its own retry loop and a confirmation that the Pod actually left the Node. The caller
//! receives one [`EvictionResult`] per Pod and decides whether the Node can be removed.
pub mod classify;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod evict;
pub mod evictor;
pub mod pod;
pub mod register;
pub mod result;
pub mod snapshot;
pub mod telemetry;

pub use crate::classify::{effective_daemon_set_eviction, pods_to_evict};
pub use crate::client::{K8SPodClient, PodClient};
pub use crate::config::DrainConfig;
pub use crate::error::DrainError;
pub use crate::evictor::Evictor;
pub use crate::register::EvictionRegister;
pub use crate::result::{EvictionResult, EvictionResults};
pub use crate::snapshot::{BasicClusterSnapshot, PodSnapshot};

#[cfg(any(feature = "mockall", test))]
pub use crate::client::mock::MockPodClient;
