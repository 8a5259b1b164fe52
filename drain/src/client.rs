use crate::error::{self, EvictError, GetPodError};
use crate::pod::namespace_of;
use crate::snapshot::BasicClusterSnapshot;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, DeleteParams, EvictParams, ListParams},
    ResourceExt,
};
use snafu::ResultExt;
use tracing::{event, instrument, Level};

// When evicting a Pod, a 429 (TOO_MANY_REQUESTS) response code is used to indicate that we must wait to allow a
// PodDisruptionBudget (PDB) to be satisfied. If there is some kind of misconfiguration (e.g. multiple PDBs that refer
// to the same Pod), you get a 500.
const STATUS_NOT_FOUND: u16 = 404;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

#[async_trait]
/// A trait providing an interface to evict and look up Pods. This is provided as a trait in order to allow mocks to
/// be used for testing purposes.
pub trait PodClient: Send + Sync {
    /// Creates an Eviction for the Pod, asking for it to be given `grace_period_seconds` to shut down.
    async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), EvictError>;
    /// Fetches the current state of a Pod. `Ok(None)` means the Pod no longer exists.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GetPodError>;
}

#[cfg(any(feature = "mockall", test))]
pub mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        /// A Mock PodClient for use in tests.
        pub PodClient {}
        #[async_trait]
        impl PodClient for PodClient {
            async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), EvictError>;
            async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GetPodError>;
        }
    }
}

#[derive(Clone)]
/// Concrete implementation of the `PodClient` trait, backed by the Kubernetes API.
pub struct K8SPodClient {
    k8s_client: kube::Client,
}

impl K8SPodClient {
    pub fn new(k8s_client: kube::Client) -> Self {
        K8SPodClient { k8s_client }
    }

    /// Builds a snapshot holding the given Node and the Pods currently bound to it.
    #[instrument(skip(self), err)]
    pub async fn snapshot_for_node(
        &self,
        node_name: &str,
    ) -> Result<BasicClusterSnapshot, SnapshotClientError> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        let node = nodes
            .get_opt(node_name)
            .await
            .context(snapshot_client_error::GetNodeSnafu { node_name })?;

        let mut snapshot = BasicClusterSnapshot::new();
        if node.is_none() {
            // An empty snapshot reports the Node as unknown to the drain.
            return Ok(snapshot);
        }

        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let node_pods = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node_name)))
            .await
            .context(snapshot_client_error::ListPodsSnafu { node_name })?;

        snapshot.add_node_with_pods(node_name, node_pods);
        Ok(snapshot)
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for K8SPodClient {
    #[instrument(skip(self, pod), fields(pod = %pod.name_any()), err)]
    async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), EvictError> {
        let pod_name = pod.name_any();
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(grace_period_seconds),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.pod_api(&namespace_of(pod)).evict(&pod_name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) => match e.code {
                STATUS_NOT_FOUND => error::PodNotFoundSnafu { pod_name }.fail(),
                STATUS_TOO_MANY_REQUESTS | STATUS_INTERNAL_SERVER_ERROR => {
                    Err(EvictError::RetriableEviction {
                        source: Box::new(kube::Error::Api(e)),
                        pod_name,
                    })
                }
                // An eviction request in a deleting namespace will throw a forbidden error. Like any other
                // rejection, it will not be resolved by retrying.
                _ => Err(EvictError::NonRetriableEviction {
                    source: Box::new(kube::Error::Api(e)),
                    pod_name,
                }),
            },
            Err(e) => {
                event!(Level::WARN, pod = %pod_name, error = %e, "Eviction request failed.");
                Err(EvictError::RetriableEviction {
                    source: Box::new(e),
                    pod_name,
                })
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GetPodError> {
        self.pod_api(namespace)
            .get_opt(name)
            .await
            .map_err(|err| Box::new(err) as error::ClientError)
            .context(error::GetPodSnafu {
                namespace,
                pod_name: name,
            })
    }
}

pub use snapshot_client_error::Error as SnapshotClientError;

pub mod snapshot_client_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to get Node '{}': '{}'", node_name, source))]
        GetNode {
            source: kube::Error,
            node_name: String,
        },

        #[snafu(display("Unable to list Pods on Node '{}': '{}'", node_name, source))]
        ListPods {
            source: kube::Error,
            node_name: String,
        },
    }
}
