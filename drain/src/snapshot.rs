use crate::error::{self, SnapshotError};

use k8s_openapi::api::core::v1::Pod;
use snafu::OptionExt;

use std::collections::BTreeMap;

/// A read-only view of which Pods run on which Nodes. This is provided as a trait so that drains can run against
/// whichever cluster state the caller has on hand.
pub trait PodSnapshot: Send + Sync {
    /// Lists the Pods bound to the given Node, failing if the Node itself is unknown.
    fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, SnapshotError>;
}

/// An in-memory cluster snapshot.
#[derive(Clone, Debug, Default)]
pub struct BasicClusterSnapshot {
    nodes: BTreeMap<String, Vec<Pod>>,
}

impl BasicClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a Node with no Pods. Adding a Node that is already present keeps its Pods.
    pub fn add_node(&mut self, node_name: &str) {
        self.nodes.entry(node_name.to_string()).or_default();
    }

    /// Adds a Pod to the given Node. Returns an error if that Node is not in the snapshot.
    pub fn add_pod(&mut self, node_name: &str, pod: Pod) -> Result<(), SnapshotError> {
        self.nodes
            .get_mut(node_name)
            .context(error::NodeNotFoundSnafu { node_name })?
            .push(pod);
        Ok(())
    }

    pub fn add_node_with_pods<I>(&mut self, node_name: &str, pods: I)
    where
        I: IntoIterator<Item = Pod>,
    {
        self.nodes
            .entry(node_name.to_string())
            .or_default()
            .extend(pods);
    }
}

impl PodSnapshot for BasicClusterSnapshot {
    fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, SnapshotError> {
        self.nodes
            .get(node_name)
            .cloned()
            .context(error::NodeNotFoundSnafu { node_name })
    }
}
