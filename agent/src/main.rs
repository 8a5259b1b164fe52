mod error;

use crate::error::Result;
use drain::telemetry::init_telemetry_from_env;
use drain::{pods_to_evict, DrainConfig, Evictor, K8SPodClient};
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use snafu::ResultExt;
use tokio::time::Instant;
use tracing::{event, Level};

use std::env;
use std::fs;
use std::process;

const TERMINATION_LOG: &str = "/dev/termination-log";
const NODE_NAME_ENV_VAR: &str = "MY_NODE_NAME";

#[tokio::main]
async fn main() {
    let termination_log =
        env::var("TERMINATION_LOG").unwrap_or_else(|_| TERMINATION_LOG.to_string());

    if let Err(error) = run_agent().await {
        event!(Level::ERROR, %error, "Drain agent failed.");
        if let Err(write_error) = fs::write(&termination_log, format!("{}", error)) {
            eprintln!("Could not write k8s termination log: {}", write_error);
        }
        process::exit(1);
    }
}

/// Cordons the Node this agent runs on, then evicts every Pod from it.
async fn run_agent() -> Result<()> {
    init_telemetry_from_env().context(error::TracingConfigurationSnafu)?;

    let config = DrainConfig::from_environment().context(error::DrainConfigurationSnafu)?;
    let node_name = env::var(NODE_NAME_ENV_VAR).context(error::GetNodeNameSnafu)?;

    let k8s_client = kube::client::Client::try_default()
        .await
        .context(error::ClientCreateSnafu)?;

    // Nothing new may be scheduled while the Node is drained.
    let nodes: Api<Node> = Api::all(k8s_client.clone());
    nodes
        .cordon(&node_name)
        .await
        .context(error::CordonSnafu {
            node_name: &node_name,
        })?;

    let pod_client = K8SPodClient::new(k8s_client);
    let snapshot = pod_client
        .snapshot_for_node(&node_name)
        .await
        .context(error::SnapshotSnafu)?;
    let evictor = Evictor::new(pod_client, config);

    // A Node which runs nothing but DaemonSet Pods follows the empty-Node DaemonSet policy.
    let (_, other_pods) =
        pods_to_evict(&snapshot, &node_name, false).context(error::ClassifyPodsSnafu {
            node_name: &node_name,
        })?;

    if other_pods.is_empty() {
        evictor
            .evict_daemon_set_pods(&snapshot, &node_name, Instant::now())
            .await
            .context(error::DrainSnafu {
                node_name: &node_name,
            })?;
        event!(Level::INFO, "Evicted DaemonSet Pods from empty Node '{}'", node_name);
        return Ok(());
    }

    let results = evictor
        .drain_node(&snapshot, &node_name)
        .await
        .context(error::DrainSnafu {
            node_name: &node_name,
        })?;
    for (pod_name, result) in &results {
        event!(Level::DEBUG, pod = %pod_name, drained = result.is_drained(), "Drain result");
    }
    event!(Level::INFO, "Node '{}' drained", node_name);

    Ok(())
}
