use crate::classify::pods_to_evict;
use crate::client::PodClient;
use crate::config::DrainConfig;
use crate::error::{self, Result};
use crate::evict::{confirm_disappearance, evict_pod, Confirmation, EvictOutcome};
use crate::pod::eviction_grace_period_seconds;
use crate::register::EvictionRegister;
use crate::result::{EvictionResult, EvictionResults};
use crate::snapshot::PodSnapshot;

use futures::{future, stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use snafu::{ensure, ResultExt};
use tokio::time::{timeout_at, Instant};
use tracing::{event, instrument, Level};

use std::collections::BTreeSet;
use std::sync::Arc;

/// Drains Nodes by evicting the Pods running on them.
///
/// Every drain call shares the same client, configuration and (optional) eviction register. Calls are independent
/// of each other.
pub struct Evictor<C: PodClient> {
    client: C,
    config: DrainConfig,
    register: Option<Arc<dyn EvictionRegister>>,
}

impl<C: PodClient> Evictor<C> {
    pub fn new(client: C, config: DrainConfig) -> Self {
        Evictor {
            client,
            config,
            register: None,
        }
    }

    /// Notifies `register` of every Pod this Evictor successfully evicts.
    pub fn with_eviction_register(mut self, register: Arc<dyn EvictionRegister>) -> Self {
        self.register = Some(register);
        self
    }

    /// Evicts every Pod on the Node, DaemonSet Pods first.
    ///
    /// DaemonSet Pods are included according to `daemon_set_eviction_for_occupied_nodes` and their own annotation.
    #[instrument(skip(self, snapshot), err)]
    pub async fn drain_node<S: PodSnapshot>(
        &self,
        snapshot: &S,
        node_name: &str,
    ) -> Result<EvictionResults> {
        let (daemon_set_pods, pods) = pods_to_evict(
            snapshot,
            node_name,
            self.config.daemon_set_eviction_for_occupied_nodes,
        )
        .context(error::ClassifyPodsSnafu { node_name })?;

        self.drain_node_with_pods(node_name, pods, daemon_set_pods)
            .await
    }

    /// Evicts the DaemonSet Pods of a Node which runs nothing else, according to
    /// `daemon_set_eviction_for_empty_nodes` and the Pods' own annotation.
    ///
    /// `now` is the start of the stage's time budget.
    #[instrument(skip(self, snapshot), err)]
    pub async fn evict_daemon_set_pods<S: PodSnapshot>(
        &self,
        snapshot: &S,
        node_name: &str,
        now: Instant,
    ) -> Result<()> {
        let (daemon_set_pods, _) = pods_to_evict(
            snapshot,
            node_name,
            self.config.daemon_set_eviction_for_empty_nodes,
        )
        .context(error::ClassifyPodsSnafu { node_name })?;

        self.run_daemon_set_stage(node_name, daemon_set_pods, now)
            .await
            .map(|_| ())
    }

    /// Evicts the given Pods from the Node.
    ///
    /// `daemon_set_pods` are evicted first; if any of them cannot be evicted, the drain stops before any other Pod
    /// is touched. The remaining Pods are then evicted concurrently, and each one is followed until it has left the
    /// Node or ran out of time. An error carrying every result is returned if any Pod was not drained.
    #[instrument(
        skip(self, pods, daemon_set_pods),
        fields(pod_count = pods.len(), daemon_set_pod_count = daemon_set_pods.len()),
        err
    )]
    pub async fn drain_node_with_pods(
        &self,
        node_name: &str,
        pods: Vec<Pod>,
        daemon_set_pods: Vec<Pod>,
    ) -> Result<EvictionResults> {
        let daemon_set_results = self
            .run_daemon_set_stage(node_name, daemon_set_pods, Instant::now())
            .await?;

        let retry_until = Instant::now()
            + self.config.max_graceful_termination()
            + self.config.max_pod_eviction_time;

        let mut results = EvictionResults::default();
        for result in daemon_set_results {
            results.insert(result);
        }
        for pod in &pods {
            results.insert(EvictionResult::pending(pod.clone()));
        }

        let concurrency = pods.len().max(1);
        stream::iter(pods)
            .map(|pod| self.evict_and_confirm(pod, node_name, retry_until))
            .buffer_unordered(concurrency)
            .for_each(|result| {
                results.insert(result);
                future::ready(())
            })
            .await;

        for (pod_name, result) in &results {
            if let Some(err) = &result.err {
                event!(Level::ERROR, "Failed to evict Pod '{}': '{}'", pod_name, err);
            } else if result.timed_out {
                event!(
                    Level::ERROR,
                    last_error = ?result.last_confirmation_error.as_ref().map(ToString::to_string),
                    "Timed out waiting for Pod '{}' to leave Node '{}'",
                    pod_name,
                    node_name
                );
            }
        }

        ensure!(
            results.all_drained(),
            error::PodsNotDrainedSnafu { node_name, results }
        );

        event!(
            Level::INFO,
            "Drained {} Pods from Node '{}'",
            results.len(),
            node_name
        );
        Ok(results)
    }

    /// Evicts a single Pod and waits for it to leave the Node. Always resolves to a result for the Pod.
    async fn evict_and_confirm(
        &self,
        pod: Pod,
        node_name: &str,
        retry_until: Instant,
    ) -> EvictionResult {
        let grace_period_seconds =
            eviction_grace_period_seconds(&pod, self.config.max_graceful_termination_secs);

        let outcome = evict_pod(
            &self.client,
            &pod,
            grace_period_seconds,
            retry_until,
            self.config.eviction_retry_interval,
        )
        .await;

        match outcome {
            Err(err) => EvictionResult::failed(pod, err),
            Ok(EvictOutcome::AlreadyGone) => {
                self.register_eviction(&pod);
                EvictionResult::evicted(pod)
            }
            Ok(EvictOutcome::Evicted) => {
                self.register_eviction(&pod);
                let deadline = Instant::now()
                    + self.config.max_graceful_termination()
                    + self.config.pod_eviction_headroom;

                match confirm_disappearance(
                    &self.client,
                    &pod,
                    node_name,
                    deadline,
                    self.config.pod_deletion_check_interval,
                )
                .await
                {
                    Confirmation::Confirmed | Confirmation::RescheduledElsewhere { .. } => {
                        EvictionResult::evicted(pod)
                    }
                    Confirmation::TimedOut { last_error } => {
                        EvictionResult::confirmation_timed_out(pod, last_error)
                    }
                }
            }
        }
    }

    /// Evicts DaemonSet Pods concurrently, giving up as soon as one of them cannot be evicted.
    ///
    /// Each Pod is retried until `now + daemon_set_eviction_timeout`, and no eviction request is made after that.
    /// Requests still in flight at the deadline are abandoned, naming the Pods which are still unresolved.
    async fn run_daemon_set_stage(
        &self,
        node_name: &str,
        pods: Vec<Pod>,
        now: Instant,
    ) -> Result<Vec<EvictionResult>> {
        if pods.is_empty() {
            return Ok(Vec::new());
        }

        let retry_interval = self.config.daemon_set_eviction_retry_interval;
        let retry_until = now + self.config.daemon_set_eviction_timeout;

        event!(
            Level::INFO,
            "Evicting {} DaemonSet Pods from Node '{}'",
            pods.len(),
            node_name
        );

        let mut pending: BTreeSet<String> = pods.iter().map(ResourceExt::name_any).collect();
        let concurrency = pods.len();
        let evictions = stream::iter(pods)
            .map(|pod| async move {
                let grace_period_seconds =
                    eviction_grace_period_seconds(&pod, self.config.max_graceful_termination_secs);
                let outcome = evict_pod(
                    &self.client,
                    &pod,
                    grace_period_seconds,
                    retry_until,
                    retry_interval,
                )
                .await;
                (pod, outcome)
            })
            .buffer_unordered(concurrency);
        futures::pin_mut!(evictions);

        let mut results = Vec::with_capacity(concurrency);
        loop {
            match timeout_at(retry_until, evictions.next()).await {
                Ok(Some((pod, Ok(_)))) => {
                    pending.remove(&pod.name_any());
                    self.register_eviction(&pod);
                    results.push(EvictionResult::evicted(pod));
                }
                Ok(Some((_, Err(err)))) => {
                    return Err(err).context(error::DaemonSetEvictionSnafu { node_name });
                }
                Ok(None) => break,
                Err(_) => {
                    return error::DaemonSetEvictionTimeoutSnafu {
                        node_name,
                        timeout: self.config.daemon_set_eviction_timeout,
                        pending_pods: pending.into_iter().collect::<Vec<_>>(),
                    }
                    .fail();
                }
            }
        }

        Ok(results)
    }

    fn register_eviction(&self, pod: &Pod) {
        if let Some(register) = &self.register {
            register.register_eviction(pod);
        }
    }
}
