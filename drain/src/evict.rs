//! The per-Pod parts of a drain: creating an Eviction, and confirming the Pod actually left the Node.
use crate::client::PodClient;
use crate::error::{EvictError, GetPodError, PodEvictionError};
use crate::pod::{bound_node_name, namespace_of};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::{sleep, Duration, Instant};
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::{event, instrument, Level};

use std::sync::atomic::{AtomicUsize, Ordering};

/// How an eviction attempt ended, when it did not fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvictOutcome {
    /// The Eviction was created. The Pod has been asked to terminate but may still be running.
    Evicted,
    /// The Pod was already gone when we tried to evict it.
    AlreadyGone,
}

/// How confirming that an evicted Pod has left the Node ended.
#[derive(Debug)]
pub enum Confirmation {
    /// The Pod no longer exists.
    Confirmed,
    /// A Pod by the same name is now bound to a different Node.
    RescheduledElsewhere { node_name: String },
    /// The Pod was still present when the deadline passed.
    TimedOut { last_error: Option<GetPodError> },
}

/// Creates an Eviction for the Pod, retrying refused evictions until `retry_until`.
///
/// At least one eviction request is always made. Refusals that may resolve themselves (typically a
/// PodDisruptionBudget which cannot currently tolerate another disruption) are retried every `retry_interval`, as
/// long as the next attempt would still start by `retry_until`. No request is made after the deadline. Any other
/// refusal ends the attempt immediately.
///
/// Running out of time while being refused is reported as an error, not as a timeout: the eviction was definitively
/// refused every time it was tried.
#[instrument(skip(client, pod), fields(pod = %pod.name_any()), err)]
pub async fn evict_pod<C: PodClient>(
    client: &C,
    pod: &Pod,
    grace_period_seconds: u32,
    retry_until: Instant,
    retry_interval: Duration,
) -> Result<EvictOutcome, PodEvictionError> {
    let pod_name = pod.name_any();
    let attempts = AtomicUsize::new(0);

    let eviction_result = RetryIf::spawn(
        FixedInterval::new(retry_interval),
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            event!(Level::INFO, attempt, "Attempting to evict Pod '{}'", pod_name);
            client.evict_pod(pod, grace_period_seconds)
        },
        |err: &EvictError| {
            let retry = err.should_retry() && Instant::now() + retry_interval <= retry_until;
            if retry {
                event!(
                    Level::WARN,
                    "Eviction of Pod '{}' was refused: '{}'. This is likely due to respecting a Pod Disruption Budget. Retrying in {:.2}s.",
                    pod_name,
                    err,
                    retry_interval.as_secs_f64()
                );
            }
            retry
        },
    )
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match eviction_result {
        Ok(()) => {
            event!(Level::INFO, attempts, "Successfully evicted Pod '{}'", pod_name);
            Ok(EvictOutcome::Evicted)
        }
        Err(EvictError::PodNotFound { .. }) => {
            event!(Level::INFO, "Pod '{}' was already gone.", pod_name);
            Ok(EvictOutcome::AlreadyGone)
        }
        Err(source) if source.should_retry() => Err(PodEvictionError::EvictionRetriesExhausted {
            source,
            pod_name,
            attempts,
        }),
        Err(source) => Err(PodEvictionError::EvictionFailed { source, pod_name }),
    }
}

/// Waits for an evicted Pod to leave `node_name`.
///
/// The Pod is polled every `poll_interval`. It counts as gone once it no longer exists, or once a Pod by the same
/// name is found bound to another Node. An unbound Pod may still be placed back on the drained Node, so it does not
/// count. If the Pod is still present (or cannot be looked up) when `deadline` passes, the last lookup error is
/// kept for diagnosis.
#[instrument(skip(client, pod), fields(pod = %pod.name_any()))]
pub async fn confirm_disappearance<C: PodClient>(
    client: &C,
    pod: &Pod,
    node_name: &str,
    deadline: Instant,
    poll_interval: Duration,
) -> Confirmation {
    let namespace = namespace_of(pod);
    let pod_name = pod.name_any();

    let mut last_error = None;
    loop {
        match client.get_pod(&namespace, &pod_name).await {
            Ok(None) => {
                event!(Level::INFO, "Pod '{}' deleted.", pod_name);
                return Confirmation::Confirmed;
            }
            Ok(Some(current)) => match bound_node_name(&current) {
                Some(current_node) if current_node != node_name => {
                    event!(
                        Level::INFO,
                        "Pod '{}' was rescheduled from Node '{}' to Node '{}'.",
                        pod_name,
                        node_name,
                        current_node
                    );
                    return Confirmation::RescheduledElsewhere {
                        node_name: current_node.to_string(),
                    };
                }
                _ => event!(Level::DEBUG, "Pod '{}' not yet deleted.", pod_name),
            },
            Err(err) => {
                event!(
                    Level::ERROR,
                    "Could not determine if Pod '{}' has been deleted: '{}'",
                    pod_name,
                    err
                );
                last_error = Some(err);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            event!(
                Level::WARN,
                "Pod '{}' was not deleted in the time allocated.",
                pod_name
            );
            return Confirmation::TimedOut { last_error };
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::client::mock::MockPodClient;
    use crate::pod::test::{pod_on_node, regular_pod};

    use std::sync::Arc;

    pub(crate) fn retriable(pod_name: &str) -> EvictError {
        EvictError::RetriableEviction {
            source: "Cannot evict pod as it would violate the pod's disruption budget.".into(),
            pod_name: pod_name.to_string(),
        }
    }

    pub(crate) fn non_retriable(pod_name: &str) -> EvictError {
        EvictError::NonRetriableEviction {
            source: format!("eviction_error: {}", pod_name).into(),
            pod_name: pod_name.to_string(),
        }
    }

    fn get_error(pod_name: &str) -> GetPodError {
        GetPodError::GetPod {
            source: format!("disappearance_error: {}", pod_name).into(),
            namespace: "default".to_string(),
            pod_name: pod_name.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_first_try() {
        let mut client = MockPodClient::new();
        client
            .expect_evict_pod()
            .withf(|pod: &Pod, grace_period_seconds: &u32| {
                pod.name_any() == "p1" && *grace_period_seconds == 20
            })
            .returning(|_, _| Ok(()))
            .times(1);

        let outcome = evict_pod(
            &client,
            &regular_pod("p1"),
            20,
            Instant::now() + Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(outcome.unwrap(), EvictOutcome::Evicted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_retries_refusals() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut client = MockPodClient::new();
        let counter = calls.clone();
        client.expect_evict_pod().returning(move |pod, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(retriable(&pod.name_any()))
            } else {
                Ok(())
            }
        });

        let start = Instant::now();
        let outcome = evict_pod(
            &client,
            &regular_pod("p1"),
            30,
            start + Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(outcome.unwrap(), EvictOutcome::Evicted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_retries_exhausted() {
        let mut client = MockPodClient::new();
        client
            .expect_evict_pod()
            .returning(|pod, _| Err(retriable(&pod.name_any())));

        let start = Instant::now();
        let outcome = evict_pod(
            &client,
            &regular_pod("p1"),
            30,
            start + Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await;

        // Attempts at 0s, 1s, 2s, 3s, 4s and 5s. Another one would start after the deadline.
        match outcome {
            Err(PodEvictionError::EvictionRetriesExhausted {
                source, attempts, ..
            }) => {
                assert_eq!(attempts, 6);
                assert!(source.should_retry());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(Instant::now() - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_never_attempts_past_deadline() {
        let attempt_times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let times = attempt_times.clone();
        let start = Instant::now();
        let mut client = MockPodClient::new();
        client.expect_evict_pod().returning(move |pod, _| {
            times.lock().unwrap().push(Instant::now() - start);
            Err(retriable(&pod.name_any()))
        });

        let outcome = evict_pod(
            &client,
            &regular_pod("d1"),
            30,
            start + Duration::from_secs(10),
            Duration::from_secs(3),
        )
        .await;

        assert!(matches!(
            outcome,
            Err(PodEvictionError::EvictionRetriesExhausted { attempts: 4, .. })
        ));
        let secs: Vec<u64> = attempt_times
            .lock()
            .unwrap()
            .iter()
            .map(Duration::as_secs)
            .collect();
        assert_eq!(secs, vec![0, 3, 6, 9]);
        assert_eq!(Instant::now() - start, Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_always_tries_once() {
        let mut client = MockPodClient::new();
        client
            .expect_evict_pod()
            .returning(|pod, _| Err(retriable(&pod.name_any())))
            .times(1);

        // The deadline has already passed.
        let outcome = evict_pod(
            &client,
            &regular_pod("p1"),
            30,
            Instant::now(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(
            outcome,
            Err(PodEvictionError::EvictionRetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_fatal_refusal() {
        let mut client = MockPodClient::new();
        client
            .expect_evict_pod()
            .returning(|pod, _| Err(non_retriable(&pod.name_any())))
            .times(1);

        let outcome = evict_pod(
            &client,
            &regular_pod("p2"),
            30,
            Instant::now() + Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await;
        match outcome {
            Err(err @ PodEvictionError::EvictionFailed { .. }) => {
                assert_eq!(err.pod_name(), "p2");
                assert!(err.to_string().contains("eviction_error: p2"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_pod_already_gone() {
        let mut client = MockPodClient::new();
        client.expect_evict_pod().returning(|pod, _| {
            Err(EvictError::PodNotFound {
                pod_name: pod.name_any(),
            })
        });

        let outcome = evict_pod(
            &client,
            &regular_pod("p1"),
            30,
            Instant::now() + Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(outcome.unwrap(), EvictOutcome::AlreadyGone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_deleted() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut client = MockPodClient::new();
        client
            .expect_get_pod()
            .withf(|namespace: &str, name: &str| namespace == "default" && name == "p1")
            .returning(move |_, name| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Some(pod_on_node(name, "n1")))
                } else {
                    Ok(None)
                }
            });

        let start = Instant::now();
        let confirmation = confirm_disappearance(
            &client,
            &pod_on_node("p1", "n1"),
            "n1",
            start + Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(confirmation, Confirmation::Confirmed));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_rescheduled() {
        let mut client = MockPodClient::new();
        client
            .expect_get_pod()
            .returning(|_, name| Ok(Some(pod_on_node(name, "n2"))))
            .times(1);

        let confirmation = confirm_disappearance(
            &client,
            &pod_on_node("p2", "n1"),
            "n1",
            Instant::now() + Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(
            confirmation,
            Confirmation::RescheduledElsewhere { node_name } if node_name == "n2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_unbound_is_not_gone() {
        let mut client = MockPodClient::new();
        client
            .expect_get_pod()
            .returning(|_, name| Ok(Some(regular_pod(name))));

        let start = Instant::now();
        let confirmation = confirm_disappearance(
            &client,
            &pod_on_node("p3", "n1"),
            "n1",
            start + Duration::from_secs(10),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(
            confirmation,
            Confirmation::TimedOut { last_error: None }
        ));
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_timed_out_keeps_last_error() {
        let mut client = MockPodClient::new();
        client
            .expect_get_pod()
            .returning(|_, name| Err(get_error(name)));

        let start = Instant::now();
        let confirmation = confirm_disappearance(
            &client,
            &pod_on_node("p2", "n1"),
            "n1",
            start + Duration::from_secs(12),
            Duration::from_secs(5),
        )
        .await;
        match confirmation {
            Confirmation::TimedOut {
                last_error: Some(err),
            } => assert!(err.to_string().contains("disappearance_error: p2")),
            other => panic!("unexpected confirmation: {:?}", other),
        }
        // Polls at 0s, 5s, 10s and 12s: the last sleep is cut short by the deadline.
        assert_eq!(Instant::now() - start, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_timed_out_still_present() {
        let mut client = MockPodClient::new();
        client
            .expect_get_pod()
            .returning(|_, name| Ok(Some(pod_on_node(name, "n1"))))
            .times(1);

        // With no time budget at all, a single poll is made.
        let confirmation = confirm_disappearance(
            &client,
            &pod_on_node("p4", "n1"),
            "n1",
            Instant::now(),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(
            confirmation,
            Confirmation::TimedOut { last_error: None }
        ));
    }
}
