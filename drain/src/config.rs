use snafu::{ensure, ResultExt};
use tokio::time::Duration;

use std::env;
use std::str::FromStr;

// Environment variables read by `DrainConfig::from_environment`.
const MAX_GRACEFUL_TERMINATION_SEC_ENV_VAR: &str = "MAX_GRACEFUL_TERMINATION_SEC";
const MAX_POD_EVICTION_TIME_ENV_VAR: &str = "MAX_POD_EVICTION_TIME";
const EVICTION_RETRY_INTERVAL_ENV_VAR: &str = "EVICTION_RETRY_INTERVAL";
const POD_EVICTION_HEADROOM_ENV_VAR: &str = "POD_EVICTION_HEADROOM";
const POD_DELETION_CHECK_INTERVAL_ENV_VAR: &str = "POD_DELETION_CHECK_INTERVAL";
const DAEMONSET_EVICTION_FOR_EMPTY_NODES_ENV_VAR: &str = "DAEMONSET_EVICTION_FOR_EMPTY_NODES";
const DAEMONSET_EVICTION_FOR_OCCUPIED_NODES_ENV_VAR: &str =
    "DAEMONSET_EVICTION_FOR_OCCUPIED_NODES";
const DAEMONSET_EVICTION_TIMEOUT_ENV_VAR: &str = "DAEMONSET_EVICTION_TIMEOUT";
const DAEMONSET_EVICTION_RETRY_INTERVAL_ENV_VAR: &str = "DAEMONSET_EVICTION_RETRY_INTERVAL";

pub const DEFAULT_MAX_GRACEFUL_TERMINATION_SECS: u32 = 600;
pub const DEFAULT_MAX_POD_EVICTION_TIME: Duration = Duration::from_secs(120);
// Time to wait between eviction attempts which were refused, typically to respect a PodDisruptionBudget.
pub const DEFAULT_EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(10);
// Extra time to wait for a Pod to disappear, for Pods which ignore SIGTERM and are only SIGKILLed once their
// grace period runs out.
pub const DEFAULT_POD_EVICTION_HEADROOM: Duration = Duration::from_secs(30);
pub const DEFAULT_POD_DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DAEMONSET_EVICTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DAEMONSET_EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Parameters for a drain. A single configuration is shared by every Pod evicted in a drain call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainConfig {
    /// The longest grace period requested for any Pod. Pods asking for less are given what they ask for.
    pub max_graceful_termination_secs: u32,
    /// How long, on top of the graceful termination budget, to keep retrying refused evictions.
    pub max_pod_eviction_time: Duration,
    pub eviction_retry_interval: Duration,
    /// Slack added after the graceful termination budget before giving up on seeing an evicted Pod disappear.
    pub pod_eviction_headroom: Duration,
    pub pod_deletion_check_interval: Duration,
    /// Whether DaemonSet Pods are evicted from Nodes with no other Pods.
    pub daemon_set_eviction_for_empty_nodes: bool,
    /// Whether DaemonSet Pods are evicted from Nodes which also run other Pods.
    pub daemon_set_eviction_for_occupied_nodes: bool,
    pub daemon_set_eviction_timeout: Duration,
    pub daemon_set_eviction_retry_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        DrainConfig {
            max_graceful_termination_secs: DEFAULT_MAX_GRACEFUL_TERMINATION_SECS,
            max_pod_eviction_time: DEFAULT_MAX_POD_EVICTION_TIME,
            eviction_retry_interval: DEFAULT_EVICTION_RETRY_INTERVAL,
            pod_eviction_headroom: DEFAULT_POD_EVICTION_HEADROOM,
            pod_deletion_check_interval: DEFAULT_POD_DELETION_CHECK_INTERVAL,
            daemon_set_eviction_for_empty_nodes: false,
            daemon_set_eviction_for_occupied_nodes: true,
            daemon_set_eviction_timeout: DEFAULT_DAEMONSET_EVICTION_TIMEOUT,
            daemon_set_eviction_retry_interval: DEFAULT_DAEMONSET_EVICTION_RETRY_INTERVAL,
        }
    }
}

impl DrainConfig {
    /// Reads the configuration from environment variables. Unset variables keep their default value.
    ///
    /// Polling and retry intervals must be longer than zero.
    pub fn from_environment() -> Result<Self> {
        let defaults = Self::default();
        let config = DrainConfig {
            max_graceful_termination_secs: parse_env(
                MAX_GRACEFUL_TERMINATION_SEC_ENV_VAR,
                defaults.max_graceful_termination_secs,
            )?,
            max_pod_eviction_time: duration_env(
                MAX_POD_EVICTION_TIME_ENV_VAR,
                defaults.max_pod_eviction_time,
            )?,
            eviction_retry_interval: duration_env(
                EVICTION_RETRY_INTERVAL_ENV_VAR,
                defaults.eviction_retry_interval,
            )?,
            pod_eviction_headroom: duration_env(
                POD_EVICTION_HEADROOM_ENV_VAR,
                defaults.pod_eviction_headroom,
            )?,
            pod_deletion_check_interval: duration_env(
                POD_DELETION_CHECK_INTERVAL_ENV_VAR,
                defaults.pod_deletion_check_interval,
            )?,
            daemon_set_eviction_for_empty_nodes: parse_env(
                DAEMONSET_EVICTION_FOR_EMPTY_NODES_ENV_VAR,
                defaults.daemon_set_eviction_for_empty_nodes,
            )?,
            daemon_set_eviction_for_occupied_nodes: parse_env(
                DAEMONSET_EVICTION_FOR_OCCUPIED_NODES_ENV_VAR,
                defaults.daemon_set_eviction_for_occupied_nodes,
            )?,
            daemon_set_eviction_timeout: duration_env(
                DAEMONSET_EVICTION_TIMEOUT_ENV_VAR,
                defaults.daemon_set_eviction_timeout,
            )?,
            daemon_set_eviction_retry_interval: duration_env(
                DAEMONSET_EVICTION_RETRY_INTERVAL_ENV_VAR,
                defaults.daemon_set_eviction_retry_interval,
            )?,
        };

        for (variable, interval) in [
            (EVICTION_RETRY_INTERVAL_ENV_VAR, config.eviction_retry_interval),
            (POD_DELETION_CHECK_INTERVAL_ENV_VAR, config.pod_deletion_check_interval),
            (
                DAEMONSET_EVICTION_RETRY_INTERVAL_ENV_VAR,
                config.daemon_set_eviction_retry_interval,
            ),
        ] {
            ensure!(
                !interval.is_zero(),
                config_error::ZeroIntervalSnafu { variable }
            );
        }

        Ok(config)
    }

    /// The graceful termination budget as a `Duration`.
    pub fn max_graceful_termination(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_graceful_termination_secs))
    }
}

fn duration_env(variable: &str, default: Duration) -> Result<Duration> {
    match env::var(variable) {
        Ok(value) => humantime::parse_duration(value.trim()).context(config_error::DurationSnafu {
            variable,
            value: value.clone(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env<T>(variable: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(variable) {
        Ok(value) => value
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
            .context(config_error::ValueSnafu {
                variable,
                value: value.clone(),
            }),
        Err(_) => Ok(default),
    }
}

/// The module-wide result type.
type Result<T> = std::result::Result<T, config_error::Error>;
pub use config_error::Error as ConfigError;

pub mod config_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "Could not parse duration from environment variable '{}={}': '{}'",
            variable,
            value,
            source
        ))]
        Duration {
            source: humantime::DurationError,
            variable: String,
            value: String,
        },

        #[snafu(display(
            "Could not parse environment variable '{}={}': '{}'",
            variable,
            value,
            source
        ))]
        Value {
            source: Box<dyn std::error::Error + Send + Sync>,
            variable: String,
            value: String,
        },

        #[snafu(display("Environment variable '{}' must be longer than zero", variable))]
        ZeroInterval { variable: String },
    }
}
