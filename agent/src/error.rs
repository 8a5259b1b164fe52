use drain::client::SnapshotClientError;
use drain::config::ConfigError;
use drain::error::SnapshotError;
use drain::telemetry::TelemetryConfigError;
use drain::DrainError;
use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to find Pods on Node '{}': '{}'", node_name, source))]
    ClassifyPods {
        source: SnapshotError,
        node_name: String,
    },

    #[snafu(display("Unable to create client: '{}'", source))]
    ClientCreate { source: kube::Error },

    #[snafu(display("Unable to read drain configuration: '{}'", source))]
    DrainConfiguration { source: ConfigError },

    #[snafu(display("Unable to cordon Node '{}': '{}'", node_name, source))]
    Cordon {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to drain Node '{}': '{}'", node_name, source))]
    Drain {
        source: DrainError,
        node_name: String,
    },

    #[snafu(display("Unable to get associated node name: {}", source))]
    GetNodeName { source: std::env::VarError },

    #[snafu(display("Unable to list the Pods to drain: '{}'", source))]
    Snapshot { source: SnapshotClientError },

    #[snafu(display("Error configuring tracing: '{}'", source))]
    TracingConfiguration { source: TelemetryConfigError },
}
