//! Common error types shared by the conveyor crates.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// One or more `${VAR}` references could not be resolved.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read a configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: PathBuf },

    /// A required field is empty.
    #[snafu(display("{component}: '{field}' cannot be empty"))]
    EmptyField {
        component: String,
        field: &'static str,
    },

    /// A field has a value that cannot be used.
    #[snafu(display("{component}: invalid '{field}': {message}"))]
    InvalidValue {
        component: String,
        field: &'static str,
        message: String,
    },

    /// Two settings claim the same exclusive resource.
    #[snafu(display("Resource conflict: {message}"))]
    ResourceConflict { message: String },

    /// Configuration defines nothing to run.
    #[snafu(display("Configuration defines no routes and the consumer is disabled"))]
    NothingToRun,

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to build the Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics were already initialized in this process.
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics controller accessed before initialization.
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

// ============ Runner Setup Errors ============

/// Errors that can occur before components start running.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunnerSetupError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address '{address}': {source}"))]
    AddressParse {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Failed to initialize metrics.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },
}

impl ConfigError {
    /// Collapse a list of validation failures into a single error.
    ///
    /// Returns `Ok(())` when the list is empty and the sole error when there is
    /// exactly one.
    pub fn collect(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleErrors {
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}
