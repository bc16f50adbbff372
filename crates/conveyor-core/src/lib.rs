//! conveyor-core: Shared infrastructure for the conveyor order pipeline.
//!
//! This crate holds the pieces that are independent of orders and brokers:
//!
//! - `config/` - Environment variable interpolation, YAML loading, shared config sections
//! - `metrics/` - Internal events, the `emit!` macro and the Prometheus endpoint
//! - `polling` - Generic polling loop trait and runner
//! - `topology/` - Running several long-lived components under one shutdown token
//! - `signal` - Signal handling for graceful shutdown
//! - `logging` - Tracing subscriber setup
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod topology;

pub use config::{ComponentKey, GlobalConfig, MetricsConfig, interpolate, load_yaml_file, parse_yaml};
pub use error::{ConfigError, MetricsError, RunnerSetupError};
pub use logging::{LogFormat, init_tracing};
pub use metrics::{DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics};
pub use polling::{IterationResult, PollSchedule, PollingProcessor, run_polling_loop};
pub use signal::shutdown_signal;
pub use topology::{
    Component, ComponentContext, ComponentRunner, RunSummary, random_jitter, run_components,
};
