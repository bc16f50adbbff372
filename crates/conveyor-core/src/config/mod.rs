//! Configuration primitives shared by conveyor components.

mod component_key;
mod load;
mod vars;

pub use component_key::ComponentKey;
pub use load::{is_yaml_file, load_yaml_file, parse_yaml};
pub use vars::interpolate;

use serde::{Deserialize, Serialize};

use crate::metrics::DEFAULT_METRICS_ADDR;

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    DEFAULT_METRICS_ADDR.to_string()
}

/// Process-wide settings that apply to every component.
///
/// # Examples
///
/// ```
/// use conveyor_core::config::GlobalConfig;
///
/// let config = GlobalConfig::default();
/// assert_eq!(config.poll_jitter_secs, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Maximum random delay (seconds) added to start times and poll intervals,
    /// so that several routes do not hit the filesystem in lockstep.
    #[serde(default)]
    pub poll_jitter_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default_address() {
        assert_eq!(MetricsConfig::default().address, "0.0.0.0:9090");
    }

    #[test]
    fn test_global_yaml_empty_uses_defaults() {
        let config: GlobalConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_global_rejects_unknown_keys() {
        let result: Result<GlobalConfig, _> = serde_yaml::from_str("total_concurrency: 4");
        assert!(result.is_err());
    }
}
