//! Configuration for the conveyor pipeline.
//!
//! A single YAML file describes the broker, one or more file routes and the
//! queue consumer. Environment variables are interpolated before parsing.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use conveyor_core::config::{ComponentKey, GlobalConfig, MetricsConfig, load_yaml_file, parse_yaml};

use crate::broker::{BrokerScheme, Credentials, PoolConfig};
use crate::error::ConfigError;

/// Queue carrying validated orders.
pub const DEFAULT_QUEUE: &str = "ORDER.CREATED.QUEUE";

/// Identifier for a configured route.
pub type RouteKey = ComponentKey;

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// `memory://<name>` or `nats://host:port`.
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum publisher connections, checked out and cached.
    #[serde(default = "default_session_cache_size")]
    pub session_cache_size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username: None,
            password: None,
            session_cache_size: default_session_cache_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    /// Credentials, when a username is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| {
            Credentials::new(username.clone(), self.password.clone().unwrap_or_default())
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.session_cache_size,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

fn default_broker_url() -> String {
    "memory://local".to_string()
}

fn default_session_cache_size() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

/// What happens to a source file after its order was published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    #[default]
    Delete,
    /// Move into `archive_path`.
    Archive,
}

/// Watched directory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Files modified more recently than this are left for the next poll.
    #[serde(default)]
    pub min_file_age_ms: u64,
    #[serde(default)]
    pub completion: CompletionMode,
    #[serde(default)]
    pub archive_path: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_file_age(&self) -> Duration {
        Duration::from_millis(self.min_file_age_ms)
    }
}

/// Where failed files go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorConfig {
    pub path: String,
}

/// One watched directory feeding one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub source: SourceConfig,
    pub error: ErrorConfig,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl RouteConfig {
    /// A route with default settings.
    pub fn new(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: SourceConfig {
                path: source.into(),
                poll_interval_ms: default_poll_interval_ms(),
                min_file_age_ms: 0,
                completion: CompletionMode::default(),
                archive_path: None,
            },
            error: ErrorConfig { path: error.into() },
            queue: default_queue(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    fn validate(&self, key: &RouteKey, errors: &mut Vec<ConfigError>) {
        let component = format!("route '{key}'");

        for (field, value) in [
            ("source.path", &self.source.path),
            ("error.path", &self.error.path),
            ("queue", &self.queue),
        ] {
            if value.trim().is_empty() {
                errors.push(ConfigError::EmptyField {
                    component: component.clone(),
                    field,
                });
            }
        }

        require_positive(
            &component,
            "source.poll_interval_ms",
            self.source.poll_interval_ms,
            errors,
        );
        require_positive(&component, "publish_timeout_ms", self.publish_timeout_ms, errors);

        if !self.source.path.is_empty() && same_dir(&self.source.path, &self.error.path) {
            errors.push(ConfigError::ResourceConflict {
                message: format!("{component}: source and error directories are the same"),
            });
        }

        match (&self.source.completion, &self.source.archive_path) {
            (CompletionMode::Archive, None) => errors.push(ConfigError::EmptyField {
                component: component.clone(),
                field: "source.archive_path",
            }),
            (CompletionMode::Archive, Some(archive)) if same_dir(archive, &self.source.path) => {
                errors.push(ConfigError::ResourceConflict {
                    message: format!("{component}: archive and source directories are the same"),
                });
            }
            _ => {}
        }
    }
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

/// Queue consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Parallel workers, each with its own connection.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_receive_wait_ms")]
    pub receive_wait_ms: u64,
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            queue: default_queue(),
            concurrency: default_concurrency(),
            receive_wait_ms: default_receive_wait_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl ConsumerConfig {
    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_receive_wait_ms() -> u64 {
    1000
}

fn default_processing_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub routes: IndexMap<RouteKey, RouteConfig>,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub global: GlobalConfig,
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = load_yaml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML configuration text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.routes.is_empty() && !self.consumer.enabled {
            errors.push(ConfigError::NothingToRun);
        }

        self.validate_broker(&mut errors);

        for (key, route) in &self.routes {
            route.validate(key, &mut errors);
        }

        let mut watched: Vec<(&RouteKey, PathBuf)> = Vec::new();
        for (key, route) in &self.routes {
            let path = normalize(&route.source.path);
            if let Some((other, _)) = watched.iter().find(|(_, p)| *p == path) {
                errors.push(ConfigError::ResourceConflict {
                    message: format!(
                        "routes '{other}' and '{key}' watch the same directory {}",
                        path.display()
                    ),
                });
            }
            watched.push((key, path));
        }

        for (key, route) in &self.routes {
            let mut outputs = vec![("error", route.error.path.as_str())];
            if route.source.completion == CompletionMode::Archive
                && let Some(archive) = &route.source.archive_path
            {
                outputs.push(("archive", archive.as_str()));
            }

            for (kind, output) in outputs {
                let output = normalize(output);
                for (other, watched_dir) in &watched {
                    if *other != key && *watched_dir == output {
                        errors.push(ConfigError::ResourceConflict {
                            message: format!(
                                "{kind} directory of route '{key}' is watched by route '{other}': {}",
                                output.display()
                            ),
                        });
                    }
                }
            }
        }

        if self.consumer.enabled {
            if self.consumer.queue.trim().is_empty() {
                errors.push(ConfigError::EmptyField {
                    component: "consumer".to_string(),
                    field: "queue",
                });
            }
            let consumer = &self.consumer;
            require_positive("consumer", "concurrency", consumer.concurrency as u64, &mut errors);
            require_positive("consumer", "receive_wait_ms", consumer.receive_wait_ms, &mut errors);
            require_positive(
                "consumer",
                "processing_timeout_ms",
                consumer.processing_timeout_ms,
                &mut errors,
            );
        }

        ConfigError::collect(errors)
    }

    fn validate_broker(&self, errors: &mut Vec<ConfigError>) {
        match BrokerScheme::parse(&self.broker.url) {
            None => errors.push(ConfigError::InvalidValue {
                component: "broker".to_string(),
                field: "url",
                message: format!(
                    "unsupported scheme in '{}': expected memory:// or nats://",
                    self.broker.url
                ),
            }),
            Some(scheme) if !scheme.is_available() => errors.push(ConfigError::InvalidValue {
                component: "broker".to_string(),
                field: "url",
                message: format!("'{}' requires a build with the nats feature", self.broker.url),
            }),
            Some(_) => {}
        }

        require_positive(
            "broker",
            "session_cache_size",
            self.broker.session_cache_size as u64,
            errors,
        );
        require_positive("broker", "acquire_timeout_ms", self.broker.acquire_timeout_ms, errors);
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn route(&self, key: &str) -> Option<&RouteConfig> {
        self.routes.get(&RouteKey::new(key))
    }
}

fn normalize(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn require_positive(
    component: &str,
    field: &'static str,
    value: u64,
    errors: &mut Vec<ConfigError>,
) {
    if value == 0 {
        errors.push(ConfigError::InvalidValue {
            component: component.to_string(),
            field,
            message: "must be greater than zero".to_string(),
        });
    }
}

fn same_dir(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
broker:
  url: "memory://test"
  username: "${CONVEYOR_TEST_CFG_USER:-admin}"
  password: "${CONVEYOR_TEST_CFG_PASSWORD:-admin}"
  session_cache_size: 4
routes:
  orders:
    source:
      path: "input/orders"
      poll_interval_ms: 250
      completion: archive
      archive_path: "archive/orders"
    error:
      path: "error/orders"
consumer:
  concurrency: 2
metrics:
  address: "127.0.0.1:9999"
global:
  poll_jitter_secs: 3
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.broker.url, "memory://test");
        assert_eq!(config.broker.credentials(), Some(Credentials::new("admin", "admin")));
        assert_eq!(config.broker.pool_config().max_size, 4);

        let route = config.route("orders").unwrap();
        assert_eq!(route.queue, DEFAULT_QUEUE);
        assert_eq!(route.source.poll_interval(), Duration::from_millis(250));
        assert_eq!(route.source.completion, CompletionMode::Archive);
        assert_eq!(route.publish_timeout(), Duration::from_secs(5));

        assert!(config.consumer.enabled);
        assert_eq!(config.consumer.concurrency, 2);
        assert_eq!(config.consumer.processing_timeout(), Duration::from_secs(30));
        assert_eq!(config.metrics.address, "127.0.0.1:9999");
        assert_eq!(config.global.poll_jitter_secs, 3);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("routes: {}\n").unwrap();
        assert_eq!(config.broker, BrokerConfig::default());
        assert_eq!(config.broker.credentials(), None);
        assert_eq!(config.consumer, ConsumerConfig::default());
        assert_eq!(config.route_count(), 0);
    }

    #[test]
    fn test_nothing_to_run() {
        let err = Config::parse("consumer:\n  enabled: false\n").unwrap_err();
        assert!(matches!(err, ConfigError::NothingToRun));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = Config::parse("broker:\n  uri: memory://x\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_unsupported_broker_scheme() {
        let err = Config::parse("broker:\n  url: tcp://localhost:61616\n").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_route_problems_are_collected() {
        let mut config = Config::default();
        let mut route = RouteConfig::new("input/orders", "input/orders/");
        route.queue = String::new();
        route.source.completion = CompletionMode::Archive;
        config.routes.insert(RouteKey::new("orders"), route);
        config.broker.session_cache_size = 0;

        let err = config.validate().unwrap_err();
        let ConfigError::MultipleErrors { errors } = err else {
            panic!("expected multiple errors, got {err}");
        };
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("'queue' cannot be empty")));
        assert!(errors.iter().any(|e| e.contains("source and error directories")));
        assert!(errors.iter().any(|e| e.contains("archive_path")));
        assert!(errors.iter().any(|e| e.contains("session_cache_size")));
    }

    #[test]
    fn test_duplicate_watch_directories() {
        let mut config = Config::default();
        config
            .routes
            .insert(RouteKey::new("a"), RouteConfig::new("input/orders", "error/a"));
        config
            .routes
            .insert(RouteKey::new("b"), RouteConfig::new("./input/orders/", "error/b"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch the same directory"));
    }

    #[test]
    fn test_consumer_zero_concurrency() {
        let mut config = Config::default();
        config.consumer.concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = Config::default();
        let mut route = RouteConfig::new("input/orders", "error/orders");
        route.publish_timeout_ms = 0;
        config.routes.insert(RouteKey::new("orders"), route);
        config.broker.acquire_timeout_ms = 0;
        config.consumer.receive_wait_ms = 0;
        config.consumer.processing_timeout_ms = 0;

        let err = config.validate().unwrap_err();
        let ConfigError::MultipleErrors { errors } = err else {
            panic!("expected multiple errors, got {err}");
        };
        assert_eq!(errors.len(), 4);
        for field in [
            "publish_timeout_ms",
            "acquire_timeout_ms",
            "receive_wait_ms",
            "processing_timeout_ms",
        ] {
            assert!(errors.iter().any(|e| e.contains(field)), "{field} not reported");
        }
    }

    #[test]
    fn test_error_directory_watched_by_other_route() {
        let mut config = Config::default();
        config
            .routes
            .insert(RouteKey::new("a"), RouteConfig::new("input/a", "input/b"));
        config
            .routes
            .insert(RouteKey::new("b"), RouteConfig::new("input/b", "error/b"));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ResourceConflict { .. }));
        assert!(err.to_string().contains("error directory of route 'a'"));
    }

    #[test]
    fn test_archive_directory_watched_by_other_route() {
        let mut config = Config::default();
        let mut a = RouteConfig::new("input/a", "error/a");
        a.source.completion = CompletionMode::Archive;
        a.source.archive_path = Some("./input/b/".to_string());
        config.routes.insert(RouteKey::new("a"), a);
        config
            .routes
            .insert(RouteKey::new("b"), RouteConfig::new("input/b", "error/b"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("archive directory of route 'a'"));
    }
}
