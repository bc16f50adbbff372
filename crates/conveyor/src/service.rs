//! The components a configuration produces.

use std::sync::Arc;

use conveyor_core::topology::{Component, ComponentContext};

use crate::broker::{ConnectionFactoryRef, ConnectionPool};
use crate::config::{Config, RouteKey};
use crate::consume::{OrderHandler, QueueConsumer};
use crate::error::PipelineError;
use crate::ingest::IngestRoute;

/// A long-lived unit run by the component runner.
pub enum Service {
    Ingest(IngestRoute),
    Consume(QueueConsumer),
}

impl Service {
    /// One ingester per route, in configuration order, then the consumer
    /// when enabled.
    ///
    /// Ingesters share `pool` for publishing. The consumer opens its own
    /// connections through `factory`.
    pub fn from_config(
        config: &Config,
        factory: ConnectionFactoryRef,
        pool: ConnectionPool,
        handler: Arc<dyn OrderHandler>,
        context: ComponentContext,
    ) -> Vec<Self> {
        let mut services: Vec<Self> = config
            .routes
            .iter()
            .map(|(key, route)| {
                Service::Ingest(IngestRoute::new(
                    key.clone(),
                    route.clone(),
                    pool.clone(),
                    context.clone(),
                ))
            })
            .collect();

        if config.consumer.enabled {
            services.push(Service::Consume(QueueConsumer::new(
                config.consumer.clone(),
                factory,
                handler,
                context,
            )));
        }
        services
    }
}

impl Component for Service {
    type Key = RouteKey;
    type Error = PipelineError;

    fn key(&self) -> &Self::Key {
        match self {
            Service::Ingest(route) => route.key(),
            Service::Consume(consumer) => consumer.key(),
        }
    }

    async fn run(self) -> Result<(), Self::Error> {
        match self {
            Service::Ingest(route) => route.run().await,
            Service::Consume(consumer) => consumer.run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::{BrokerConfig, RouteConfig};
    use crate::consume::{CONSUMER_KEY, LoggingHandler};
    use tokio_util::sync::CancellationToken;

    fn build(config: &Config) -> Vec<Service> {
        let factory: ConnectionFactoryRef = Arc::new(MemoryBroker::new().connection_factory(None));
        let pool = ConnectionPool::new(factory.clone(), BrokerConfig::default().pool_config());
        Service::from_config(
            config,
            factory,
            pool,
            Arc::new(LoggingHandler),
            ComponentContext::new(0, CancellationToken::new()),
        )
    }

    #[test]
    fn test_routes_in_order_then_consumer() {
        let mut config = Config::default();
        config
            .routes
            .insert(RouteKey::new("b"), RouteConfig::new("in/b", "err/b"));
        config
            .routes
            .insert(RouteKey::new("a"), RouteConfig::new("in/a", "err/a"));

        let keys: Vec<_> = build(&config)
            .iter()
            .map(|s| s.key().id().to_string())
            .collect();
        assert_eq!(keys, vec!["b", "a", CONSUMER_KEY]);
    }

    #[test]
    fn test_disabled_consumer_is_skipped() {
        let mut config = Config::default();
        config.consumer.enabled = false;
        config
            .routes
            .insert(RouteKey::new("orders"), RouteConfig::new("in", "err"));

        let services = build(&config);
        assert_eq!(services.len(), 1);
        assert!(matches!(services[0], Service::Ingest(_)));
    }
}
