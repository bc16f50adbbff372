//! Command-line interface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use snafu::prelude::*;
use tracing::info;

use conveyor_core::logging::LogFormat;
use conveyor_core::topology::run_components;

use crate::broker::{ConnectionPool, connection_factory};
use crate::config::{Config, RouteKey};
use crate::consume::LoggingHandler;
use crate::error::{
    BrokerSnafu, ComponentsFailedSnafu, PipelineError, SetupSnafu, UnknownRouteSnafu,
};
use crate::intake::{NewOrder, OrderIntake, OrderStore};
use crate::service::Service;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every route and the consumer until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file and print a summary
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create an order and drop it into a route's watched directory
    Submit {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        customer: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        amount: f64,
        /// Route to submit to; defaults to the first configured route
        #[arg(long)]
        route: Option<String>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<(), PipelineError> {
        match self.command {
            Command::Run { config } => run(&config).await,
            Command::Check { config } => check(&config),
            Command::Submit {
                config,
                customer,
                product,
                amount,
                route,
            } => {
                let order = NewOrder {
                    customer_id: customer,
                    product,
                    amount,
                };
                submit(&config, order, route.as_deref()).await
            }
        }
    }
}

async fn run(path: &Path) -> Result<(), PipelineError> {
    let config = Config::from_file(path)?;
    log_startup_info(&config);

    let factory = connection_factory(&config.broker).context(BrokerSnafu)?;
    let pool = ConnectionPool::new(factory.clone(), config.broker.pool_config());

    let summary = run_components(&config.metrics.address, &config.global, |context| {
        Service::from_config(
            &config,
            factory.clone(),
            pool.clone(),
            Arc::new(LoggingHandler),
            context,
        )
    })
    .await
    .context(SetupSnafu)?;

    pool.close();
    ensure!(
        summary.is_success(),
        ComponentsFailedSnafu {
            failed: summary.failed
        }
    );
    Ok(())
}

fn check(path: &Path) -> Result<(), PipelineError> {
    let config = Config::from_file(path)?;

    println!("Configuration OK: {}", path.display());
    println!("  broker: {}", config.broker.url);
    for (key, route) in &config.routes {
        println!(
            "  route {key}: {} -> {} (errors: {})",
            route.source.path, route.queue, route.error.path
        );
    }
    if config.consumer.enabled {
        println!(
            "  consumer: {} x{}",
            config.consumer.queue, config.consumer.concurrency
        );
    } else {
        println!("  consumer: disabled");
    }
    println!("  metrics: {}", config.metrics.address);
    Ok(())
}

async fn submit(path: &Path, order: NewOrder, route: Option<&str>) -> Result<(), PipelineError> {
    let config = Config::from_file(path)?;

    let (key, route) = match route {
        Some(name) => config
            .routes
            .get_key_value(&RouteKey::new(name))
            .context(UnknownRouteSnafu { route: name })?,
        None => config.routes.first().context(UnknownRouteSnafu {
            route: "<first>",
        })?,
    };

    let intake = OrderIntake::new(Arc::new(OrderStore::new()), &route.source.path);
    let (order, file) = intake.create_order(order).await?;

    info!(target = %key, order_id = order.id(), "Order submitted");
    println!("{} {}", order.id(), file.display());
    Ok(())
}

fn log_startup_info(config: &Config) {
    info!(
        routes = config.route_count(),
        consumer = config.consumer.enabled,
        broker = %config.broker.url,
        "Starting conveyor"
    );
    for (key, route) in &config.routes {
        info!(
            target = %key,
            source = %route.source.path,
            queue = %route.queue,
            "Route configured"
        );
    }
}
