//! Runner for a set of components sharing one shutdown token.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use snafu::ResultExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::GlobalConfig;
use crate::error::{AddressParseSnafu, MetricsSnafu, RunnerSetupError};
use crate::signal::shutdown_signal;

/// Shared runtime context handed to every component.
#[derive(Clone, Debug)]
pub struct ComponentContext {
    /// Maximum jitter in seconds added to start times and poll intervals.
    pub poll_jitter_secs: u64,
    /// Cancellation token for graceful shutdown.
    pub shutdown: CancellationToken,
}

impl ComponentContext {
    pub fn new(poll_jitter_secs: u64, shutdown: CancellationToken) -> Self {
        Self {
            poll_jitter_secs,
            shutdown,
        }
    }
}

/// A long-lived unit of work run by the [`ComponentRunner`].
pub trait Component: Send + 'static {
    /// The key type used to identify this component in logs.
    type Key: Clone + Display + Send + 'static;

    /// The error type returned by this component.
    type Error: std::error::Error + Send + 'static;

    /// Get a reference to the component's key.
    fn key(&self) -> &Self::Key;

    /// Run until shutdown or a fatal error.
    fn run(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Outcome of a full run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Spawns components and waits for all of them.
pub struct ComponentRunner<C: Component> {
    components: Vec<C>,
    shutdown: CancellationToken,
    start_jitter_secs: u64,
}

impl<C: Component> ComponentRunner<C> {
    pub fn new(components: Vec<C>, shutdown: CancellationToken, start_jitter_secs: u64) -> Self {
        Self {
            components,
            shutdown,
            start_jitter_secs,
        }
    }

    /// Cancel the shared token when the process receives a termination signal.
    pub fn spawn_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    /// Run all components to completion.
    pub async fn run(self) -> RunSummary {
        let mut handles: JoinSet<(C::Key, Result<(), C::Error>)> = JoinSet::new();

        for component in self.components {
            let shutdown = self.shutdown.clone();
            let key = component.key().clone();
            let start_jitter = random_jitter(self.start_jitter_secs);

            handles.spawn(async move {
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_ms = start_jitter.as_millis() as u64,
                        "Delaying component start"
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        return (key, Ok(()));
                    }
                }

                let result = component.run().await;
                (key, result)
            });
        }

        info!(components = handles.len(), "Components started");

        let mut summary = RunSummary::default();
        while let Some(joined) = handles.join_next().await {
            match joined {
                Ok((key, Ok(()))) => {
                    summary.completed += 1;
                    info!(target = %key, "Component stopped");
                }
                Ok((key, Err(e))) => {
                    summary.failed += 1;
                    error!(target = %key, error = %e, "Component failed");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Component task panicked");
                }
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            "All components stopped"
        );
        summary
    }
}

/// Install metrics, build the components and run them until shutdown.
///
/// `create` receives the shared context; everything it returns runs
/// concurrently under one cancellation token that is wired to process signals.
pub async fn run_components<C, F>(
    metrics_address: &str,
    global: &GlobalConfig,
    create: F,
) -> Result<RunSummary, RunnerSetupError>
where
    C: Component,
    F: FnOnce(ComponentContext) -> Vec<C>,
{
    let addr = metrics_address.parse().context(AddressParseSnafu {
        address: metrics_address,
    })?;
    crate::metrics::init_global(addr).context(MetricsSnafu)?;

    let shutdown = CancellationToken::new();
    let context = ComponentContext::new(global.poll_jitter_secs, shutdown.clone());
    let components = create(context);

    let runner = ComponentRunner::new(components, shutdown, global.poll_jitter_secs);
    runner.spawn_shutdown_handler();
    Ok(runner.run().await)
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
