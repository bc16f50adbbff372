//! Generic polling loop trait and runner.
//!
//! A processor is asked to `prepare` work on every tick; when it finds some,
//! `process` is called with it. The loop sleeps for the poll interval (plus
//! jitter) between ticks. Shutdown interrupts `prepare` and the wait, but a
//! started `process` call always runs to completion.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationResultType};
use crate::topology::random_jitter;

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Items were processed.
    ProcessedItems,
    /// No items were available to process.
    NoItems,
    /// Shutdown was requested while processing.
    Shutdown,
}

/// How often a polling loop ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Base wait between iterations.
    pub interval: Duration,
    /// Upper bound of the random delay added to each wait.
    pub jitter_secs: u64,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter_secs: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_secs: u64) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }

    fn next_wait(&self) -> Duration {
        self.interval + random_jitter(self.jitter_secs)
    }
}

/// A polling-based processor.
#[async_trait]
pub trait PollingProcessor: Send {
    /// Work found by `prepare` and consumed by `process`.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Look for work. Returns `None` when there is nothing to do.
    ///
    /// `cold_start` is true on the first iteration only.
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Drive `processor` until `shutdown` is cancelled.
///
/// A failed iteration is logged and the loop carries on with the next tick:
/// one bad iteration never stops a watcher.
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    schedule: PollSchedule,
    shutdown: CancellationToken,
    name: &str,
) {
    let mut cold_start = true;

    loop {
        let started = Instant::now();

        match run_iteration(processor, cold_start, &shutdown, name).await {
            Ok(IterationResult::Shutdown) => break,
            Ok(result) => {
                let result = match result {
                    IterationResult::NoItems => IterationResultType::NoItems,
                    _ => IterationResultType::Processed,
                };
                emit!(IterationCompleted {
                    result,
                    duration: started.elapsed(),
                    target: name.to_string(),
                });
            }
            Err(e) => {
                error!(target = name, error = %e, "Iteration failed, retrying on next poll");
            }
        }
        cold_start = false;

        let wait = schedule.next_wait();
        debug!(target = name, wait_ms = wait.as_millis() as u64, "Waiting for next poll");
        if shutdown
            .run_until_cancelled(tokio::time::sleep(wait))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }
}

async fn run_iteration<P: PollingProcessor>(
    processor: &mut P,
    cold_start: bool,
    shutdown: &CancellationToken,
    name: &str,
) -> Result<IterationResult, P::Error> {
    let state = tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!(target = name, "Shutdown requested while preparing");
            return Ok(IterationResult::Shutdown);
        }

        result = processor.prepare(cold_start) => result?,
    };

    let Some(state) = state else {
        debug!(target = name, "No items to process");
        return Ok(IterationResult::NoItems);
    };

    // Not raced against shutdown: work in flight finishes, and processors
    // check the token between items themselves.
    processor.process(state).await
}
