//! File ingestion.
//!
//! Each configured route watches one directory. Every file found there is
//! driven through read, decode, validate, re-encode and publish, one file at
//! a time. Published files are deleted or archived; anything that fails at
//! any stage is handed to the dead-letter router.

mod listing;
mod processor;
mod tracker;

use std::path::{Path, PathBuf};

use snafu::prelude::*;
use tokio::fs;
use tracing::info;

use conveyor_core::polling::{PollSchedule, run_polling_loop};
use conveyor_core::topology::ComponentContext;

use crate::broker::ConnectionPool;
use crate::config::{RouteConfig, RouteKey};
use crate::error::{
    DecodeFileSnafu, IngestError, InvalidSnafu, NormalizeSnafu, PipelineError, PrepareDirSnafu,
    PublishSnafu, ReadFileSnafu,
};
use crate::order::{self, Order};
use crate::publish::QueuePublisher;

pub use listing::list_candidates;
pub use tracker::HandledFiles;

use processor::IngestProcessor;

/// Run one file through the pipeline up to and including publish.
///
/// Stages run strictly in order and stop at the first failure. The published
/// payload is the canonical re-encoding of the decoded order, not the file's
/// original bytes.
pub async fn process_file(
    path: &Path,
    queue: &str,
    publisher: &QueuePublisher,
) -> Result<Order, IngestError> {
    let bytes = fs::read(path).await.context(ReadFileSnafu { path })?;
    let order = order::decode(&bytes).context(DecodeFileSnafu)?;
    order::validate(&order).context(InvalidSnafu {
        order_id: order.order_id.clone(),
    })?;
    let payload = order::encode(&order).context(NormalizeSnafu)?;
    publisher
        .publish(queue, &payload)
        .await
        .context(PublishSnafu { order_id: order.id() })?;
    Ok(order)
}

/// A watched directory feeding one queue.
pub struct IngestRoute {
    key: RouteKey,
    config: RouteConfig,
    publisher: QueuePublisher,
    context: ComponentContext,
}

impl IngestRoute {
    pub fn new(
        key: RouteKey,
        config: RouteConfig,
        pool: ConnectionPool,
        context: ComponentContext,
    ) -> Self {
        let publisher = QueuePublisher::new(pool, config.publish_timeout());
        Self {
            key,
            config,
            publisher,
            context,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    /// Poll the watched directory until shutdown.
    pub async fn run(self) -> Result<(), PipelineError> {
        let source = PathBuf::from(&self.config.source.path);
        fs::create_dir_all(&source)
            .await
            .context(PrepareDirSnafu { path: &source })?;

        let schedule = PollSchedule::new(self.config.source.poll_interval())
            .with_jitter(self.context.poll_jitter_secs);

        info!(
            target = %self.key,
            source = %self.config.source.path,
            error = %self.config.error.path,
            queue = %self.config.queue,
            poll_interval_ms = self.config.source.poll_interval_ms,
            "Route started"
        );

        let mut processor = IngestProcessor::new(
            self.key.clone(),
            self.config,
            self.publisher,
            self.context.shutdown.clone(),
        );

        run_polling_loop(
            &mut processor,
            schedule,
            self.context.shutdown,
            self.key.id(),
        )
        .await;

        processor.finish().await;
        info!(target = %self.key, "Route stopped");
        Ok(())
    }
}
