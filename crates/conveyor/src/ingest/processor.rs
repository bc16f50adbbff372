//! The ingest processor: one polling iteration over a watched directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conveyor_core::emit;
use conveyor_core::metrics::events::{FileProcessed, FileStatus, FilesDiscovered, PendingFiles};
use conveyor_core::polling::{IterationResult, PollingProcessor};

use super::listing::list_candidates;
use super::process_file;
use super::tracker::HandledFiles;
use crate::config::{CompletionMode, RouteConfig, RouteKey};
use crate::dlq::{DeadLetterRouter, move_file, unique_destination};
use crate::error::{
    ArchiveSnafu, CompletionError, CreateDirSnafu, DlqError, DlqSnafu, InvalidPathSnafu,
    ListDirSnafu, PipelineError, RemoveSnafu,
};
use crate::publish::QueuePublisher;

/// Terminal state of one file within an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FileOutcome {
    Published,
    DeadLettered,
}

pub(super) struct IngestProcessor {
    key: RouteKey,
    config: RouteConfig,
    source_dir: PathBuf,
    publisher: QueuePublisher,
    router: DeadLetterRouter,
    handled: HandledFiles,
    shutdown: CancellationToken,
}

impl IngestProcessor {
    pub fn new(
        key: RouteKey,
        config: RouteConfig,
        publisher: QueuePublisher,
        shutdown: CancellationToken,
    ) -> Self {
        let router = DeadLetterRouter::new(&config.error.path, key.id());
        Self {
            source_dir: PathBuf::from(&config.source.path),
            key,
            config,
            publisher,
            router,
            handled: HandledFiles::new(),
            shutdown,
        }
    }

    /// Flush outstanding failure records. Called once the loop has stopped.
    pub async fn finish(&mut self) {
        if let Err(e) = self.router.finalize().await {
            error!(target = %self.key, error = %e, "Failed to write failure records");
        }
    }

    async fn handle_file(&mut self, path: &Path) -> FileOutcome {
        debug!(target = %self.key, file = %path.display(), "Processing file");

        match process_file(path, &self.config.queue, &self.publisher).await {
            Ok(order) => {
                info!(
                    target = %self.key,
                    file = %path.display(),
                    order_id = order.id(),
                    queue = %self.config.queue,
                    "Order published"
                );
                if let Err(e) = self.complete(path).await {
                    error!(
                        target = %self.key,
                        file = %path.display(),
                        order_id = order.id(),
                        error = %e,
                        "Order published but the source file could not be completed; \
                         it will not be published again by this process"
                    );
                    self.handled.mark_consumed(path);
                }
                emit!(FileProcessed {
                    status: FileStatus::Published,
                    target: self.key.to_string(),
                });
                FileOutcome::Published
            }
            Err(e) => {
                warn!(
                    target = %self.key,
                    file = %path.display(),
                    stage = e.stage().as_str(),
                    reason = %e,
                    "File processing failed"
                );
                if let Err(dlq) = self.router.reroute(path, &e).await {
                    error!(
                        target = %self.key,
                        file = %path.display(),
                        error = %dlq,
                        "Failed to move file to the error directory; skipping it until restart"
                    );
                    self.handled.mark_quarantined(path);
                }
                FileOutcome::DeadLettered
            }
        }
    }

    async fn complete(&self, path: &Path) -> Result<(), CompletionError> {
        match (&self.config.source.completion, &self.config.source.archive_path) {
            (CompletionMode::Archive, Some(dir)) => {
                let archived = archive(path, Path::new(dir)).await.context(ArchiveSnafu)?;
                debug!(target = %self.key, archived = %archived.display(), "Source file archived");
                Ok(())
            }
            _ => fs::remove_file(path).await.context(RemoveSnafu { path }),
        }
    }
}

async fn archive(path: &Path, dir: &Path) -> Result<PathBuf, DlqError> {
    fs::create_dir_all(dir)
        .await
        .context(CreateDirSnafu { path: dir })?;
    let file_name = path.file_name().context(InvalidPathSnafu { path })?;
    let destination = unique_destination(dir, file_name).await;
    move_file(path, &destination).await?;
    Ok(destination)
}

#[async_trait]
impl PollingProcessor for IngestProcessor {
    type State = Vec<PathBuf>;
    type Error = PipelineError;

    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Vec<PathBuf>>, PipelineError> {
        let listed = list_candidates(&self.source_dir, self.config.source.min_file_age())
            .await
            .context(ListDirSnafu {
                path: &self.source_dir,
            })?;

        if cold_start && !listed.is_empty() {
            info!(
                target = %self.key,
                count = listed.len(),
                "Found files waiting from before startup"
            );
        }

        self.handled.retain_listed(&listed);
        let pending = self.handled.filter_pending(listed);

        emit!(PendingFiles {
            count: pending.len(),
            target: self.key.to_string(),
        });

        if pending.is_empty() {
            return Ok(None);
        }

        emit!(FilesDiscovered {
            count: pending.len() as u64,
            target: self.key.to_string(),
        });
        Ok(Some(pending))
    }

    async fn process(&mut self, files: Vec<PathBuf>) -> Result<IterationResult, PipelineError> {
        let total = files.len();
        let mut published = 0;
        let mut dead_lettered = 0;

        for path in &files {
            if self.shutdown.is_cancelled() {
                info!(
                    target = %self.key,
                    remaining = total - published - dead_lettered,
                    "Shutdown requested, leaving remaining files in place"
                );
                self.router.flush().await.context(DlqSnafu)?;
                return Ok(IterationResult::Shutdown);
            }

            match self.handle_file(path).await {
                FileOutcome::Published => published += 1,
                FileOutcome::DeadLettered => dead_lettered += 1,
            }
        }

        self.router.flush().await.context(DlqSnafu)?;

        info!(
            target = %self.key,
            files = total,
            published,
            dead_lettered,
            "Iteration complete"
        );
        Ok(IterationResult::ProcessedItems)
    }
}
