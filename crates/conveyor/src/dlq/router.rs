//! Dead-letter router.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use chrono::Utc;
use snafu::prelude::*;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use conveyor_core::emit;
use conveyor_core::metrics::events::{FileDeadLettered, FileProcessed, FileStatus};

use super::types::{FailedFile, FailureStats};
use crate::error::{
    CreateDirSnafu, DlqError, IngestError, InvalidPathSnafu, MoveSnafu, SerializeSnafu,
    WriteSnafu,
};

/// Moves failed files into an error directory and records why.
///
/// Records are buffered and appended to `failures-<run timestamp>.ndjson`
/// inside the error directory on [`flush`](Self::flush).
pub struct DeadLetterRouter {
    error_dir: PathBuf,
    records_path: PathBuf,
    buffer: Vec<FailedFile>,
    stats: FailureStats,
    /// Route identifier for logs and metrics.
    target: String,
}

impl DeadLetterRouter {
    pub fn new(error_dir: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        let error_dir = error_dir.into();
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let records_path = error_dir.join(format!("failures-{timestamp}.ndjson"));

        Self {
            error_dir,
            records_path,
            buffer: Vec::new(),
            stats: FailureStats::default(),
            target: target.into(),
        }
    }

    pub fn error_dir(&self) -> &Path {
        &self.error_dir
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn stats(&self) -> &FailureStats {
        &self.stats
    }

    /// Records not yet written to disk.
    pub fn pending_records(&self) -> usize {
        self.buffer.len()
    }

    /// Move `path` into the error directory and record `error` against it.
    ///
    /// An existing file of the same name is never overwritten; the moved file
    /// gets a timestamp suffix instead. Returns the new location.
    pub async fn reroute(&mut self, path: &Path, error: &IngestError) -> Result<PathBuf, DlqError> {
        let file_name = path.file_name().context(InvalidPathSnafu { path })?;

        fs::create_dir_all(&self.error_dir)
            .await
            .context(CreateDirSnafu {
                path: &self.error_dir,
            })?;

        let destination = unique_destination(&self.error_dir, file_name).await;
        move_file(path, &destination).await?;

        let stage = error.stage();
        let kind = error.kind();
        error!(
            target = %self.target,
            file = %path.display(),
            dead_letter = %destination.display(),
            stage = stage.as_str(),
            kind = kind.as_str(),
            order_id = error.order_id().unwrap_or_default(),
            reason = %error,
            "File routed to error directory"
        );

        self.stats.increment(stage);
        self.buffer.push(FailedFile {
            source_path: path.display().to_string(),
            dead_letter_path: destination.display().to_string(),
            reason: error.to_string(),
            kind,
            stage,
            order_id: error.order_id().map(String::from),
            timestamp: Utc::now(),
        });

        emit!(FileDeadLettered {
            stage,
            target: self.target.clone(),
        });
        emit!(FileProcessed {
            status: FileStatus::DeadLettered,
            target: self.target.clone(),
        });

        Ok(destination)
    }

    /// Append buffered records to the run's NDJSON file.
    pub async fn flush(&mut self) -> Result<(), DlqError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut ndjson = String::new();
        for record in &self.buffer {
            let line = serde_json::to_string(record).context(SerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        fs::create_dir_all(&self.error_dir)
            .await
            .context(CreateDirSnafu {
                path: &self.error_dir,
            })?;

        let path = &self.records_path;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context(WriteSnafu { path })?;
        file.write_all(ndjson.as_bytes())
            .await
            .context(WriteSnafu { path })?;
        file.flush().await.context(WriteSnafu { path })?;

        debug!(
            target = %self.target,
            count = self.buffer.len(),
            path = %path.display(),
            "Flushed failure records"
        );
        self.buffer.clear();
        Ok(())
    }

    /// Flush remaining records and log a summary.
    pub async fn finalize(&mut self) -> Result<(), DlqError> {
        self.flush().await?;

        if self.stats.total() > 0 {
            info!(
                target = %self.target,
                total = self.stats.total(),
                read = self.stats.read,
                decode = self.stats.decode,
                validate = self.stats.validate,
                publish = self.stats.publish,
                records = %self.records_path.display(),
                "Dead-letter summary"
            );
        }
        Ok(())
    }
}

/// A path in `dir` named `file_name` that does not exist yet.
///
/// Taken names get a `.<timestamp>` suffix, then a counter.
pub(crate) async fn unique_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !exists(&candidate).await {
        return candidate;
    }

    let name = file_name.to_string_lossy();
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let mut attempt = 0u32;
    loop {
        let suffixed = match attempt {
            0 => format!("{name}.{stamp}"),
            n => format!("{name}.{stamp}-{n}"),
        };
        let candidate = dir.join(suffixed);
        if !exists(&candidate).await {
            return candidate;
        }
        attempt += 1;
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Rename `from` to `to`, falling back to copy and remove across filesystems.
pub(crate) async fn move_file(from: &Path, to: &Path) -> Result<(), DlqError> {
    if let Err(e) = fs::rename(from, to).await {
        debug!(error = %e, from = %from.display(), "Rename failed, copying instead");
        fs::copy(from, to).await.context(MoveSnafu { from, to })?;
        fs::remove_file(from).await.context(MoveSnafu { from, to })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::FailureKind;
    use crate::error::{CodecError, ValidationError};
    use conveyor_core::metrics::events::FailureStage;
    use tempfile::TempDir;

    fn invalid(order_id: &str) -> IngestError {
        IngestError::Invalid {
            order_id: Some(order_id.to_string()),
            source: ValidationError::NonPositiveAmount,
        }
    }

    fn malformed() -> IngestError {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        IngestError::DecodeFile {
            source: CodecError::Decode { source },
        }
    }

    #[tokio::test]
    async fn test_reroute_moves_file() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        let file = input.join("order-1.json");
        std::fs::write(&file, b"{").unwrap();

        let mut router = DeadLetterRouter::new(temp.path().join("error/orders"), "orders");
        let moved = router.reroute(&file, &malformed()).await.unwrap();

        assert!(!file.exists());
        assert_eq!(moved, temp.path().join("error/orders/order-1.json"));
        assert_eq!(std::fs::read(&moved).unwrap(), b"{");
        assert_eq!(router.stats().decode, 1);
        assert_eq!(router.pending_records(), 1);
    }

    #[tokio::test]
    async fn test_reroute_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let error_dir = temp.path().join("error");
        std::fs::create_dir_all(&error_dir).unwrap();
        std::fs::write(error_dir.join("same.json"), b"first").unwrap();

        let file = temp.path().join("same.json");
        std::fs::write(&file, b"second").unwrap();

        let mut router = DeadLetterRouter::new(&error_dir, "orders");
        let moved = router.reroute(&file, &invalid("O2")).await.unwrap();

        assert_ne!(moved, error_dir.join("same.json"));
        assert_eq!(std::fs::read(error_dir.join("same.json")).unwrap(), b"first");
        assert_eq!(std::fs::read(&moved).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_flush_appends_ndjson() {
        let temp = TempDir::new().unwrap();
        let mut router = DeadLetterRouter::new(temp.path().join("error"), "orders");

        for (name, err) in [("a.json", invalid("O2")), ("b.json", malformed())] {
            let file = temp.path().join(name);
            std::fs::write(&file, b"x").unwrap();
            router.reroute(&file, &err).await.unwrap();
        }
        router.finalize().await.unwrap();
        assert_eq!(router.pending_records(), 0);

        let contents = std::fs::read_to_string(router.records_path()).unwrap();
        let records: Vec<FailedFile> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, FailureKind::Validation);
        assert_eq!(records[0].stage, FailureStage::Validate);
        assert_eq!(records[0].order_id.as_deref(), Some("O2"));
        assert_eq!(records[0].reason, "Validation failed on 'amount': non-positive amount");
        assert_eq!(records[1].kind, FailureKind::Decode);
        assert_eq!(records[1].order_id, None);
    }

    #[tokio::test]
    async fn test_finalize_without_failures_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut router = DeadLetterRouter::new(temp.path().join("error"), "orders");
        router.finalize().await.unwrap();
        assert!(!router.records_path().exists());
    }

    #[tokio::test]
    async fn test_reroute_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let mut router = DeadLetterRouter::new(temp.path().join("error"), "orders");

        let err = router
            .reroute(&temp.path().join("gone.json"), &malformed())
            .await
            .unwrap_err();
        assert!(matches!(err, DlqError::Move { .. }));
        assert_eq!(router.stats().total(), 0);
    }
}
