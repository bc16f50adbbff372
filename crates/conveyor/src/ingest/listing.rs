//! Watched directory listing.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::trace;

/// List candidate files in `dir`, sorted by name.
///
/// Only regular files directly inside `dir` are returned. Hidden files
/// (leading `.`) are skipped, as are files modified less than `min_age` ago,
/// which may still be being written.
pub async fn list_candidates(dir: &Path, min_age: Duration) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let now = SystemTime::now();
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        // Follows symlinks, so a link to a regular file counts.
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            // Removed between read_dir and metadata.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }

        if !min_age.is_zero()
            && let Ok(modified) = metadata.modified()
            && now.duration_since(modified).unwrap_or_default() < min_age
        {
            trace!(file = %path.display(), "Skipping file younger than minimum age");
            continue;
        }

        files.push(path);
    }

    files.sort();
    Ok(files)
}
