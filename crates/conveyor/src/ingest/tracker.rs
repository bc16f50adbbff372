//! In-memory record of files this process must not pick up again.
//!
//! Normally a handled file leaves the watched directory. Two cases leave it
//! behind: the order was published but the file could not be removed, or
//! the file failed and could not be moved to the error directory. Both are
//! remembered here for the lifetime of the process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct HandledFiles {
    /// Published, but completion failed.
    consumed: HashSet<PathBuf>,
    /// Failed, and dead-lettering failed.
    quarantined: HashSet<PathBuf>,
}

impl HandledFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_consumed(&mut self, path: &Path) {
        self.consumed.insert(path.to_path_buf());
    }

    pub fn mark_quarantined(&mut self, path: &Path) {
        self.quarantined.insert(path.to_path_buf());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.consumed.contains(path) || self.quarantined.contains(path)
    }

    /// Drop entries for files that are no longer listed, so a new file
    /// reusing the name is processed normally.
    pub fn retain_listed(&mut self, listed: &[PathBuf]) {
        let listed: HashSet<&Path> = listed.iter().map(PathBuf::as_path).collect();
        self.consumed.retain(|p| listed.contains(p.as_path()));
        self.quarantined.retain(|p| listed.contains(p.as_path()));
    }

    /// Remove handled files from a listing.
    pub fn filter_pending(&self, listed: Vec<PathBuf>) -> Vec<PathBuf> {
        listed.into_iter().filter(|p| !self.contains(p)).collect()
    }

    pub fn len(&self) -> usize {
        self.consumed.len() + self.quarantined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
