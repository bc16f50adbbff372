//! Dead-letter routing for files the ingester cannot handle.
//!
//! Failed files are moved into the route's error directory, never deleted
//! and never retried. Each failure is also recorded as an NDJSON line next
//! to the moved files for operator triage.

mod router;
mod types;

pub(crate) use router::{move_file, unique_destination};
pub use router::DeadLetterRouter;
pub use types::{FailedFile, FailureKind, FailureStats};
