//! conveyor: relays order documents from watched directories to a queue.
//!
//! - `order` - Order model, canonical JSON codec and validation
//! - `broker` - Broker abstraction, connection pool, in-process and NATS backends
//! - `publish` - Timed publishing through the pool
//! - `ingest` - Directory polling and the per-file pipeline
//! - `dlq` - Dead-letter routing of rejected files
//! - `consume` - Queue workers and order handlers
//! - `intake` - Order creation and file drop
//! - `service` / `cli` - Component wiring and the command line

pub mod broker;
pub mod cli;
pub mod config;
pub mod consume;
pub mod dlq;
pub mod error;
pub mod ingest;
pub mod intake;
pub mod order;
pub mod publish;
pub mod service;

pub use cli::{Cli, Command};
pub use config::Config;
pub use error::PipelineError;
pub use order::{Order, OrderStatus};
pub use service::Service;

pub use conveyor_core::{LogFormat, init_tracing};
