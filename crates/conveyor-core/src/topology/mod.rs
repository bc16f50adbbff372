//! Component orchestration.
//!
//! A process runs several long-lived components (one ingester per route plus
//! the queue consumer). They share a cancellation token so that a signal
//! stops all of them, and their start times are staggered by jitter.

mod runner;

pub use runner::{
    Component, ComponentContext, ComponentRunner, RunSummary, random_jitter, run_components,
};
