//! Tokio-flavored building blocks shared by every pobox service crate:
//! named tasks, shutdown signalling, and backoff timing.

/// Capped exponential backoff iterators.
pub mod backoff;
/// Multi-producer multi-consumer one-shot shutdown signal.
pub mod shutdown;
/// Named task handles which propagate panics.
pub mod task;

pub use shutdown::ShutdownSignal;
pub use task::NamedTask;
