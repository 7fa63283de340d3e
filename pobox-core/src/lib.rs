//! The invoice delivery core: the expected-invoice registry, the bucket
//! polling engine, and the session router serving `/game-control`.
//!
//! The three subsystems share state and jointly uphold the at-most-once
//! delivery story: the registry admits a PO number exactly once at a time,
//! the poller processes each artifact once (the on-disk store is the dedup
//! ledger), and the router delivers `invoice_ready` to whichever session
//! currently owns the player id. Wiring them together is the binary's job;
//! everything here takes its collaborators as explicit arguments.

/// Frame dispatch for `/game-control`.
pub mod handlers;
/// PO number extraction from object keys.
pub mod pattern;
/// Bucket polling engine (C4).
pub mod poller;
/// Expected-invoice registry (C3).
pub mod registry;
/// Session router, fan-out, and delivery (C5).
pub mod router;
/// The axum WebSocket endpoint and per-connection loop.
pub mod server;
/// External HTTP sinks (game-over, process-order).
pub mod sinks;

pub use poller::{DeliveryHook, MaxRetries, Poller, PollerConfig};
pub use registry::{ExpectedInvoice, ExpectedInvoices};
pub use router::{SessionId, SessionRouter};
pub use server::ControlState;
pub use sinks::GameSinks;
