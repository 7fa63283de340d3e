//! Data model shared across the pobox backend: the JSON frames spoken over
//! the `/game-control` WebSocket, the on-disk processed-invoice record, and
//! the identifier newtypes both are keyed by.
//!
//! Everything here is plain data. Field names on the wire and on disk are
//! camelCase; artifact bytes are carried as standard base64 strings via
//! [`base64_blob`].

/// Serde helper: `Vec<u8>` as a standard base64 string.
pub mod base64_blob;
/// Inbound and outbound WebSocket frames.
pub mod frames;
/// Game lifecycle status.
pub mod game;
/// Order payloads carried through the core without interpretation.
pub mod order;
/// The on-disk processed-invoice record.
pub mod record;
/// Identifier newtypes.
pub mod types;

pub use frames::{AdminFrame, ClientFrame, Inbound, ServerFrame};
pub use game::{GameState, GameStatus};
pub use record::{InvoiceRecord, S3Metadata};
pub use types::{PlayerId, PoNumber};
