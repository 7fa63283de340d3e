use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    game::{GameState, GameStatus},
    order::{OrderData, OrderMeta},
    record::S3Metadata,
    types::{PlayerId, PoNumber},
};

/// Everything a client may send over `/game-control`.
///
/// Almost all frames are dispatched on their `type` field
/// ([`ClientFrame`]); the admin panel predates that convention and sends a
/// bare `{command, source}` object, so inbound text is first parsed into
/// this untagged wrapper. Order matters: a frame carrying both shapes
/// resolves as typed.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Typed(ClientFrame),
    Admin(AdminFrame),
}

impl Inbound {
    /// Parse an inbound JSON value. `None` means the frame is not ours to
    /// understand and must be ignored (malformed JSON is handled upstream).
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// Client frames dispatched on `type`. Unrecognized types land in
/// [`ClientFrame::Unknown`] and are ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Register this connection under a player id.
    #[serde(rename = "register", rename_all = "camelCase")]
    Register { user_id: PlayerId },

    /// Announce a PO number whose invoice artifact should be watched for.
    /// Arrives over the inter-service channel from the REST surface.
    #[serde(rename = "register_expected_invoice", rename_all = "camelCase")]
    RegisterExpectedInvoice {
        invoice_number: PoNumber,
        player_id: PlayerId,
        #[serde(default)]
        user_id: Option<PlayerId>,
        #[serde(default)]
        order_data: OrderMeta,
    },

    /// Ask for the full PDF of an already-processed invoice.
    #[serde(rename = "request_invoice", rename_all = "camelCase")]
    RequestInvoice { invoice_number: PoNumber },

    /// Game lifecycle event; `game_over` is forwarded to the external sink,
    /// `start`/`pause`/`end` update and broadcast the game status.
    #[serde(rename = "game_event")]
    GameEvent { event: String },

    /// Place an order; the nested payload goes to the order sink.
    #[serde(rename = "order")]
    Order { data: OrderData },

    /// Direct message to another registered player.
    #[serde(rename = "send-to", rename_all = "camelCase")]
    SendTo { target_user_id: PlayerId, message: Value },

    #[serde(other)]
    Unknown,
}

/// The admin panel's `{command, source}` frame. Only honored when `source`
/// is `admin-panel`.
#[derive(Clone, Debug, Deserialize)]
pub struct AdminFrame {
    pub command: AdminCommand,
    pub source: String,
}

impl AdminFrame {
    pub const ADMIN_SOURCE: &'static str = "admin-panel";

    pub fn is_authorized(&self) -> bool {
        self.source == Self::ADMIN_SOURCE
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminCommand {
    Start,
    Pause,
    End,
    /// Reset for a fresh game; lands the status back on `start`.
    New,
}

impl AdminCommand {
    pub fn game_state(self) -> GameState {
        match self {
            Self::Start | Self::New => GameState::Start,
            Self::Pause => GameState::Pause,
            Self::End => GameState::End,
        }
    }
}

/// Everything the server sends. Serialized with a `type` tag matching the
/// inbound convention.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// First frame on every new connection.
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome {
        message: String,
        available_commands: Vec<String>,
    },

    /// Game status fan-out (also sent right after `welcome` and after
    /// `register_response`).
    #[serde(rename = "game_status", rename_all = "camelCase")]
    GameStatus {
        status: GameState,
        last_updated: DateTime<Utc>,
        updated_by: String,
    },

    #[serde(rename = "register_response", rename_all = "camelCase")]
    RegisterResponse {
        status: String,
        user_id: PlayerId,
        message: String,
    },

    #[serde(rename = "register_expected_invoice_response")]
    #[serde(rename_all = "camelCase")]
    RegisterExpectedInvoiceResponse {
        status: String,
        invoice_number: PoNumber,
        player_id: PlayerId,
        message: String,
    },

    /// Notification that an invoice artifact has been persisted and can be
    /// requested. Deliberately carries no bytes.
    #[serde(rename = "invoice_ready", rename_all = "camelCase")]
    InvoiceReady {
        invoice_number: PoNumber,
        filename: String,
        file_size: u64,
        processed_at: DateTime<Utc>,
        message: String,
    },

    /// The full artifact, in response to `request_invoice`.
    #[serde(rename = "invoice_pdf", rename_all = "camelCase")]
    InvoicePdf {
        status: String,
        invoice_number: PoNumber,
        filename: String,
        mime_type: String,
        #[serde(rename = "base64Data", with = "crate::base64_blob")]
        data: Vec<u8>,
        file_size: u64,
        processed_at: DateTime<Utc>,
        s3_metadata: S3Metadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<Value>,
    },

    /// Retrieval failure for `request_invoice`.
    #[serde(rename = "invoice_response", rename_all = "camelCase")]
    InvoiceResponse {
        status: String,
        invoice_number: PoNumber,
        message: String,
    },

    /// Relayed outcome of an `order` frame.
    #[serde(rename = "order_response", rename_all = "camelCase")]
    OrderResponse {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A `send-to` payload, as seen by the target.
    #[serde(rename = "direct_message", rename_all = "camelCase")]
    DirectMessage {
        from_user_id: PlayerId,
        message: Value,
    },

    /// Ack to the sender of a `send-to`.
    #[serde(rename = "send_response", rename_all = "camelCase")]
    SendResponse {
        status: String,
        target_user_id: PlayerId,
        message: String,
    },
}

impl ServerFrame {
    pub const STATUS_SUCCESS: &'static str = "success";
    pub const STATUS_ERROR: &'static str = "error";

    pub fn game_status(status: &GameStatus) -> Self {
        Self::GameStatus {
            status: status.status,
            last_updated: status.last_updated,
            updated_by: status.updated_by.clone(),
        }
    }

    /// Serialize to the JSON text put on the socket.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .expect("server frames always serialize")
    }
}
