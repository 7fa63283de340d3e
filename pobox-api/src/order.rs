use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The order payload inside an `order` frame, forwarded verbatim to the
/// order-processing sink. Only `items` is inspected (for the item count
/// echoed back in `order_response`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub customer_name: String,
    pub customer_email: String,
    pub items: Vec<OrderItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
}

/// Order metadata announced alongside an expected invoice. Carried
/// end-to-end without interpretation; `summary` in particular is handed
/// back untouched in `invoice_pdf`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}
