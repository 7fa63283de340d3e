use std::time::Duration;

use anyhow::Context;
use pobox_api::order::OrderData;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The two external HTTP endpoints the session layer forwards into:
/// `POST /game-over` and `POST /process-order`. Bodies pass through
/// unchanged; responses come back as raw JSON for the caller to relay.
pub struct GameSinks {
    http: reqwest::Client,
    base_url: String,
}

impl GameSinks {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("could not build sink http client")?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }

    /// Forward a game-over payload verbatim. Fire-and-forget from the
    /// client's perspective; failures are the caller's to log.
    pub async fn game_over(&self, payload: &Value) -> Result<(), SinkError> {
        debug!("forwarding game-over event");
        self.http
            .post(format!("{}/game-over", self.base_url))
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Forward an order payload and return the sink's JSON response
    /// (which carries the `orderId` echoed back to the client).
    pub async fn process_order(
        &self,
        order: &OrderData,
    ) -> Result<Value, SinkError> {
        debug!("forwarding order for {}", order.customer_email);
        let response = self
            .http
            .post(format!("{}/process-order", self.base_url))
            .json(order)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(response)
    }
}
