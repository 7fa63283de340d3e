//! Reconnecting WebSocket client for the inter-service control channel.
//!
//! The REST surface uses this to reach the game-control endpoint: it
//! registers itself, announces expected invoices, and relays order acks.
//! The connection is treated as unreliable plumbing: the client owns a
//! background task that reconnects with capped exponential backoff, queues
//! outbound messages while disconnected and flushes them in order on
//! (re)connect, and keeps the link honest with heartbeat pings: two pings
//! with no pong in between force a reconnect.
//!
//! Consumers subscribe to lifecycle and traffic through a single event
//! channel handed out at spawn time; there is nothing to poll and no
//! callback registry.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpStream, sync::mpsc, time};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use pobox_tokio::{backoff, NamedTask, ShutdownSignal};

/// Pings with no intervening pong before the link is declared dead.
const MAX_UNANSWERED_PINGS: u8 = 2;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Full endpoint URL, e.g. `ws://127.0.0.1:8080/game-control`.
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_cap: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_initial: Duration::from_millis(250),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

/// What the background task reports back to its owner.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// A JSON frame from the server.
    Message(Value),
}

/// Handle to the control-channel task.
pub struct ControlClient {
    msg_tx: mpsc::UnboundedSender<Value>,
    shutdown: ShutdownSignal,
    task: NamedTask<()>,
}

impl ControlClient {
    /// Spawn the connection task. Events (connects, disconnects, inbound
    /// frames) arrive on the returned receiver.
    pub fn spawn(
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = ShutdownSignal::new();
        let task = NamedTask::spawn(
            "control client",
            run(config, msg_rx, event_tx, shutdown.clone()),
        );
        (
            Self {
                msg_tx,
                shutdown,
                task,
            },
            event_rx,
        )
    }

    /// Enqueue a JSON frame. Queued messages survive disconnects and are
    /// flushed in order; they are only lost on [`close`](Self::close).
    /// Returns `false` after close.
    pub fn send(&self, message: Value) -> bool {
        self.msg_tx.send(message).is_ok()
    }

    /// Stop the task, dropping anything still queued.
    pub async fn close(self) {
        self.shutdown.send();
        let _ = self.task.await;
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run(
    config: ClientConfig,
    mut msg_rx: mpsc::UnboundedReceiver<Value>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    shutdown: ShutdownSignal,
) {
    // A message that died mid-send goes out first after reconnecting, so
    // ordering holds across connection generations.
    let mut resend: Option<Value> = None;

    loop {
        let Some(stream) = connect_with_backoff(&config, &shutdown).await
        else {
            return; // shutdown while disconnected
        };
        info!("control channel connected to {}", config.url);
        let _ = event_tx.send(ClientEvent::Connected);
        let (mut sink, mut stream) = stream.split();

        if let Some(value) = resend.take() {
            if let Err(err) =
                sink.send(Message::Text(value.to_string().into())).await
            {
                warn!("flush after reconnect failed: {err}");
                resend = Some(value);
                let _ = event_tx.send(ClientEvent::Disconnected);
                continue;
            }
        }

        let mut heartbeat = time::interval(config.heartbeat_interval);
        heartbeat
            .set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut unanswered_pings: u8 = 0;

        loop {
            tokio::select! {
                () = shutdown.recv() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                outbound = msg_rx.recv() => {
                    // All handles dropped means nothing more will ever be
                    // sent; wind the task down.
                    let Some(value) = outbound else {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    };
                    if let Err(err) = sink
                        .send(Message::Text(value.to_string().into()))
                        .await
                    {
                        warn!("control send failed, reconnecting: {err}");
                        resend = Some(value);
                        break;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Pong(_))) => unanswered_pings = 0,
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(text.as_str()) {
                            Ok(value) => {
                                let _ = event_tx
                                    .send(ClientEvent::Message(value));
                            }
                            Err(err) =>
                                debug!("non-JSON frame ignored: {err}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("server closed the control channel");
                        break;
                    }
                    Some(Ok(_)) => (),
                    Some(Err(err)) => {
                        warn!("control channel error: {err}");
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if unanswered_pings >= MAX_UNANSWERED_PINGS {
                        warn!(
                            "{unanswered_pings} pings unanswered, \
                             reconnecting",
                        );
                        break;
                    }
                    if sink
                        .send(Message::Ping(Default::default()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    unanswered_pings += 1;
                }
            }
        }

        let _ = event_tx.send(ClientEvent::Disconnected);
    }
}

/// Dial until it works, sleeping the backoff schedule between attempts.
/// `None` means shutdown fired first.
async fn connect_with_backoff(
    config: &ClientConfig,
    shutdown: &ShutdownSignal,
) -> Option<WsStream> {
    let mut waits = backoff::capped_exponential(
        config.reconnect_initial,
        config.reconnect_cap,
    );
    loop {
        if shutdown.fired() {
            return None;
        }
        match connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => return Some(stream),
            Err(err) => {
                let wait = waits.next().unwrap_or(config.reconnect_cap);
                debug!(
                    "connect to {} failed ({err}); retrying in {wait:?}",
                    config.url,
                );
                tokio::select! {
                    () = shutdown.recv() => return None,
                    _ = time::sleep(wait) => (),
                }
            }
        }
    }
}
