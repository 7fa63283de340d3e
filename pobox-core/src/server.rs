use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::any,
    Router,
};
use futures::{SinkExt, StreamExt};
use pobox_api::ServerFrame;
use pobox_store::InvoiceStore;
use pobox_tokio::{NamedTask, ShutdownSignal};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::{
    handlers, registry::ExpectedInvoices, router::SessionRouter,
    sinks::GameSinks,
};

/// Collaborators shared by every `/game-control` connection. Built once at
/// process init and injected; nothing in here is a global.
pub struct ControlState {
    pub router: Arc<SessionRouter>,
    pub registry: Arc<ExpectedInvoices>,
    pub store: Arc<InvoiceStore>,
    pub sinks: Arc<GameSinks>,
    pub shutdown: ShutdownSignal,
}

/// The WebSocket control surface: a single route, upgraded per
/// connection.
pub fn game_control_router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/game-control", any(ws_upgrade))
        .with_state(state)
}

/// Serve `/game-control` on `listener` until shutdown. Graceful: the
/// listener stops accepting, open connections observe the signal and
/// close, then the server future resolves.
pub fn spawn_server(
    listener: TcpListener,
    state: Arc<ControlState>,
) -> NamedTask<()> {
    let shutdown = state.shutdown.clone();
    NamedTask::spawn("game-control server", async move {
        match listener.local_addr() {
            Ok(addr) => info!("game control listening on ws://{addr}/game-control"),
            Err(_) => info!("game control listening"),
        }
        let app = game_control_router(state);
        let graceful = async move { shutdown.recv().await };
        if let Err(err) =
            axum::serve(listener, app).with_graceful_shutdown(graceful).await
        {
            error!("game-control server failed: {err}");
        }
    })
}

async fn ws_upgrade(
    State(state): State<Arc<ControlState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection(socket, state))
}

/// One connection's lifetime: welcome, read loop, teardown.
async fn connection(socket: WebSocket, state: Arc<ControlState>) {
    let (session, mut outbound) = state.router.connect();

    // Welcome and the current game status go out before any inbound
    // frame is processed.
    state.router.send(session, welcome());
    state.router.send(
        session,
        ServerFrame::game_status(&state.router.game_status()),
    );

    let (mut sink, mut stream) = socket.split();

    // Writer: drains this session's outbound queue onto the socket. Ends
    // when the queue closes (teardown) or the socket dies.
    let writer = NamedTask::spawn(format!("{session} writer"), async move {
        while let Some(frame) = outbound.recv().await {
            let message = Message::Text(frame.to_json().into());
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            () = shutdown.recv() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) =>
                    handlers::handle_text(&state, session, text.as_str())
                        .await,
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by the protocol layer; binary frames
                // are not part of this protocol.
                Some(Ok(_)) => (),
                Some(Err(err)) => {
                    debug!("{session}: socket error: {err}");
                    break;
                }
            },
        }
    }

    state.router.disconnect(session);
    // disconnect() dropped the queue sender; the writer drains what's
    // left and exits on its own.
    let _ = writer.await;
}

fn welcome() -> ServerFrame {
    ServerFrame::Welcome {
        message: "Connected to pobox game control".to_owned(),
        available_commands: [
            "register",
            "register_expected_invoice",
            "request_invoice",
            "game_event",
            "order",
            "send-to",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect(),
    }
}
