//! End-to-end tests over real sockets: the axum `/game-control` endpoint
//! serving a raw WebSocket player on one side and the inter-service
//! control client on the other, with the polling engine in between.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pobox_api::{PoNumber, ServerFrame};
use pobox_client::{ClientConfig, ClientEvent, ControlClient};
use pobox_core::{
    server, ControlState, DeliveryHook, ExpectedInvoices, GameSinks,
    MaxRetries, Poller, PollerConfig, SessionRouter,
};
use pobox_s3::{BucketError, ObjectInfo, ObjectStore};
use pobox_store::InvoiceStore;
use pobox_tokio::ShutdownSignal;
use serde_json::json;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

const WAIT: Duration = Duration::from_secs(5);

struct OneObjectBucket {
    info: ObjectInfo,
    bytes: Bytes,
}

impl OneObjectBucket {
    fn new(key: &str, bytes: &[u8]) -> Self {
        Self {
            info: ObjectInfo {
                key: key.to_owned(),
                size: bytes.len() as u64,
                last_modified: "2026-01-05T12:00:00Z".to_owned(),
                etag: "\"e2e\"".to_owned(),
            },
            bytes: Bytes::copy_from_slice(bytes),
        }
    }
}

#[async_trait]
impl ObjectStore for OneObjectBucket {
    async fn list(&self) -> Result<Vec<ObjectInfo>, BucketError> {
        Ok(vec![self.info.clone()])
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, BucketError> {
        if key == self.info.key {
            Ok(self.bytes.clone())
        } else {
            Err(BucketError::NotFound(key.to_owned()))
        }
    }
}

struct Server {
    state: Arc<ControlState>,
    shutdown: ShutdownSignal,
    url: String,
    task: pobox_tokio::NamedTask<()>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> Server {
    pobox_logger::init_for_testing();
    let dir = tempfile::tempdir().unwrap();
    let shutdown = ShutdownSignal::new();
    let state = Arc::new(ControlState {
        router: Arc::new(SessionRouter::new()),
        registry: Arc::new(ExpectedInvoices::new()),
        store: Arc::new(
            InvoiceStore::open(dir.path().to_path_buf()).unwrap(),
        ),
        sinks: Arc::new(
            GameSinks::new("http://127.0.0.1:9", Duration::from_millis(500))
                .unwrap(),
        ),
        shutdown: shutdown.clone(),
    });
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!(
        "ws://{}/game-control",
        listener.local_addr().unwrap(),
    );
    let task = server::spawn_server(listener, state.clone());
    Server {
        state,
        shutdown,
        url,
        task,
        _dir: dir,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_frame(socket: &mut Socket) -> ServerFrame {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket errored");
        match message {
            Message::Text(text) =>
                return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn send_json(socket: &mut Socket, frame: serde_json::Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Connect a player socket, eat the welcome sequence, register.
async fn connect_player(url: &str, name: &str) -> Socket {
    let (mut socket, _response) = connect_async(url).await.unwrap();
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::Welcome { .. },
    ));
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::GameStatus { .. },
    ));

    send_json(&mut socket, json!({ "type": "register", "userId": name }))
        .await;
    match next_frame(&mut socket).await {
        ServerFrame::RegisterResponse { status, .. } =>
            assert_eq!(status, "success"),
        other => panic!("expected register_response, got {other:?}"),
    }
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::GameStatus { .. },
    ));
    socket
}

#[tokio::test]
async fn welcome_precedes_everything_else() {
    let server = start_server().await;
    let (mut socket, _response) =
        connect_async(&server.url).await.unwrap();

    match next_frame(&mut socket).await {
        ServerFrame::Welcome {
            available_commands, ..
        } => assert!(
            available_commands.contains(&"request_invoice".to_owned()),
        ),
        other => panic!("expected welcome first, got {other:?}"),
    }
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::GameStatus { .. },
    ));

    server.shutdown.send();
    let _ = server.task.await;
}

#[tokio::test]
async fn invoice_flows_end_to_end_over_real_sockets() {
    let server = start_server().await;

    // The player holds a plain WebSocket.
    let mut player = connect_player(&server.url, "alice").await;

    // The REST surface reaches us through the reconnecting control
    // client.
    let (service, mut service_events) =
        ControlClient::spawn(ClientConfig::new(server.url.clone()));
    service.send(json!({ "type": "register", "userId": "rest-surface" }));
    service.send(json!({
        "type": "register_expected_invoice",
        "userId": "rest-surface",
        "invoiceNumber": "1030",
        "playerId": "alice",
        "orderData": { "summary": { "total": 50 } },
    }));

    // The acknowledgment comes back over the service channel.
    let ack = timeout(WAIT, async {
        loop {
            match service_events.recv().await {
                Some(ClientEvent::Message(value))
                    if value["type"]
                        == "register_expected_invoice_response" =>
                    break value,
                Some(_) => continue,
                None => panic!("service events closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["invoiceNumber"], "1030");

    // The artifact lands in the bucket; one scan picks it up.
    let poller = Poller::new(
        Arc::new(OneObjectBucket::new("invoice_1030.pdf", b"%PDF-1.4\n")),
        server.state.store.clone(),
        server.state.registry.clone(),
        server.state.router.clone() as Arc<dyn DeliveryHook>,
        PollerConfig {
            poll_interval: Duration::from_secs(10),
            max_retries: MaxRetries::Unlimited,
        },
    );
    poller.tick().await;

    match next_frame(&mut player).await {
        ServerFrame::InvoiceReady { invoice_number, .. } =>
            assert_eq!(invoice_number, PoNumber::from("1030")),
        other => panic!("expected invoice_ready, got {other:?}"),
    }

    send_json(
        &mut player,
        json!({ "type": "request_invoice", "invoiceNumber": "1030" }),
    )
    .await;
    match next_frame(&mut player).await {
        ServerFrame::InvoicePdf { data, summary, .. } => {
            assert_eq!(data, b"%PDF-1.4\n");
            assert_eq!(summary.unwrap()["total"], 50);
        }
        other => panic!("expected invoice_pdf, got {other:?}"),
    }

    service.close().await;
    server.shutdown.send();
    let _ = server.task.await;
}

#[tokio::test]
async fn broadcasts_reach_every_connected_socket() {
    let server = start_server().await;
    let mut alice = connect_player(&server.url, "alice").await;
    let mut bob = connect_player(&server.url, "bob").await;

    send_json(&mut alice, json!({ "type": "game_event", "event": "pause" }))
        .await;

    for socket in [&mut alice, &mut bob] {
        match next_frame(socket).await {
            ServerFrame::GameStatus {
                status, updated_by, ..
            } => {
                assert_eq!(status.to_string(), "pause");
                assert_eq!(updated_by, "alice");
            }
            other => panic!("expected game_status, got {other:?}"),
        }
    }

    server.shutdown.send();
    let _ = server.task.await;
}

#[tokio::test]
async fn shutdown_closes_the_listener_and_sessions() {
    let server = start_server().await;
    let mut player = connect_player(&server.url, "alice").await;

    server.shutdown.send();
    timeout(WAIT, server.task)
        .await
        .expect("server did not stop")
        .expect("server task failed");

    // The player's stream ends (close frame or EOF) shortly after.
    let ended = timeout(WAIT, async {
        loop {
            match player.next().await {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) =>
                    break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "player socket never closed");

    // New connections are refused.
    assert!(connect_async(&server.url).await.is_err());
}
