use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use forum_server::{
    auth::jwt::JwtTokenVerifier,
    build_router,
    chat::{
        events::TracingEventSink, store::StoreFuture, ChatHub, ChatState, MemoryMessageStore,
        MessageStore,
    },
    metrics::ChatMetrics,
};
use forum_common::types::{ChatMessage, NewChatMessage};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const SECRET: &str = "forum_integration_secret_that_is_long_enough";

struct TestServer {
    addr: std::net::SocketAddr,
    app: Router,
    hub: Arc<ChatHub>,
    store: Arc<MemoryMessageStore>,
    verifier: JwtTokenVerifier,
    task: JoinHandle<()>,
}

/// Delegates to the memory store but panics while saving the text "boom".
struct PanickingStore {
    inner: Arc<MemoryMessageStore>,
}

impl MessageStore for PanickingStore {
    fn save<'a>(&'a self, message: &'a NewChatMessage) -> StoreFuture<'a, ChatMessage> {
        if message.content == "boom" {
            panic!("store blew up while saving");
        }
        self.inner.save(message)
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<ChatMessage>> {
        self.inner.list_all()
    }

    fn delete_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> StoreFuture<'_, u64> {
        self.inner.delete_older_than(cutoff)
    }
}

async fn spawn_server() -> TestServer {
    let store = Arc::new(MemoryMessageStore::new());
    spawn_server_with(store.clone(), store).await
}

async fn spawn_server_with(
    hub_store: Arc<dyn MessageStore>,
    store: Arc<MemoryMessageStore>,
) -> TestServer {
    let metrics = Arc::new(ChatMetrics::default());
    let events = Arc::new(TracingEventSink::new(metrics.clone()));
    let hub = Arc::new(ChatHub::new(hub_store, events, chrono::Duration::hours(24)));
    let verifier = JwtTokenVerifier::new(SECRET).expect("verifier should initialize");

    let state = ChatState {
        hub: hub.clone(),
        verifier: Arc::new(verifier.clone()),
        guest_username: Arc::from("guest-marker"),
        max_frame_bytes: 64 * 1024,
    };
    let app = build_router(state, metrics, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let served = app.clone();
    let task = tokio::spawn(async move {
        axum::serve(listener, served).await.expect("forum server should run");
    });

    TestServer { addr, app, hub, store, verifier, task }
}

async fn connect(server: &TestServer, token: Option<&str>) -> ClientSocket {
    let url = match token {
        Some(token) => format!("ws://{}/chat?token={token}", server.addr),
        None => format!("ws://{}/chat", server.addr),
    };
    let (socket, response) = connect_async(url).await.expect("client should connect");
    assert_eq!(response.status().as_u16(), 101);
    socket
}

async fn wait_for_connections(hub: &ChatHub, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while hub.connection_count().await != expected {
        assert!(Instant::now() < deadline, "hub never reached {expected} connections");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn recv_json(socket: &mut ClientSocket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame should arrive before timeout")
            .expect("socket should stay open")
            .expect("frame should be readable");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("server frame should be json");
        }
    }
}

async fn expect_closed(socket: &mut ClientSocket) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, socket.next()).await {
            Err(_) => panic!("server never closed the socket"),
            Ok(None | Some(Err(_)) | Some(Ok(WsMessage::Close(_)))) => return,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

fn expect_rejected(result: Result<impl Sized, WsError>, status: u16) {
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), status),
        Err(other) => panic!("expected HTTP {status} rejection, got {other}"),
        Ok(_) => panic!("expected HTTP {status} rejection, upgrade succeeded"),
    }
}

#[tokio::test]
async fn authenticated_and_guest_clients_share_one_room() {
    let server = spawn_server().await;
    let token = server.verifier.issue_token(1, "alice").expect("token should be issued");

    let mut alice = connect(&server, Some(&token)).await;
    let mut guest = connect(&server, None).await;
    wait_for_connections(&server.hub, 2).await;

    alice.send(WsMessage::Text("hi".into())).await.expect("alice should send");
    let expected = json!({ "username": "alice", "content": "hi" });
    assert_eq!(recv_json(&mut alice).await, expected);
    assert_eq!(recv_json(&mut guest).await, expected);

    guest.send(WsMessage::Text("yo".into())).await.expect("guest should send");
    let expected = json!({ "username": "guest-marker", "content": "yo" });
    assert_eq!(recv_json(&mut alice).await, expected);
    assert_eq!(recv_json(&mut guest).await, expected);

    let saved = server.store.messages();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].user_id, 1);
    assert_eq!(saved[0].content, "hi");

    let response = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/chat/messages").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listed: Value = serde_json::from_slice(&body).expect("listing should be json");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["username"], "alice");
    assert_eq!(listed[0]["content"], "hi");

    let _ = alice.close(None).await;
    let _ = guest.close(None).await;
    server.task.abort();
}

#[tokio::test]
async fn invalid_token_is_rejected_before_upgrade() {
    let server = spawn_server().await;

    let result = connect_async(format!("ws://{}/chat?token=not-a-jwt", server.addr)).await;

    expect_rejected(result, 401);
    assert_eq!(server.hub.connection_count().await, 0);
    server.task.abort();
}

#[tokio::test]
async fn token_without_user_id_is_rejected() {
    let server = spawn_server().await;
    let exp = chrono::Utc::now().timestamp() + 600;
    let token = encode(
        &Header::new(Algorithm::HS256),
        &json!({ "username": "mallory", "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token should encode");

    let result = connect_async(format!("ws://{}/chat?token={token}", server.addr)).await;

    expect_rejected(result, 401);
    assert_eq!(server.hub.connection_count().await, 0);
    server.task.abort();
}

#[tokio::test]
async fn closed_client_is_unregistered_and_others_keep_receiving() {
    let server = spawn_server().await;
    let token = server.verifier.issue_token(2, "bob").expect("token should be issued");

    let mut leaving = connect(&server, None).await;
    let mut staying = connect(&server, Some(&token)).await;
    wait_for_connections(&server.hub, 2).await;

    leaving.close(None).await.expect("client should close cleanly");
    wait_for_connections(&server.hub, 1).await;

    staying.send(WsMessage::Text("still here".into())).await.expect("bob should send");
    assert_eq!(
        recv_json(&mut staying).await,
        json!({ "username": "bob", "content": "still here" })
    );

    let _ = staying.close(None).await;
    wait_for_connections(&server.hub, 0).await;
    server.task.abort();
}

#[tokio::test]
async fn panic_in_one_connection_closes_only_that_connection() {
    let memory = Arc::new(MemoryMessageStore::new());
    let store = Arc::new(PanickingStore { inner: memory.clone() });
    let server = spawn_server_with(store, memory).await;
    let alice_token = server.verifier.issue_token(1, "alice").expect("token should be issued");
    let bob_token = server.verifier.issue_token(2, "bob").expect("token should be issued");

    let mut alice = connect(&server, Some(&alice_token)).await;
    let mut bob = connect(&server, Some(&bob_token)).await;
    wait_for_connections(&server.hub, 2).await;

    alice.send(WsMessage::Text("boom".into())).await.expect("alice should send");
    wait_for_connections(&server.hub, 1).await;
    expect_closed(&mut alice).await;

    bob.send(WsMessage::Text("ok".into())).await.expect("bob should send");
    assert_eq!(recv_json(&mut bob).await, json!({ "username": "bob", "content": "ok" }));

    let saved = server.store.messages();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].content, "ok");

    let _ = bob.close(None).await;
    wait_for_connections(&server.hub, 0).await;
    server.task.abort();
}
