//! End-to-end tests for notes-sync-daemon.
//!
//! Runs the REST remote, the realtime feed and a full sync session against a
//! minimal fake backend on localhost.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use notes_sync_core::{
    EntityKind, Note, OwnerId, RecordStore, RemoteDataService, RemoteError, SessionDeps,
    SyncConfig, SyncSession, TodoList,
};
use notes_sync_daemon::{
    HttpRemote, JsonFileStore, JsonRecordStore, RealtimeClient, persisting_callbacks,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

// ============================================================================
// Fake REST backend
// ============================================================================

/// A request as seen by the fake backend.
#[derive(Debug, Clone)]
struct CapturedRequest {
    /// e.g. `GET /rest/v1/notes?select=*&user_id=eq.user-1&order=order.asc HTTP/1.1`
    request_line: String,
    /// Lower-cased header lines.
    headers: Vec<String>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.headers
            .iter()
            .find(|h| h.starts_with(&prefix))
            .map(|h| h[prefix.len()..].trim())
    }
}

type Responder = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

/// HTTP server answering every request through `respond(request_line)`.
struct FakeBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl FakeBackend {
    async fn start(respond: impl Fn(&str) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let requests_clone = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let requests = Arc::clone(&requests_clone);
                let respond = Arc::clone(&respond);
                tokio::spawn(async move {
                    if let Some(request) = handle_http(stream, respond).await {
                        requests.lock().unwrap().push(request);
                    }
                });
            }
        });

        Self { addr, requests }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle_http(mut stream: TcpStream, respond: Responder) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next()?.to_string();
    let headers: Vec<String> = lines.map(|l| l.to_ascii_lowercase()).collect();

    let content_length = headers
        .iter()
        .find_map(|h| h.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let (status, response_body) = respond(&request_line);
    let response = format!(
        "HTTP/1.1 {} Fake\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        response_body.len(),
        response_body
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    let _ = stream.shutdown().await;

    Some(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

fn owner() -> OwnerId {
    OwnerId::new("user-1").unwrap()
}

fn note_json(id: &str, order: i64, updated_at: u64) -> String {
    format!(
        r#"{{"id":"{id}","user_id":"user-1","title":"Note {id}","content":"","pinned":false,"order":{order},"created_at":1,"updated_at":{updated_at}}}"#
    )
}

// ============================================================================
// REST remote
// ============================================================================

#[tokio::test]
async fn test_list_notes_queries_owner_rows_in_order() {
    let backend = FakeBackend::start(|_| {
        (200, format!("[{},{}]", note_json("a", 0, 10), note_json("b", 1, 20)))
    })
    .await;
    let remote = HttpRemote::new(&backend.url(), "anon-key")
        .unwrap()
        .with_access_token("user-token");

    let notes = remote.list_notes(&owner()).await.unwrap();

    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].id, "a");
    assert_eq!(notes[1].modified_at, 20);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.request_line.starts_with("GET /rest/v1/notes?"));
    assert!(request.request_line.contains("user_id=eq.user-1"));
    assert!(request.request_line.contains("order=order.asc"));
    assert_eq!(request.header("apikey"), Some("anon-key"));
    assert_eq!(request.header("authorization"), Some("bearer user-token"));
}

#[tokio::test]
async fn test_unauthorized_response_maps_to_error() {
    let backend = FakeBackend::start(|_| (401, r#"{"message":"JWT expired"}"#.to_string())).await;
    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();

    let err = remote.list_todo_lists(&owner()).await.unwrap_err();

    assert!(matches!(err, RemoteError::Unauthorized(ref msg) if msg.contains("JWT expired")));
}

#[tokio::test]
async fn test_server_error_keeps_status() {
    let backend = FakeBackend::start(|_| (500, "boom".to_string())).await;
    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();

    let err = remote.list_notes(&owner()).await.unwrap_err();

    assert!(matches!(err, RemoteError::Server { status: 500, .. }));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let backend = FakeBackend::start(|_| (200, r#"{"not":"a list"}"#.to_string())).await;
    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();

    let err = remote.list_notes(&owner()).await.unwrap_err();

    assert!(matches!(err, RemoteError::Decode(_)));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let remote = HttpRemote::new(&format!("http://{}", addr), "anon-key").unwrap();

    let err = remote.list_notes(&owner()).await.unwrap_err();

    assert!(matches!(err, RemoteError::Network(_)));
}

#[tokio::test]
async fn test_upsert_posts_merge_request() {
    let backend = FakeBackend::start(|_| (201, String::new())).await;
    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();
    let mut list = TodoList::new("t1", owner(), "Groceries");
    list.modified_at = 42;

    remote.upsert_todo_list(&list).await.unwrap();

    let request = &backend.requests()[0];
    assert!(request.request_line.starts_with("POST /rest/v1/todo_lists?on_conflict=id"));
    assert_eq!(
        request.header("prefer"),
        Some("resolution=merge-duplicates,return=minimal")
    );
    let body: Vec<TodoList> = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, vec![list]);
}

#[tokio::test]
async fn test_delete_filters_on_id_and_owner() {
    let backend = FakeBackend::start(|_| (204, String::new())).await;
    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();

    remote.delete_note(&owner(), "n1").await.unwrap();

    let line = &backend.requests()[0].request_line;
    assert!(line.starts_with("DELETE /rest/v1/notes?"));
    assert!(line.contains("id=eq.n1"));
    assert!(line.contains("user_id=eq.user-1"));
}

// ============================================================================
// Realtime feed
// ============================================================================

/// Accept one WebSocket connection and return it.
async fn realtime_server() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("Failed to accept");
        accept_async(stream).await.expect("Failed to upgrade")
    });

    (format!("ws://{}", addr), handle)
}

/// Next text frame from the client, parsed as JSON.
async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    loop {
        match timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected text frame, got {:?}", other),
            Err(_) => panic!("Timeout waiting for frame"),
        }
    }
}

async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string().into()))
        .await
        .expect("Failed to send frame");
}

#[tokio::test]
async fn test_feed_joins_owner_channel() {
    let (url, server) = realtime_server().await;
    let client = RealtimeClient::new(url);

    let _feed = client.open(&owner(), EntityKind::Note).await.unwrap();
    let mut ws = server.await.unwrap();

    let join = recv_json(&mut ws).await;
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], "realtime:public:notes:user_id=eq.user-1");
}

#[tokio::test]
async fn test_feed_signals_only_change_frames() {
    let (url, server) = realtime_server().await;
    let client = RealtimeClient::new(url);

    let mut feed = client.open(&owner(), EntityKind::TodoList).await.unwrap();
    let mut ws = server.await.unwrap();
    recv_json(&mut ws).await;

    send_text(
        &mut ws,
        r#"{"topic":"t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
    )
    .await;
    send_text(&mut ws, r#"{"topic":"t","event":"postgres_changes","payload":{},"ref":null}"#).await;

    let signal = timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("Timeout waiting for signal")
        .expect("Feed ended");
    assert_eq!(signal.kind, EntityKind::TodoList);

    // Nothing else is pending: the reply produced no signal.
    assert!(timeout(Duration::from_millis(100), feed.next()).await.is_err());
}

#[tokio::test]
async fn test_feed_sends_heartbeats() {
    let (url, server) = realtime_server().await;
    let client = RealtimeClient::new(url).with_heartbeat(Duration::from_millis(50));

    let _feed = client.open(&owner(), EntityKind::Note).await.unwrap();
    let mut ws = server.await.unwrap();
    recv_json(&mut ws).await;

    let heartbeat = recv_json(&mut ws).await;
    assert_eq!(heartbeat["topic"], "phoenix");
    assert_eq!(heartbeat["event"], "heartbeat");
}

#[tokio::test]
async fn test_feed_ends_when_server_closes() {
    let (url, server) = realtime_server().await;
    let client = RealtimeClient::new(url);

    let mut feed = client.open(&owner(), EntityKind::Note).await.unwrap();
    let mut ws = server.await.unwrap();
    recv_json(&mut ws).await;
    ws.close(None).await.unwrap();

    let next = timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("Feed should end");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_dropping_feed_closes_connection() {
    let (url, server) = realtime_server().await;
    let client = RealtimeClient::new(url);

    let feed = client.open(&owner(), EntityKind::Note).await.unwrap();
    let mut ws = server.await.unwrap();
    recv_json(&mut ws).await;

    drop(feed);

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Server should see the connection close");
}

#[tokio::test]
async fn test_connect_failure_is_subscription_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = RealtimeClient::new(format!("ws://{}", addr));

    let result = client.open(&owner(), EntityKind::Note).await;

    assert!(matches!(result, Err(RemoteError::Subscription(_))));
}

// ============================================================================
// Full session
// ============================================================================

#[tokio::test]
async fn test_session_persists_fetched_records_locally() {
    let backend = FakeBackend::start(|line| {
        if line.contains("/rest/v1/notes") {
            (200, format!("[{}]", note_json("n1", 0, 100)))
        } else {
            (200, "[]".to_string())
        }
    })
    .await;
    let data = TempDir::new().unwrap();

    let notes_store = Arc::new(JsonRecordStore::<Note>::open(data.path()).await.unwrap());
    let todos_store = Arc::new(JsonRecordStore::<TodoList>::open(data.path()).await.unwrap());
    let (callbacks, persister) =
        persisting_callbacks(Arc::clone(&notes_store), Arc::clone(&todos_store));

    let remote = HttpRemote::new(&backend.url(), "anon-key").unwrap();
    let deps = SessionDeps::new(remote, JsonFileStore::new(data.path()));
    let session = SyncSession::new(owner(), SyncConfig::default(), deps, callbacks);

    session.initialize_previous_state(vec![], vec![]);
    session.start_polling();

    let synced = timeout(Duration::from_secs(5), async {
        loop {
            if notes_store.get("n1").await.unwrap().is_some() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(synced.is_ok(), "Note should reach the local store");
    assert!(session.status().active);

    session.stop();
    drop(session);
    timeout(Duration::from_secs(5), persister)
        .await
        .expect("Persister should finish")
        .unwrap();

    // Both survive a restart.
    let reopened = JsonRecordStore::<Note>::open(data.path()).await.unwrap();
    assert_eq!(reopened.list_ordered().await.unwrap().len(), 1);
    let notified = std::fs::read_to_string(data.path().join("notified_items.json")).unwrap();
    assert!(notified.contains("note_n1_100"));
}
