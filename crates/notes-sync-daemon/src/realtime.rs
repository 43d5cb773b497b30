//! Realtime change feed over WebSocket.
//!
//! Speaks the Phoenix channel framing used by the backend's realtime server:
//! one connection per feed, a `phx_join` for the owner-filtered table, and a
//! heartbeat on a fixed interval. Payloads are not interpreted; every change
//! frame becomes an opaque `ChangeSignal`.

use futures::{SinkExt, StreamExt};
use notes_sync_core::remote::{ChangeFeed, ChangeSignal, RemoteError, Result};
use notes_sync_core::{EntityKind, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Outgoing channel frame.
#[derive(Debug, Serialize)]
struct OutgoingFrame<'a> {
    topic: &'a str,
    event: &'a str,
    payload: Value,
    #[serde(rename = "ref")]
    reference: String,
}

/// The parts of an incoming frame we look at.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    event: String,
    #[serde(default)]
    payload: Value,
}

/// What an incoming text frame means for the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Rows changed on the server.
    Change,
    /// The server refused or dropped the channel.
    Rejected(String),
    /// Replies, heartbeats, presence and anything unparseable.
    Ignored,
}

/// Classify one text frame.
pub fn parse_frame(text: &str) -> FrameKind {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return FrameKind::Ignored,
    };

    match frame.event.as_str() {
        "INSERT" | "UPDATE" | "DELETE" | "postgres_changes" => FrameKind::Change,
        "phx_error" => FrameKind::Rejected("channel error".to_string()),
        "phx_reply" if frame.payload["status"] == "error" => FrameKind::Rejected(
            frame.payload["response"]["reason"]
                .as_str()
                .unwrap_or("join rejected")
                .to_string(),
        ),
        _ => FrameKind::Ignored,
    }
}

/// Channel topic for one owner's rows of one table.
pub fn topic(kind: EntityKind, owner: &OwnerId) -> String {
    format!("realtime:public:{}:user_id=eq.{}", kind.table(), owner)
}

fn join_frame(kind: EntityKind, owner: &OwnerId) -> String {
    let topic = topic(kind, owner);
    let frame = OutgoingFrame {
        topic: &topic,
        event: "phx_join",
        payload: json!({
            "config": {
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": kind.table(),
                    "filter": format!("user_id=eq.{}", owner),
                }]
            }
        }),
        reference: "1".to_string(),
    };
    serde_json::to_string(&frame).unwrap_or_default()
}

fn heartbeat_frame(reference: u64) -> String {
    let frame = OutgoingFrame {
        topic: "phoenix",
        event: "heartbeat",
        payload: json!({}),
        reference: reference.to_string(),
    };
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Opens change feeds against one realtime endpoint.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    url: String,
    heartbeat: Duration,
}

impl RealtimeClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Connect, join the owner's channel for `kind` and return its feed.
    ///
    /// The connection lives until the returned feed is dropped or the server
    /// closes it; the feed then ends.
    pub async fn open(&self, owner: &OwnerId, kind: EntityKind) -> Result<ChangeFeed> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RemoteError::Subscription(format!("connect failed: {}", e)))?;
        let (mut write, read) = ws.split();

        write
            .send(Message::Text(join_frame(kind, owner).into()))
            .await
            .map_err(|e| RemoteError::Subscription(format!("join failed: {}", e)))?;

        info!("Realtime feed opened for {} of {}", kind.table(), owner);

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(run_feed(kind, write, read, tx, self.heartbeat));

        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

/// Pump one connection until the feed is dropped or the socket closes.
async fn run_feed<W, R>(
    kind: EntityKind,
    mut write: W,
    mut read: R,
    tx: mpsc::UnboundedSender<ChangeSignal>,
    heartbeat: Duration,
) where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Realtime feed for {} released", kind);
                let _ = write.send(Message::Close(None)).await;
                break;
            }

            _ = ticker.tick() => {
                let frame = heartbeat_frame(next_ref);
                next_ref += 1;
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    warn!("Realtime heartbeat for {} failed: {}", kind, e);
                    break;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        FrameKind::Change => {
                            if tx.send(ChangeSignal { kind }).is_err() {
                                break;
                            }
                        }
                        FrameKind::Rejected(reason) => {
                            warn!("Realtime channel for {} rejected: {}", kind, reason);
                            break;
                        }
                        FrameKind::Ignored => {}
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Realtime connection for {} closed", kind);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime connection for {} failed: {}", kind, e);
                        break;
                    }
                }
            }
        }
    }
}
