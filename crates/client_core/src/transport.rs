use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use shared::protocol::{ClientFrame, PushEvent, RemoteRequest, RemoteResponse, ServerFrame};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use url::Url;

use crate::Connection;

const PUSH_CHANNEL_CAPACITY: usize = 256;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<RemoteResponse>>>>>;

pub struct WebSocketConnection {
    writer: Mutex<WsWriter>,
    pending: PendingReplies,
    next_id: AtomicU64,
    pushes: broadcast::Receiver<PushEvent>,
    connected: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl WebSocketConnection {
    pub async fn connect(server_url: &str) -> Result<Arc<Self>> {
        let ws_url = websocket_url(server_url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (writer, mut ws_reader) = ws_stream.split();
        info!(url = %ws_url, "transport: websocket connected");

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (push_tx, pushes) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let (connected_tx, connected) = watch::channel(true);

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Ack { id, response }) => {
                            resolve(&reader_pending, id, Ok(response)).await;
                        }
                        Ok(ServerFrame::Push(event)) => {
                            let _ = push_tx.send(event);
                        }
                        Err(err) => match ack_id(&text) {
                            Some(id) => {
                                warn!(id, error = %err, "transport: undecodable reply");
                                let failure = anyhow!("invalid reply to request {id}: {err}");
                                resolve(&reader_pending, id, Err(failure)).await;
                            }
                            None => warn!(error = %err, "transport: invalid server frame"),
                        },
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "transport: websocket receive failed");
                        break;
                    }
                }
            }
            let _ = connected_tx.send(false);
            reader_pending.lock().await.clear();
            info!("transport: websocket closed");
        });

        Ok(Arc::new(Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            pushes,
            connected,
            reader,
        }))
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the socket has closed.
    pub async fn closed(&self) {
        let mut connected = self.connected.clone();
        while *connected.borrow_and_update() {
            if connected.changed().await.is_err() {
                break;
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .context("failed to close websocket")
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn request(&self, request: RemoteRequest) -> Result<RemoteResponse> {
        if !self.is_connected() {
            bail!("socket closed");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event = request.event_name();
        let text = serde_json::to_string(&ClientFrame { id, request })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);
        if !self.is_connected() {
            self.pending.lock().await.remove(&id);
            bail!("socket closed");
        }
        if let Err(err) = self.writer.lock().await.send(Message::Text(text)).await {
            self.pending.lock().await.remove(&id);
            return Err(anyhow!(err).context(format!("failed to send {event}")));
        }

        reply_rx
            .await
            .map_err(|_| anyhow!("socket closed before {event} was answered"))?
    }

    fn subscribe_push(&self) -> broadcast::Receiver<PushEvent> {
        self.pushes.resubscribe()
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn resolve(pending: &PendingReplies, id: u64, reply: Result<RemoteResponse>) {
    match pending.lock().await.remove(&id) {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => warn!(id, "transport: reply for unknown request"),
    }
}

/// Request id of an `ack` frame whose body did not decode.
fn ack_id(text: &str) -> Option<u64> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("type")?.as_str()? != "ack" {
        return None;
    }
    frame.get("payload")?.get("id")?.as_u64()
}

/// Accepts `ws`, `wss`, `http` and `https` URLs; the latter two are mapped to
/// their websocket scheme.
pub fn websocket_url(server_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => bail!("unsupported server url scheme {other}; expected ws(s):// or http(s)://"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot use scheme {scheme} for {server_url}"))?;
    Ok(url)
}
