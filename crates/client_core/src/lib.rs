use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{DirectoryEntry, Message},
    protocol::{RemoteRequest, RemoteResponse},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub mod config;
pub mod connection;
pub mod content_cache;
pub mod error;
pub mod gate;
pub mod history;
mod lifecycle;
pub mod merge;
mod pagination;
pub mod transport;

pub use config::SyncConfig;
pub use connection::Connection;
pub use error::{SyncError, SyncResult};
pub use transport::WebSocketConnection;

use content_cache::{ContentCache, ContentLookup};
use gate::LoadingGate;
use history::ChannelMessageCache;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Loading scope of fetches that are not tied to a channel.
pub const GLOBAL_SCOPE: &str = "";

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Full current history of `channel` after a change.
    MessagesUpdated {
        channel: String,
        messages: Vec<Message>,
    },
    LoadingStarted {
        scope: String,
    },
    LoadingStopped {
        scope: String,
    },
    /// Human-readable failure, forwarded verbatim.
    Error(String),
}

struct SynchronizerState {
    connection: Option<Arc<dyn Connection>>,
    push_listener: Option<JoinHandle<()>>,
    histories: ChannelMessageCache,
    contents: ContentCache,
    open_channels: HashSet<String>,
    initial_loads: HashSet<String>,
    can_load_more: bool,
    /// Bumped on every reset; replies tagged with an older value are dropped.
    generation: u64,
}

impl SynchronizerState {
    fn new() -> Self {
        let mut state = Self {
            connection: None,
            push_listener: None,
            histories: ChannelMessageCache::default(),
            contents: ContentCache::default(),
            open_channels: HashSet::new(),
            initial_loads: HashSet::new(),
            can_load_more: true,
            generation: 0,
        };
        state.reset();
        state
    }

    /// Cold-cache reset. The connection handle is managed by the lifecycle
    /// hooks and left alone here.
    fn reset(&mut self) {
        self.histories.clear();
        self.contents.clear();
        self.open_channels.clear();
        self.initial_loads.clear();
        self.can_load_more = true;
        self.generation = self.generation.wrapping_add(1);
    }

    fn connection(&self) -> SyncResult<Arc<dyn Connection>> {
        self.connection.clone().ok_or(SyncError::ConnectionAbsent)
    }
}

/// Client-side cache of channel histories kept in sync with a remote source.
pub struct MessageSynchronizer {
    config: SyncConfig,
    gate: LoadingGate,
    inner: Mutex<SynchronizerState>,
    events: broadcast::Sender<SyncEvent>,
}

impl MessageSynchronizer {
    pub fn new(config: SyncConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            gate: LoadingGate::new(),
            inner: Mutex::new(SynchronizerState::new()),
            events,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Cached history of `channel`. An unloaded channel yields `[]` and
    /// schedules its initial load; the result arrives as
    /// [`SyncEvent::MessagesUpdated`].
    pub async fn get_messages(self: &Arc<Self>, channel: &str) -> Vec<Message> {
        let mut guard = self.inner.lock().await;
        if let Some(messages) = guard.histories.get(channel) {
            return messages;
        }
        let _ = self.schedule_initial_load(&mut guard, channel);
        Vec::new()
    }

    pub async fn get_latest_message(self: &Arc<Self>, channel: &str) -> Option<String> {
        let mut guard = self.inner.lock().await;
        if !guard.histories.contains(channel) {
            let _ = self.schedule_initial_load(&mut guard, channel);
            return None;
        }
        guard.histories.latest(channel).map(|m| m.key.clone())
    }

    pub async fn get_oldest_message(self: &Arc<Self>, channel: &str) -> Option<String> {
        let mut guard = self.inner.lock().await;
        if !guard.histories.contains(channel) {
            let _ = self.schedule_initial_load(&mut guard, channel);
            return None;
        }
        guard.histories.oldest(channel).map(|m| m.key.clone())
    }

    /// Cleared when an older-history load starts and set again once a load
    /// returns anything. Informational; older loads are not blocked by it.
    pub async fn can_load_more(&self) -> bool {
        self.inner.lock().await.can_load_more
    }

    pub fn is_loading(&self) -> bool {
        self.gate.is_loading()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connection.is_some()
    }

    pub async fn is_channel_open(&self, channel: &str) -> bool {
        self.inner.lock().await.open_channels.contains(channel)
    }

    /// Parsed content of the message with `hash`. Served from cache when
    /// possible; concurrent requests for the same hash share one fetch. Any
    /// remote failure, empty reply or unparsable body yields `Ok(None)`.
    pub async fn load_message_content(self: &Arc<Self>, hash: &str) -> SyncResult<Option<Value>> {
        let (connection, waiter, generation) = {
            let mut guard = self.inner.lock().await;
            let connection = match guard.connection() {
                Ok(connection) => connection,
                Err(err) => {
                    error!(hash, "sync: cannot load message content, socket not connected");
                    return Err(err);
                }
            };
            match guard.contents.lookup(hash) {
                ContentLookup::Cached(value) => return Ok(Some(value)),
                ContentLookup::Pending { waiter, fetch } => {
                    (fetch.then_some(connection), waiter, guard.generation)
                }
            }
        };

        if let Some(connection) = connection {
            let sync = Arc::clone(self);
            let hash = hash.to_string();
            tokio::spawn(async move {
                sync.fetch_content(connection, hash, generation).await;
            });
        }

        Ok(waiter.await.ok().flatten())
    }

    async fn fetch_content(&self, connection: Arc<dyn Connection>, hash: String, generation: u64) {
        self.emit(SyncEvent::LoadingStarted {
            scope: GLOBAL_SCOPE.to_string(),
        });
        info!(hash = %hash, "sync: requesting message content");

        let request = RemoteRequest::MessageGet { hash: hash.clone() };
        let value = match self.request(connection.as_ref(), request).await {
            Ok(RemoteResponse::MessageContent(Some(payload))) => {
                match serde_json::from_str::<Value>(&payload.data) {
                    Ok(value) => Some(value),
                    Err(source) => {
                        let err = SyncError::MalformedContent {
                            hash: hash.clone(),
                            source,
                        };
                        warn!(error = %err, "sync: dropping unparsable message content");
                        self.report(&err);
                        None
                    }
                }
            }
            Ok(RemoteResponse::MessageContent(None)) => {
                info!(hash = %hash, "sync: remote has no content for hash");
                None
            }
            Ok(_) => {
                let err = SyncError::UnexpectedResponse {
                    event: "message.get",
                };
                error!(hash = %hash, error = %err, "sync: message content request failed");
                self.report(&err);
                None
            }
            Err(err) => {
                error!(hash = %hash, error = %err, "sync: message content request failed");
                self.report(&err);
                None
            }
        };

        {
            let mut guard = self.inner.lock().await;
            if guard.generation == generation {
                guard.contents.complete(&hash, value);
            } else {
                info!(hash = %hash, "sync: dropping content fetched before the last reset");
            }
        }
        self.emit(SyncEvent::LoadingStopped {
            scope: GLOBAL_SCOPE.to_string(),
        });
    }

    pub async fn send_message(&self, channel: &str, text: &str) -> SyncResult<()> {
        info!(channel, "sync: sending message");
        self.acknowledged(
            channel,
            RemoteRequest::MessageSend {
                channel: channel.to_string(),
                text: text.to_string(),
            },
        )
        .await
    }

    pub async fn add_file(&self, channel: &str, path: &str) -> SyncResult<()> {
        info!(channel, path, "sync: adding file");
        self.acknowledged(
            channel,
            RemoteRequest::FileAdd {
                channel: channel.to_string(),
                path: path.to_string(),
            },
        )
        .await
    }

    async fn acknowledged(&self, channel: &str, request: RemoteRequest) -> SyncResult<()> {
        let event = request.event_name();
        let connection = self.connection_for(event).await?;
        self.emit(SyncEvent::LoadingStarted {
            scope: channel.to_string(),
        });

        let result = match self.request(connection.as_ref(), request).await {
            Ok(RemoteResponse::Ack { error: None }) => Ok(()),
            Ok(RemoteResponse::Ack {
                error: Some(message),
            }) => Err(SyncError::Remote(message)),
            Ok(_) => Err(SyncError::UnexpectedResponse { event }),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!(channel, event, error = %err, "sync: remote rejected request");
            self.report(err);
        }

        self.emit(SyncEvent::LoadingStopped {
            scope: channel.to_string(),
        });
        result
    }

    pub async fn get_swarm(&self) -> SyncResult<Value> {
        let connection = self.connection_for("swarm.get").await?;
        info!("sync: requesting swarm");
        match self.request(connection.as_ref(), RemoteRequest::SwarmGet).await? {
            RemoteResponse::Swarm(swarm) => Ok(swarm),
            _ => Err(SyncError::UnexpectedResponse { event: "swarm.get" }),
        }
    }

    /// Listing of the directory stored under `hash`; `None` when there is no
    /// hash or the remote has no listing for it.
    pub async fn load_directory_info(
        &self,
        hash: Option<&str>,
    ) -> SyncResult<Option<Vec<DirectoryEntry>>> {
        let Some(hash) = hash else {
            return Ok(None);
        };
        let connection = self.connection_for("list.get").await?;
        info!(hash, "sync: requesting directory listing");

        let request = RemoteRequest::ListGet {
            hash: hash.to_string(),
        };
        match self.request(connection.as_ref(), request).await? {
            RemoteResponse::DirectoryListing(entries) => {
                Ok(entries.map(|entries| entries.into_iter().map(Into::into).collect()))
            }
            _ => Err(SyncError::UnexpectedResponse { event: "list.get" }),
        }
    }

    async fn connection_for(&self, event: &'static str) -> SyncResult<Arc<dyn Connection>> {
        let connection = self.inner.lock().await.connection();
        if connection.is_err() {
            error!(event, "sync: socket not connected");
        }
        connection
    }

    async fn request(
        &self,
        connection: &dyn Connection,
        request: RemoteRequest,
    ) -> SyncResult<RemoteResponse> {
        let event = request.event_name();
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, connection.request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(SyncError::Remote(err.to_string())),
            Err(_) => Err(SyncError::Timeout {
                event,
                elapsed: timeout,
            }),
        }
    }

    fn report(&self, err: &SyncError) {
        if err.is_user_visible() {
            self.emit(SyncEvent::Error(err.to_string()));
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
