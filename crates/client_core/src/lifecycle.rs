use std::sync::Arc;

use shared::protocol::PushEvent;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{info, warn};

use crate::{Connection, MessageSynchronizer, SyncResult};

impl MessageSynchronizer {
    /// Adopts `connection` and starts listening for its push notifications.
    /// A listener left over from an earlier connection is stopped.
    pub async fn on_socket_connected(self: &Arc<Self>, connection: Arc<dyn Connection>) {
        info!("sync: socket connected");
        let listener = self.spawn_push_listener(connection.subscribe_push());
        let previous = {
            let mut guard = self.inner.lock().await;
            guard.connection = Some(connection);
            guard.push_listener.replace(listener)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub async fn on_socket_disconnected(&self) {
        let listener = {
            let mut guard = self.inner.lock().await;
            guard.connection = None;
            guard.reset();
            guard.push_listener.take()
        };
        if let Some(listener) = listener {
            listener.abort();
        }
        info!("sync: socket disconnected, caches cleared");
    }

    /// Application-level disconnect: clears caches and flags but keeps the
    /// connection handle.
    pub async fn on_disconnect(&self) {
        self.inner.lock().await.reset();
        info!("sync: disconnect requested, caches cleared");
    }

    /// The history entry is only created once the initial load is issued, so
    /// joining while disconnected leaves the channel unloaded.
    pub async fn on_joined_channel(self: &Arc<Self>, channel: &str) -> SyncResult<()> {
        info!(channel, "sync: joined channel");
        let mut guard = self.inner.lock().await;
        guard.open_channels.insert(channel.to_string());
        self.schedule_initial_load(&mut guard, channel)?;
        guard.histories.ensure(channel);
        Ok(())
    }

    /// Content entries stay cached.
    pub async fn on_left_channel(&self, channel: &str) {
        let removed = self.inner.lock().await.histories.remove(channel);
        info!(
            channel,
            dropped = removed.map(|history| history.len()).unwrap_or(0),
            "sync: left channel"
        );
    }

    pub async fn on_leave_channel(&self, channel: &str) {
        self.inner.lock().await.open_channels.remove(channel);
        info!(channel, "sync: closed channel");
    }

    fn spawn_push_listener(
        self: &Arc<Self>,
        mut pushes: broadcast::Receiver<PushEvent>,
    ) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match pushes.recv().await {
                    Ok(PushEvent::Messages { channel, batch }) => {
                        info!(
                            channel = %channel,
                            hinted = batch.len(),
                            "sync: push notification for new messages"
                        );
                        sync.inner.lock().await.can_load_more = true;
                        if let Err(err) = sync.load_newer_messages(&channel).await {
                            warn!(channel = %channel, error = %err, "sync: push refresh skipped");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync: push listener lagged; refreshing cached channels");
                        let channels = sync.inner.lock().await.histories.channel_names();
                        for channel in channels {
                            if let Err(err) = sync.load_newer_messages(&channel).await {
                                warn!(channel = %channel, error = %err, "sync: lag refresh skipped");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("sync: push stream closed");
                        break;
                    }
                }
            }
        })
    }
}
