use anyhow::Result;
use async_trait::async_trait;
use shared::protocol::{PushEvent, RemoteRequest, RemoteResponse};
use tokio::sync::broadcast;

/// Live link to the remote message source.
///
/// `request` is the emit-with-reply primitive; `subscribe_push` yields the
/// server's unsolicited notifications. Dropping the receiver unsubscribes.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn request(&self, request: RemoteRequest) -> Result<RemoteResponse>;
    fn subscribe_push(&self) -> broadcast::Receiver<PushEvent>;
}
