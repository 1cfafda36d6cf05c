use std::sync::Arc;

use shared::{
    domain::Message,
    protocol::{RemoteRequest, RemoteResponse},
};
use tracing::{error, info, warn};

use crate::{
    gate::LoadingPermit,
    history::MergeOutcome,
    merge::Edge,
    Connection, MessageSynchronizer, SyncError, SyncEvent, SyncResult, SynchronizerState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    /// Newest page of a channel with no history.
    Initial,
    /// Everything after the latest cached key.
    Newer,
    /// One page before the oldest cached key.
    Older,
}

impl FetchKind {
    fn edge(self) -> Edge {
        match self {
            Self::Initial | Self::Newer => Edge::Newer,
            Self::Older => Edge::Older,
        }
    }
}

#[derive(Debug, Clone)]
struct FetchPlan {
    kind: FetchKind,
    channel: String,
    boundary: Option<String>,
    generation: u64,
}

impl FetchPlan {
    fn request(&self, amount: u32) -> RemoteRequest {
        let (older_than, newer_than) = match self.kind {
            FetchKind::Initial => (None, None),
            FetchKind::Newer => (None, self.boundary.clone()),
            FetchKind::Older => (self.boundary.clone(), None),
        };
        RemoteRequest::ChannelGet {
            channel: self.channel.clone(),
            older_than,
            newer_than,
            amount,
        }
    }
}

impl MessageSynchronizer {
    /// Not gated: initial loads of different channels may overlap.
    pub(crate) fn schedule_initial_load(
        self: &Arc<Self>,
        state: &mut SynchronizerState,
        channel: &str,
    ) -> SyncResult<bool> {
        let connection = match state.connection() {
            Ok(connection) => connection,
            Err(err) => {
                error!(channel, "sync: cannot load messages, socket not connected");
                return Err(err);
            }
        };
        if !state.initial_loads.insert(channel.to_string()) {
            return Ok(false);
        }

        let permit = self.gate.hold();
        self.start_fetch(
            connection,
            FetchPlan {
                kind: FetchKind::Initial,
                channel: channel.to_string(),
                boundary: None,
                generation: state.generation,
            },
            permit,
        );
        Ok(true)
    }

    /// Driven by push notifications; never denied by the gate. A channel with
    /// no history gets its initial load instead.
    pub async fn load_newer_messages(self: &Arc<Self>, channel: &str) -> SyncResult<()> {
        let (connection, latest, generation) = {
            let mut guard = self.inner.lock().await;
            let connection = match guard.connection() {
                Ok(connection) => connection,
                Err(err) => {
                    error!(channel, "sync: cannot load newer messages, socket not connected");
                    return Err(err);
                }
            };
            if !guard.histories.contains(channel) {
                return self.schedule_initial_load(&mut guard, channel).map(|_| ());
            }
            (
                connection,
                guard.histories.latest(channel).map(|m| m.key.clone()),
                guard.generation,
            )
        };

        let permit = self.gate.hold();
        self.start_fetch(
            connection,
            FetchPlan {
                kind: FetchKind::Newer,
                channel: channel.to_string(),
                boundary: latest,
                generation,
            },
            permit,
        );
        Ok(())
    }

    /// Backfills one page before the oldest cached message. Returns `false`
    /// without doing anything while another fetch holds the gate.
    pub async fn load_older_messages(self: &Arc<Self>, channel: &str) -> SyncResult<bool> {
        let (connection, oldest, generation, permit) = {
            let mut guard = self.inner.lock().await;
            let connection = match guard.connection() {
                Ok(connection) => connection,
                Err(err) => {
                    error!(channel, "sync: cannot load older messages, socket not connected");
                    return Err(err);
                }
            };
            let Some(permit) = self.gate.try_acquire() else {
                info!(channel, "sync: older load skipped, another fetch is in flight");
                return Ok(false);
            };
            guard.can_load_more = false;
            (
                connection,
                guard.histories.oldest(channel).map(|m| m.key.clone()),
                guard.generation,
                permit,
            )
        };

        self.start_fetch(
            connection,
            FetchPlan {
                kind: FetchKind::Older,
                channel: channel.to_string(),
                boundary: oldest,
                generation,
            },
            permit,
        );
        Ok(true)
    }

    fn start_fetch(
        self: &Arc<Self>,
        connection: Arc<dyn Connection>,
        plan: FetchPlan,
        permit: LoadingPermit,
    ) {
        self.emit(SyncEvent::LoadingStarted {
            scope: plan.channel.clone(),
        });
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            sync.run_fetch(connection, plan, permit).await;
        });
    }

    async fn run_fetch(
        &self,
        connection: Arc<dyn Connection>,
        plan: FetchPlan,
        permit: LoadingPermit,
    ) {
        let request = plan.request(self.config.batch_size);
        info!(
            channel = %plan.channel,
            kind = ?plan.kind,
            boundary = ?plan.boundary,
            amount = self.config.batch_size,
            "sync: requesting channel messages"
        );

        let outcome = match self.request(connection.as_ref(), request).await {
            Ok(RemoteResponse::ChannelMessages { channel, messages }) => {
                if channel != plan.channel {
                    warn!(
                        requested = %plan.channel,
                        replied = %channel,
                        "sync: reply names a different channel; applying to requested channel"
                    );
                }
                self.apply_batch(&plan, messages.unwrap_or_default()).await
            }
            Ok(_) => {
                self.fail_fetch(
                    &plan,
                    SyncError::UnexpectedResponse {
                        event: "channel.get",
                    },
                )
                .await;
                None
            }
            Err(err) => {
                self.fail_fetch(&plan, err).await;
                None
            }
        };

        permit.release();
        if let Some(outcome) = outcome.filter(MergeOutcome::changed) {
            self.emit(SyncEvent::MessagesUpdated {
                channel: plan.channel.clone(),
                messages: outcome.messages,
            });
        }
        self.emit(SyncEvent::LoadingStopped {
            scope: plan.channel,
        });
    }

    /// `None` when the cache was reset after the request went out.
    async fn apply_batch(&self, plan: &FetchPlan, batch: Vec<Message>) -> Option<MergeOutcome> {
        let received = batch.len();
        let mut guard = self.inner.lock().await;
        if guard.generation != plan.generation {
            info!(
                channel = %plan.channel,
                received,
                "sync: dropping channel messages fetched before the last reset"
            );
            return None;
        }
        if plan.kind == FetchKind::Initial {
            guard.initial_loads.remove(&plan.channel);
        }

        let outcome = guard.histories.merge(&plan.channel, batch, plan.kind.edge());
        match plan.kind {
            FetchKind::Initial | FetchKind::Newer => guard.can_load_more = true,
            FetchKind::Older if received > 0 => guard.can_load_more = true,
            FetchKind::Older => {
                info!(channel = %plan.channel, "sync: no older messages left");
            }
        }

        info!(
            channel = %plan.channel,
            received,
            added = outcome.added,
            total = outcome.messages.len(),
            "sync: merged channel messages"
        );
        Some(outcome)
    }

    async fn fail_fetch(&self, plan: &FetchPlan, err: SyncError) {
        error!(
            channel = %plan.channel,
            kind = ?plan.kind,
            error = %err,
            "sync: channel.get failed"
        );
        if plan.kind == FetchKind::Initial {
            let mut guard = self.inner.lock().await;
            if guard.generation == plan.generation {
                guard.initial_loads.remove(&plan.channel);
            }
        }
        self.report(&err);
    }
}
