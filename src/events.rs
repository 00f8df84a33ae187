//! # Events Module
//!
//! Routes what the audio transport reports into engine and node pool updates.
//!
//! Routing is a lookup table from [`EventKind`] to a plain handler function.
//! Supporting a new event means adding a variant and a table entry:
//!
//! | Event | Effect |
//! |-------|--------|
//! | `TrackEnd` | advance when the track finished or failed to load |
//! | `TrackStuck` | advance |
//! | `TrackException` | error notice |
//! | `PlayerUpdate` | record playback position |
//! | `WebSocketClosed`, `Disconnected` | stop (queue kept) and notify |
//! | `Node` | node pool bookkeeping |
//!
//! Events without a table entry are logged and dropped.

use futures::future::{BoxFuture, FutureExt};
use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{Notice, QueueEngine};
use crate::error::MusicResult;
use crate::nodes::NodeEvent;

/// Why a track stopped, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    /// Another `play` call took over the player
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the queue should move on after this reason.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart { guild: GuildId, identifier: String },
    TrackEnd { guild: GuildId, reason: TrackEndReason },
    TrackException { guild: GuildId, message: String, severity: String },
    TrackStuck { guild: GuildId, threshold_ms: u64 },
    PlayerUpdate { guild: GuildId, position_ms: u64 },
    WebSocketClosed { guild: GuildId, code: u16, reason: String, by_remote: bool },
    Disconnected { guild: GuildId },
    Node(NodeEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TrackStart,
    TrackEnd,
    TrackException,
    TrackStuck,
    PlayerUpdate,
    WebSocketClosed,
    Disconnected,
    Node,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::TrackStart { .. } => EventKind::TrackStart,
            PlayerEvent::TrackEnd { .. } => EventKind::TrackEnd,
            PlayerEvent::TrackException { .. } => EventKind::TrackException,
            PlayerEvent::TrackStuck { .. } => EventKind::TrackStuck,
            PlayerEvent::PlayerUpdate { .. } => EventKind::PlayerUpdate,
            PlayerEvent::WebSocketClosed { .. } => EventKind::WebSocketClosed,
            PlayerEvent::Disconnected { .. } => EventKind::Disconnected,
            PlayerEvent::Node(_) => EventKind::Node,
        }
    }

    pub fn guild(&self) -> Option<GuildId> {
        match self {
            PlayerEvent::TrackStart { guild, .. }
            | PlayerEvent::TrackEnd { guild, .. }
            | PlayerEvent::TrackException { guild, .. }
            | PlayerEvent::TrackStuck { guild, .. }
            | PlayerEvent::PlayerUpdate { guild, .. }
            | PlayerEvent::WebSocketClosed { guild, .. }
            | PlayerEvent::Disconnected { guild } => Some(*guild),
            PlayerEvent::Node(_) => None,
        }
    }
}

pub type Handler = for<'a> fn(&'a EventRouter, PlayerEvent) -> BoxFuture<'a, MusicResult<()>>;

pub struct EventRouter {
    engine: Arc<QueueEngine>,
    handlers: HashMap<EventKind, Handler>,
}

impl EventRouter {
    /// Router with the default routing table.
    pub fn new(engine: Arc<QueueEngine>) -> Self {
        let mut router = Self::empty(engine);
        router.register(EventKind::TrackStart, on_track_start);
        router.register(EventKind::TrackEnd, on_track_end);
        router.register(EventKind::TrackException, on_track_exception);
        router.register(EventKind::TrackStuck, on_track_stuck);
        router.register(EventKind::PlayerUpdate, on_player_update);
        router.register(EventKind::WebSocketClosed, on_disconnect);
        router.register(EventKind::Disconnected, on_disconnect);
        router.register(EventKind::Node, on_node_event);
        router
    }

    /// Router that drops every event until handlers are registered.
    pub fn empty(engine: Arc<QueueEngine>) -> Self {
        Self {
            engine,
            handlers: HashMap::new(),
        }
    }

    /// Sets the handler for `kind`, returning the one it replaces.
    pub fn register(&mut self, kind: EventKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    pub async fn dispatch(&self, event: PlayerEvent) -> MusicResult<()> {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => handler(self, event).await,
            None => {
                debug!("No handler for {:?} event, ignoring", kind);
                Ok(())
            }
        }
    }

    /// Dispatches events from the transport until the channel closes or
    /// `shutdown` fires. Handler errors are logged, never fatal.
    ///
    /// Each guild gets its own worker task, so events of one guild are
    /// handled in order while a slow guild never holds up the others. Node
    /// events are handled inline.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PlayerEvent>, shutdown: CancellationToken) {
        info!("📡 Event router started");
        let mut workers: HashMap<GuildId, mpsc::UnboundedSender<PlayerEvent>> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(guild) = event.guild() else {
                if let Err(e) = self.dispatch(event).await {
                    error!("❌ Event handling failed: {}", e);
                }
                continue;
            };

            let event = match workers.get(&guild) {
                Some(worker) => match worker.send(event) {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(event)) => event,
                },
                None => event,
            };

            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(self.clone().guild_worker(guild, rx, shutdown.clone()));
            if tx.send(event).is_err() {
                warn!("⚠️ [{}] Event worker exited before its first event", guild);
            }
            workers.insert(guild, tx);
        }

        info!("📡 Event router stopped");
    }

    async fn guild_worker(
        self: Arc<Self>,
        guild: GuildId,
        mut events: mpsc::UnboundedReceiver<PlayerEvent>,
        shutdown: CancellationToken,
    ) {
        debug!("[{}] Event worker started", guild);
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(event).await {
                error!("❌ [{}] Event handling failed: {}", guild, e);
            }
        }
        debug!("[{}] Event worker stopped", guild);
    }
}

fn on_track_start(_router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        if let PlayerEvent::TrackStart { guild, identifier } = event {
            debug!("[{}] Track started: {}", guild, identifier);
        }
        Ok(())
    }
    .boxed()
}

fn on_track_end(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        let PlayerEvent::TrackEnd { guild, reason } = event else {
            return Ok(());
        };

        if !reason.may_start_next() {
            debug!("[{}] Track ended ({:?}), not advancing", guild, reason);
            return Ok(());
        }

        router.engine.advance(guild).await.map(|_| ())
    }
    .boxed()
}

fn on_track_stuck(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        let PlayerEvent::TrackStuck { guild, threshold_ms } = event else {
            return Ok(());
        };

        warn!("⚠️ [{}] Track stuck for {}ms, skipping", guild, threshold_ms);
        router.engine.skip(guild).await.map(|_| ())
    }
    .boxed()
}

fn on_track_exception(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        let PlayerEvent::TrackException {
            guild,
            message,
            severity,
        } = event
        else {
            return Ok(());
        };

        warn!("❌ [{}] Track exception ({}): {}", guild, severity, message);
        let title = router
            .engine
            .now_playing(guild)
            .await
            .map(|item| item.title().to_string());
        router
            .engine
            .notifier()
            .notify(Notice::TrackError { guild, title, message })
            .await;
        Ok(())
    }
    .boxed()
}

fn on_player_update(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        match event {
            PlayerEvent::PlayerUpdate { guild, position_ms } => {
                router.engine.record_position(guild, position_ms).await
            }
            _ => Ok(()),
        }
    }
    .boxed()
}

fn on_disconnect(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        let guild = match event {
            PlayerEvent::WebSocketClosed {
                guild,
                code,
                reason,
                by_remote,
            } => {
                warn!(
                    "🔌 [{}] Voice socket closed with code {} (remote: {}): {}",
                    guild, code, by_remote, reason
                );
                guild
            }
            PlayerEvent::Disconnected { guild } => guild,
            _ => return Ok(()),
        };

        router.engine.handle_disconnect(guild).await
    }
    .boxed()
}

fn on_node_event(router: &EventRouter, event: PlayerEvent) -> BoxFuture<'_, MusicResult<()>> {
    async move {
        if let PlayerEvent::Node(event) = event {
            router.engine.nodes().record_event(&event);
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::MockAudioTransport;
    use crate::audio::{EngineDeps, EngineSettings, Notifier, Session};
    use crate::cache::{RelatedCache, TrackCache};
    use crate::nodes::{Node, NodePool, NodeState};
    use crate::sources::related::MockPageFetcher;
    use crate::sources::user_agent::UserAgentPool;
    use crate::sources::{test_track, LoadResult, MockTrackLoader, RelatedResolver, TrackResolver};
    use crate::storage::{GuildConfig, MockGuildStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notice: Notice) {
            self.notices.lock().push(notice);
        }
    }

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn router() -> (EventRouter, Arc<RecordingNotifier>) {
        let nodes = NodePool::new();
        let mut node = Node::new("main", "http://localhost:2333", "pw");
        node.state = NodeState::Connected;
        nodes.add_node(node);
        let nodes = Arc::new(nodes);

        let mut loader = MockTrackLoader::new();
        loader
            .expect_load_tracks()
            .returning(|_, query| LoadResult::single(test_track(query)));

        let mut transport = MockAudioTransport::new();
        transport.expect_open_session().returning(|node, guild, channel| {
            Ok(Session {
                guild,
                channel,
                node: node.name.clone(),
            })
        });
        transport.expect_close_session().returning(|_| Ok(()));
        transport.expect_set_volume().returning(|_, _| Ok(()));
        transport.expect_play().returning(|_, _| Ok(()));

        let mut store = MockGuildStore::new();
        store
            .expect_get_guild_config()
            .returning(|guild| Ok(GuildConfig::new(guild, 100)));
        store
            .expect_update_guild_config()
            .returning(|guild, _| Ok(GuildConfig::new(guild, 100)));

        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch().returning(|_, _| Ok(String::new()));

        let notifier = Arc::new(RecordingNotifier::default());
        let engine = QueueEngine::new(
            EngineDeps {
                nodes: nodes.clone(),
                resolver: Arc::new(TrackResolver::new(
                    nodes,
                    Arc::new(loader),
                    Arc::new(TrackCache::new("tracks", Duration::from_secs(60))),
                )),
                related: Arc::new(
                    RelatedResolver::new(
                        Arc::new(RelatedCache::new("related", Duration::from_secs(60))),
                        Arc::new(fetcher),
                        UserAgentPool::new(2),
                    )
                    .with_retries(0, 0),
                ),
                transport: Arc::new(transport),
                store: Arc::new(store),
                notifier: notifier.clone(),
            },
            EngineSettings::default(),
        );

        (EventRouter::new(engine), notifier)
    }

    async fn playing(router: &EventRouter, queries: &[&str]) {
        let engine = router.engine();
        engine.join(guild(), ChannelId::new(2)).await.unwrap();
        for query in queries {
            engine.enqueue(guild(), query, UserId::new(3)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn track_end_advances_the_queue() {
        let (router, _) = router();
        playing(&router, &["a", "b"]).await;

        router
            .dispatch(PlayerEvent::TrackEnd {
                guild: guild(),
                reason: TrackEndReason::Finished,
            })
            .await
            .unwrap();

        let now = router.engine().now_playing(guild()).await.unwrap();
        assert_eq!(now.identifier(), "b");
    }

    #[tokio::test]
    async fn only_finished_or_failed_tracks_advance() {
        let (router, _) = router();
        playing(&router, &["a", "b"]).await;

        for reason in [TrackEndReason::Replaced, TrackEndReason::Stopped, TrackEndReason::Cleanup] {
            router
                .dispatch(PlayerEvent::TrackEnd { guild: guild(), reason })
                .await
                .unwrap();
        }

        let now = router.engine().now_playing(guild()).await.unwrap();
        assert_eq!(now.identifier(), "a");
        assert_eq!(router.engine().queue_snapshot(guild()).await.items.len(), 1);

        router
            .dispatch(PlayerEvent::TrackEnd {
                guild: guild(),
                reason: TrackEndReason::LoadFailed,
            })
            .await
            .unwrap();
        let now = router.engine().now_playing(guild()).await.unwrap();
        assert_eq!(now.identifier(), "b");
    }

    #[tokio::test]
    async fn socket_close_stops_and_notifies() {
        let (router, notifier) = router();
        playing(&router, &["a", "b"]).await;

        router
            .dispatch(PlayerEvent::WebSocketClosed {
                guild: guild(),
                code: 4014,
                reason: "Disconnected".into(),
                by_remote: true,
            })
            .await
            .unwrap();

        assert!(router.engine().session(guild()).await.is_none());
        // Queue survives a disconnect
        assert_eq!(router.engine().queue_snapshot(guild()).await.items.len(), 1);
        assert!(notifier
            .notices
            .lock()
            .iter()
            .any(|notice| matches!(notice, Notice::Disconnected { .. })));
    }

    #[tokio::test]
    async fn exception_is_reported_with_current_title() {
        let (router, notifier) = router();
        playing(&router, &["a"]).await;

        router
            .dispatch(PlayerEvent::TrackException {
                guild: guild(),
                message: "Something broke".into(),
                severity: "COMMON".into(),
            })
            .await
            .unwrap();

        let notices = notifier.notices.lock();
        let last = notices.last().unwrap();
        assert_eq!(
            *last,
            Notice::TrackError {
                guild: guild(),
                title: Some("Track a".to_string()),
                message: "Something broke".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn player_update_records_position() {
        let (router, _) = router();
        playing(&router, &["a"]).await;

        router
            .dispatch(PlayerEvent::PlayerUpdate {
                guild: guild(),
                position_ms: 42_000,
            })
            .await
            .unwrap();

        assert_eq!(router.engine().queue_snapshot(guild()).await.position_ms, 42_000);
    }

    #[tokio::test]
    async fn node_events_update_the_pool() {
        let (router, _) = router();

        router
            .dispatch(PlayerEvent::Node(NodeEvent::Closed {
                node: "main".into(),
                code: 1006,
                reason: None,
            }))
            .await
            .unwrap();

        assert!(router.engine().nodes().usable_nodes().is_empty());
    }

    #[tokio::test]
    async fn unrouted_events_are_ignored() {
        let (router, _) = router();
        let router = EventRouter::empty(router.engine().clone());

        router
            .dispatch(PlayerEvent::Disconnected { guild: guild() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (router, _) = router();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Arc::new(router).run(rx, shutdown.clone()));
        tx.send(PlayerEvent::TrackStart {
            guild: guild(),
            identifier: "a".into(),
        })
        .await
        .unwrap();
        shutdown.cancel();

        handle.await.unwrap();
    }
}
