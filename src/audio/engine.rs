//! Per-guild playback orchestration.
//!
//! Every guild has its own `tokio::sync::Mutex<GuildState>`; no lock spans
//! guilds. Slow work (track resolution, related fetches) runs with the guild
//! lock released. Each guild carries a generation counter that `stop` bumps,
//! and a result is only written back when the generation it started under is
//! still current.

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::notifier::{Notice, Notifier};
use super::queue::{GuildQueue, PlayingState, QueueItem, QueueSnapshot, RepeatMode};
use super::transport::{AudioTransport, Session};
use crate::config::Config;
use crate::error::{MusicError, MusicResult};
use crate::nodes::NodePool;
use crate::sources::{LoadType, RelatedResolver, Track, TrackResolver};
use crate::storage::{GuildConfigPatch, GuildStore};

/// Related candidates tried before autoplay gives up.
const AUTOPLAY_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_queue_size: usize,
    /// How long an idle session is kept; zero leaves immediately
    pub idle_timeout: Duration,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            idle_timeout: config.idle_timeout(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            idle_timeout: Duration::ZERO,
        }
    }
}

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub nodes: Arc<NodePool>,
    pub resolver: Arc<TrackResolver>,
    pub related: Arc<RelatedResolver>,
    pub transport: Arc<dyn AudioTransport>,
    pub store: Arc<dyn GuildStore>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Queued behind other tracks; `position` is the 1-based queue slot of the first item
    Queued { items: Vec<QueueItem>, position: usize },
    /// The guild was idle and the first item started right away
    Started { items: Vec<QueueItem> },
    /// The guild was stopped while the query was resolving
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Playing(QueueItem),
    Autoplay(QueueItem),
    /// Nothing left; the session was left or the idle timer is running
    Finished,
    /// No session to play on
    NotConnected,
    Discarded,
}

struct GuildState {
    queue: GuildQueue,
    session: Option<Session>,
    paused: bool,
    generation: u64,
    idle_timer: Option<CancellationToken>,
}

impl GuildState {
    fn new(max_queue_size: usize) -> Self {
        Self {
            queue: GuildQueue::new(max_queue_size),
            session: None,
            paused: false,
            generation: 0,
            idle_timer: None,
        }
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            debug!("⏱️ Idle timer cancelled");
            timer.cancel();
        }
    }

    fn playing_state(&self) -> PlayingState {
        let player_active = self.session.is_some() && !self.paused;
        PlayingState::from_parts(self.queue.now_playing().is_some(), player_active)
    }
}

pub struct QueueEngine {
    me: Weak<QueueEngine>,
    deps: EngineDeps,
    settings: EngineSettings,
    guilds: DashMap<GuildId, Arc<Mutex<GuildState>>>,
}

impl QueueEngine {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            deps,
            settings,
            guilds: DashMap::new(),
        })
    }

    pub fn nodes(&self) -> &Arc<NodePool> {
        &self.deps.nodes
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.deps.notifier
    }

    fn state(&self, guild: GuildId) -> Arc<Mutex<GuildState>> {
        self.guilds
            .entry(guild)
            .or_insert_with(|| Arc::new(Mutex::new(GuildState::new(self.settings.max_queue_size))))
            .clone()
    }

    async fn persist(&self, guild: GuildId, patch: GuildConfigPatch) -> MusicResult<()> {
        self.deps
            .store
            .update_guild_config(guild, patch)
            .await
            .map(|_| ())
            .map_err(MusicError::Persistence)
    }

    fn queue_patch(state: &GuildState) -> GuildConfigPatch {
        GuildConfigPatch::default()
            .queue(state.queue.items())
            .now_playing(state.queue.now_playing().cloned())
            .position(state.queue.position_ms())
    }

    /// Opens a session on the best node, applies the saved volume and starts
    /// playing the persisted queue if nothing is playing yet.
    pub async fn join(&self, guild: GuildId, channel: ChannelId) -> MusicResult<AdvanceOutcome> {
        let node = self.deps.nodes.select_node(None)?;
        let state = self.state(guild);

        {
            let mut state = state.lock().await;
            if let Some(session) = &state.session {
                if session.channel == channel {
                    debug!("[{}] Already in channel {}", guild, channel);
                    return Ok(match state.queue.now_playing() {
                        Some(item) => AdvanceOutcome::Playing(item.clone()),
                        None => AdvanceOutcome::Finished,
                    });
                }
                let old = state.session.take();
                if let Some(old) = old {
                    self.close_session(&old).await;
                }
            }

            let config = self
                .deps
                .store
                .get_guild_config(guild)
                .await
                .map_err(MusicError::Persistence)?;

            let session = match self.deps.transport.open_session(&node, guild, channel).await {
                Ok(session) => session,
                Err(e) => {
                    error!("❌ [{}] [{}] Failed to join voice channel: {}", guild, channel, e);
                    return Err(e);
                }
            };
            info!("🔊 [{}] Joined channel {} on node {}", guild, channel, node.name);

            if let Err(e) = self.deps.transport.set_volume(&session, config.volume).await {
                warn!("[{}] Could not apply saved volume {}: {}", guild, config.volume, e);
            }
            state.session = Some(session);
            state.paused = false;
            state.cancel_idle_timer();

            if state.queue.now_playing().is_none() && state.queue.is_empty() {
                // The interrupted track goes back in front of the saved queue
                let items = config.now_playing.into_iter().chain(config.queue).collect();
                state.queue.restore(items, config.repeat);
            } else {
                state.queue.requeue_current();
                state.queue.set_repeat(config.repeat);
            }

            if state.queue.is_empty() {
                let generation = state.generation;
                self.arm_idle_timer(guild, &mut state, generation);
                return Ok(AdvanceOutcome::Finished);
            }
        }

        self.advance(guild).await
    }

    /// Resolves `query` and queues the result, starting playback when idle.
    pub async fn enqueue(&self, guild: GuildId, query: &str, requester: UserId) -> MusicResult<EnqueueOutcome> {
        if query.trim().is_empty() {
            return Err(MusicError::EmptyQuery);
        }

        let state = self.state(guild);
        let generation = {
            let state = state.lock().await;
            if state.queue.is_full() {
                return Err(MusicError::QueueFull(self.settings.max_queue_size));
            }
            state.generation
        };

        let result = self.deps.resolver.get_track(query, true).await?;
        let tracks = match result.load_type {
            LoadType::PlaylistLoaded => result.tracks,
            _ => result.tracks.into_iter().take(1).collect(),
        };
        if tracks.is_empty() {
            return Err(MusicError::ResolutionFailed {
                load_type: LoadType::NoMatches,
                message: "No tracks returned".to_string(),
            });
        }

        let (items, position, should_start) = {
            let mut state = state.lock().await;
            if state.generation != generation {
                info!("🗑️ [{}] Discarding stale result for {}", guild, query);
                return Ok(EnqueueOutcome::Discarded);
            }

            let position = state.queue.len() + 1;
            let items: Vec<QueueItem> = tracks
                .into_iter()
                .map(|track| QueueItem::new(track, requester))
                .collect();

            let added = if items.len() == 1 {
                state.queue.push(items[0].clone())?;
                1
            } else {
                state.queue.extend(items.clone())
            };
            if added == 0 {
                return Err(MusicError::QueueFull(self.settings.max_queue_size));
            }
            let items: Vec<QueueItem> = items.into_iter().take(added).collect();

            state.cancel_idle_timer();
            self.persist(guild, GuildConfigPatch::default().queue(state.queue.items()))
                .await?;

            let should_start = state.session.is_some() && state.queue.now_playing().is_none();
            (items, position, should_start)
        };

        if should_start {
            // Someone else may have started playback since, advance covers that
            self.advance(guild).await?;
            return Ok(EnqueueOutcome::Started { items });
        }

        self.deps
            .notifier
            .notify(Notice::Enqueued {
                guild,
                items: items.clone(),
                position,
            })
            .await;
        Ok(EnqueueOutcome::Queued { items, position })
    }

    /// Plays the next track; called when a track ends.
    pub async fn advance(&self, guild: GuildId) -> MusicResult<AdvanceOutcome> {
        self.advance_with(guild, false).await
    }

    /// Skips the current track, even when repeating a single track.
    pub async fn skip(&self, guild: GuildId) -> MusicResult<AdvanceOutcome> {
        self.advance_with(guild, true).await
    }

    async fn advance_with(&self, guild: GuildId, skip: bool) -> MusicResult<AdvanceOutcome> {
        let state = self.state(guild);

        let (generation, seed, requester, played) = {
            let mut state = state.lock().await;
            if state.session.is_none() {
                debug!("[{}] advance without a session", guild);
                return Ok(AdvanceOutcome::NotConnected);
            }
            state.cancel_idle_timer();

            let requester = state
                .queue
                .now_playing()
                .map(|item| item.requested_by);
            let next = if skip {
                state.queue.skip_track()
            } else {
                state.queue.next_track()
            };

            if let Some(item) = next {
                let outcome = self.play_locked(guild, &mut state, item.clone()).await;
                drop(state);
                return self.finish_play(guild, item, outcome, false).await;
            }

            self.persist(guild, Self::queue_patch(&state)).await?;
            (
                state.generation,
                state.queue.last_played().map(str::to_string),
                requester,
                state.queue.history().to_vec(),
            )
        };

        // Autoplay continues from a track that actually finished
        let (Some(seed), Some(requester)) = (seed, requester) else {
            return self.go_idle(guild, generation).await;
        };

        // Autoplay with the lock released
        let candidate = self.autoplay_candidate(guild, &seed, &played).await;

        let mut state = state.lock().await;
        if state.generation != generation || state.queue.now_playing().is_some() || state.session.is_none() {
            info!("🗑️ [{}] Discarding stale autoplay result", guild);
            return Ok(AdvanceOutcome::Discarded);
        }

        match candidate {
            Some(track) => {
                let item = QueueItem::autoplay(track, requester);
                state.queue.start(item.clone());
                let outcome = self.play_locked(guild, &mut state, item.clone()).await;
                drop(state);
                self.finish_play(guild, item, outcome, true).await
            }
            None => {
                drop(state);
                self.go_idle(guild, generation).await
            }
        }
    }

    /// First related track that has not been played yet and resolves.
    async fn autoplay_candidate(&self, guild: GuildId, seed: &str, played: &[String]) -> Option<Track> {
        let stubs = self.deps.related.get_related(seed).await;

        for stub in stubs
            .iter()
            .filter(|stub| !played.contains(&stub.identifier))
            .take(AUTOPLAY_ATTEMPTS)
        {
            match self.deps.resolver.get_track(&stub.uri, true).await {
                Ok(result) => {
                    if let Some(track) = result.tracks.into_iter().next() {
                        debug!("🎲 [{}] Autoplay picked {}", guild, stub.identifier);
                        return Some(track);
                    }
                }
                Err(e) => warn!("[{}] Autoplay candidate {} failed: {}", guild, stub.uri, e),
            }
        }

        info!("📭 [{}] No autoplay candidate for {}", guild, seed);
        None
    }

    /// Starts `item` (already in the now-playing slot) on the session.
    async fn play_locked(&self, guild: GuildId, state: &mut GuildState, item: QueueItem) -> MusicResult<()> {
        let Some(session) = state.session.clone() else {
            state.queue.clear_now_playing();
            return Err(MusicError::NotConnected);
        };

        if let Err(e) = self.deps.transport.play(&session, &item.track).await {
            error!("❌ [{}] Failed to play {}: {}", guild, item.title(), e);
            state.queue.clear_now_playing();
            if let Err(persist_err) = self.persist(guild, Self::queue_patch(state)).await {
                warn!("⚠️ [{}] Failed to save queue after play failure: {}", guild, persist_err);
            }
            return Err(e);
        }

        state.paused = false;
        self.persist(guild, Self::queue_patch(state)).await
    }

    async fn finish_play(
        &self,
        guild: GuildId,
        item: QueueItem,
        outcome: MusicResult<()>,
        autoplay: bool,
    ) -> MusicResult<AdvanceOutcome> {
        match outcome {
            Ok(()) => {
                self.deps
                    .notifier
                    .notify(Notice::NowPlaying {
                        guild,
                        item: item.clone(),
                    })
                    .await;
                Ok(if autoplay {
                    AdvanceOutcome::Autoplay(item)
                } else {
                    AdvanceOutcome::Playing(item)
                })
            }
            Err(e) => {
                if !matches!(e, MusicError::Persistence(_)) {
                    self.deps
                        .notifier
                        .notify(Notice::TrackError {
                            guild,
                            title: Some(item.title().to_string()),
                            message: e.to_string(),
                        })
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Leaves now, or arms the idle timer.
    async fn go_idle(&self, guild: GuildId, generation: u64) -> MusicResult<AdvanceOutcome> {
        if self.settings.idle_timeout.is_zero() {
            self.leave_if_idle(guild, generation).await;
            return Ok(AdvanceOutcome::Finished);
        }

        let state = self.state(guild);
        let mut state = state.lock().await;
        if state.generation != generation {
            return Ok(AdvanceOutcome::Discarded);
        }
        self.arm_idle_timer(guild, &mut state, generation);

        Ok(AdvanceOutcome::Finished)
    }

    /// Leaves after `idle_timeout` unless cancelled first. No-op without a timeout.
    fn arm_idle_timer(&self, guild: GuildId, state: &mut GuildState, generation: u64) {
        state.cancel_idle_timer();
        let timeout = self.settings.idle_timeout;
        if timeout.is_zero() {
            return;
        }

        let token = CancellationToken::new();
        state.idle_timer = Some(token.clone());
        let engine = self.me.clone();
        info!("⏱️ [{}] Idle, leaving in {}", guild, humantime::format_duration(timeout));

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(engine) = engine.upgrade() {
                        engine.leave_if_idle(guild, generation).await;
                    }
                }
            }
        });
    }

    async fn leave_if_idle(&self, guild: GuildId, generation: u64) {
        let state = self.state(guild);
        {
            let state = state.lock().await;
            if state.generation != generation || state.queue.now_playing().is_some() {
                return;
            }
        }

        info!("👋 [{}] Nothing left to play, leaving", guild);
        if let Err(e) = self.stop(guild, false).await {
            warn!("[{}] Error while leaving: {}", guild, e);
        }
        self.deps.notifier.notify(Notice::QueueEnded { guild }).await;
    }

    async fn close_session(&self, session: &Session) {
        if let Err(e) = self.deps.transport.close_session(session).await {
            warn!("[{}] Error closing session: {}", session.guild, e);
        }
    }

    /// Leaves the session and forgets play history. Safe to call repeatedly
    /// and while a resolution is in flight; late results are discarded.
    pub async fn stop(&self, guild: GuildId, clear_queue: bool) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;

        state.generation += 1;
        state.cancel_idle_timer();
        state.queue.clear_history();
        state.paused = false;

        if let Some(session) = state.session.take() {
            self.close_session(&session).await;
            debug!("[{}] Player leave", guild);
        }

        if clear_queue {
            state.queue.clear();
            state.queue.clear_now_playing();
            self.persist(
                guild,
                GuildConfigPatch::default().queue(Vec::new()).now_playing(None).position(0),
            )
            .await?;
        }

        Ok(())
    }

    /// Stops playback after the transport lost the voice connection.
    pub async fn handle_disconnect(&self, guild: GuildId) -> MusicResult<()> {
        self.deps.notifier.notify(Notice::Disconnected { guild }).await;
        self.stop(guild, false).await
    }

    /// Saves the volume and applies it live. Returns `false` when there is no
    /// session to apply it to.
    pub async fn set_volume(&self, guild: GuildId, volume: u16) -> MusicResult<bool> {
        debug!("Setting volume of guild {} to {}..", guild, volume);
        self.persist(guild, GuildConfigPatch::default().volume(volume)).await?;

        let session = self.state(guild).lock().await.session.clone();
        match session {
            Some(session) => {
                self.deps.transport.set_volume(&session, volume).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn pause(&self, guild: GuildId) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        let session = state.session.clone().ok_or(MusicError::NotConnected)?;

        self.deps.transport.pause(&session).await?;
        state.paused = true;
        info!("⏸️ [{}] Paused", guild);
        Ok(())
    }

    pub async fn resume(&self, guild: GuildId) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        let session = state.session.clone().ok_or(MusicError::NotConnected)?;

        self.deps.transport.resume(&session).await?;
        state.paused = false;
        info!("▶️ [{}] Resumed", guild);
        Ok(())
    }

    /// Binds the text channel the front end posts this guild's notices to.
    pub async fn set_text_channel(&self, guild: GuildId, channel: Option<ChannelId>) -> MusicResult<()> {
        match channel {
            Some(channel) => info!("💬 [{}] Text channel set to {}", guild, channel),
            None => info!("💬 [{}] Text channel cleared", guild),
        }
        self.persist(guild, GuildConfigPatch::default().text_channel(channel)).await
    }

    pub async fn text_channel(&self, guild: GuildId) -> MusicResult<Option<ChannelId>> {
        let config = self
            .deps
            .store
            .get_guild_config(guild)
            .await
            .map_err(MusicError::Persistence)?;
        Ok(config.text_channel_id)
    }

    pub async fn set_repeat(&self, guild: GuildId, mode: RepeatMode) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        state.queue.set_repeat(mode);
        self.persist(guild, GuildConfigPatch::default().repeat(mode)).await
    }

    /// Records a skip vote and returns the number of votes for the current track.
    pub async fn add_skipper(&self, guild: GuildId, user: UserId) -> usize {
        self.state(guild).lock().await.queue.add_skipper(user)
    }

    pub async fn remove(&self, guild: GuildId, index: usize) -> MusicResult<QueueItem> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        let removed = state.queue.remove(index)?;
        self.persist(guild, GuildConfigPatch::default().queue(state.queue.items()))
            .await?;
        Ok(removed)
    }

    pub async fn move_item(&self, guild: GuildId, from: usize, to: usize) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        state.queue.move_item(from, to)?;
        self.persist(guild, GuildConfigPatch::default().queue(state.queue.items()))
            .await
    }

    pub async fn shuffle(&self, guild: GuildId) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        state.queue.shuffle();
        self.persist(guild, GuildConfigPatch::default().queue(state.queue.items()))
            .await
    }

    pub async fn record_position(&self, guild: GuildId, position_ms: u64) -> MusicResult<()> {
        let state = self.state(guild);
        let mut state = state.lock().await;
        if state.queue.now_playing().is_none() {
            return Ok(());
        }
        state.queue.set_position(position_ms);
        self.persist(guild, GuildConfigPatch::default().position(position_ms))
            .await
    }

    pub async fn queue_snapshot(&self, guild: GuildId) -> QueueSnapshot {
        self.state(guild).lock().await.queue.snapshot()
    }

    pub async fn now_playing(&self, guild: GuildId) -> Option<QueueItem> {
        self.state(guild).lock().await.queue.now_playing().cloned()
    }

    pub async fn playing_state(&self, guild: GuildId) -> PlayingState {
        self.state(guild).lock().await.playing_state()
    }

    pub async fn members_queue(&self, guild: GuildId, user: UserId) -> Vec<QueueItem> {
        self.state(guild).lock().await.queue.members_queue(user)
    }

    pub async fn session(&self, guild: GuildId) -> Option<Session> {
        self.state(guild).lock().await.session.clone()
    }

    /// Leaves every session, keeping queues for the next start.
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.guilds.iter().map(|entry| *entry.key()).collect();
        info!("🛑 Stopping {} guild(s)", guilds.len());

        for guild in guilds {
            if let Err(e) = self.stop(guild, false).await {
                warn!("[{}] Error during shutdown: {}", guild, e);
            }
        }
    }
}
