//! Hand-written fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use lavaqueue::audio::{AudioTransport, EngineDeps, EngineSettings, Notice, Notifier, QueueEngine, Session};
use lavaqueue::cache::{RelatedCache, TrackCache};
use lavaqueue::error::MusicResult;
use lavaqueue::nodes::{Node, NodePool, NodeState};
use lavaqueue::sources::user_agent::UserAgentPool;
use lavaqueue::sources::{LoadResult, LoadType, PageFetcher, PlaylistInfo, RelatedResolver, Track, TrackInfo, TrackLoader, TrackResolver};
use lavaqueue::storage::{GuildConfig, GuildConfigPatch, GuildStore};

pub fn guild() -> GuildId {
    GuildId::new(100)
}

pub fn channel() -> ChannelId {
    ChannelId::new(200)
}

pub fn track(id: &str) -> Track {
    Track {
        encoded: format!("QAAA{id}"),
        info: TrackInfo {
            identifier: id.to_string(),
            title: format!("Song {id}"),
            author: "Artist".to_string(),
            length: 180_000,
            is_stream: false,
            is_seekable: true,
            uri: Some(format!("https://youtube.com/watch?v={id}")),
            source_name: Some("youtube".to_string()),
        },
    }
}

pub fn connected_pool(names: &[&str]) -> Arc<NodePool> {
    let pool = NodePool::new();
    for name in names {
        let mut node = Node::new(*name, format!("http://{name}:2333"), "pw");
        node.state = NodeState::Connected;
        pool.add_node(node);
    }
    Arc::new(pool)
}

/// Resolves queries by convention:
/// - `fail:...` → `LOAD_FAILED`, `none:...` → `NO_MATCHES`
/// - `ytsearch:a,b,c` → a search result with one track per id
/// - `playlist:a,b,c` → a playlist with one track per id
/// - a watch URL → the video id as a track
/// - anything else → a track with the query as identifier
///
/// Queries listed in `gated` wait for [`FakeLoader::release`].
#[derive(Default)]
pub struct FakeLoader {
    pub calls: AtomicUsize,
    pub gated: Mutex<Vec<String>>,
    pub started: Notify,
    pub gate: Notify,
}

impl FakeLoader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn gate_query(&self, query: &str) {
        self.gated.lock().push(query.to_string());
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl TrackLoader for FakeLoader {
    async fn load_tracks(&self, _node: &Node, query: &str) -> LoadResult {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gated = self.gated.lock().iter().any(|q| q == query);
        if gated {
            self.started.notify_one();
            self.gate.notified().await;
        }

        if let Some(ids) = query.strip_prefix("playlist:") {
            return LoadResult {
                load_type: LoadType::PlaylistLoaded,
                playlist_info: Some(PlaylistInfo {
                    name: Some("Mix".to_string()),
                    selected_track: None,
                }),
                tracks: ids.split(',').map(track).collect(),
                exception: None,
            };
        }
        if query.starts_with("fail:") {
            return LoadResult::failed("This video is unavailable");
        }
        if query.starts_with("none:") {
            return LoadResult::no_matches();
        }
        if let Some(ids) = query.strip_prefix("ytsearch:") {
            return LoadResult {
                load_type: LoadType::SearchResult,
                playlist_info: None,
                tracks: ids.split(',').map(track).collect(),
                exception: None,
            };
        }
        if let Some((_, id)) = query.split_once("watch?v=") {
            return LoadResult::single(track(id));
        }

        LoadResult::single(track(query))
    }
}

/// Records what the engine asked the voice transport to do.
#[derive(Default)]
pub struct FakeTransport {
    pub played: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub volumes: Mutex<Vec<u16>>,
}

impl FakeTransport {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn open_session(&self, node: &Node, guild: GuildId, channel: ChannelId) -> MusicResult<Session> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            guild,
            channel,
            node: node.name.clone(),
        })
    }

    async fn close_session(&self, _session: &Session) -> MusicResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&self, _session: &Session, track: &Track) -> MusicResult<()> {
        self.played.lock().push(track.identifier().to_string());
        Ok(())
    }

    async fn pause(&self, _session: &Session) -> MusicResult<()> {
        Ok(())
    }

    async fn resume(&self, _session: &Session) -> MusicResult<()> {
        Ok(())
    }

    async fn set_volume(&self, _session: &Session, volume: u16) -> MusicResult<()> {
        self.volumes.lock().push(volume);
        Ok(())
    }
}

/// In-memory [`GuildStore`].
#[derive(Default)]
pub struct MemoryStore {
    pub guilds: Mutex<HashMap<GuildId, GuildConfig>>,
}

#[async_trait]
impl GuildStore for MemoryStore {
    async fn get_guild_config(&self, guild: GuildId) -> anyhow::Result<GuildConfig> {
        Ok(self
            .guilds
            .lock()
            .entry(guild)
            .or_insert_with(|| GuildConfig::new(guild, 100))
            .clone())
    }

    async fn update_guild_config(&self, guild: GuildId, patch: GuildConfigPatch) -> anyhow::Result<GuildConfig> {
        let mut guilds = self.guilds.lock();
        let config = guilds
            .entry(guild)
            .or_insert_with(|| GuildConfig::new(guild, 100));
        patch.apply(config);
        Ok(config.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn count(&self, pred: impl Fn(&Notice) -> bool) -> usize {
        self.notices.lock().iter().filter(|n| pred(n)).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Serves scripted pages per URL, repeating the last page once the script
/// runs out. Unknown URLs get an empty page, and URLs marked with
/// [`ScriptedFetcher::hang`] never answer.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub pages: Mutex<HashMap<String, VecDeque<String>>>,
    pub hung: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub hanging: Notify,
}

impl ScriptedFetcher {
    pub fn script(&self, url: &str, pages: &[&str]) {
        self.pages
            .lock()
            .insert(url.to_string(), pages.iter().map(|p| p.to_string()).collect());
    }

    pub fn hang(&self, url: &str) {
        self.hung.lock().push(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _user_agent: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let hung = self.hung.lock().iter().any(|u| u == url);
        if hung {
            self.hanging.notify_one();
            std::future::pending::<()>().await;
        }

        let mut pages = self.pages.lock();
        let Some(script) = pages.get_mut(url) else {
            return Ok(String::new());
        };
        let page = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(page.unwrap_or_default())
    }
}

/// Watch page listing `ids` as compact renderers.
pub fn related_page(ids: &[&str]) -> String {
    let renderers: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"compactVideoRenderer":{{"videoId":"{id}","title":{{"simpleText":"Song {id}"}}}}}}"#))
        .collect();
    format!(
        "<script>var ytInitialData = {{\"secondaryResults\":{{\"results\":[{}]}}}};</script>",
        renderers.join(",")
    )
}

pub struct Harness {
    pub engine: Arc<QueueEngine>,
    pub nodes: Arc<NodePool>,
    pub loader: Arc<FakeLoader>,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub track_cache: Arc<TrackCache>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::build(settings, Arc::new(MemoryStore::default()))
    }

    /// A fresh engine over an existing store, as after a restart.
    pub fn restarted(store: Arc<MemoryStore>) -> Self {
        Self::build(EngineSettings::default(), store)
    }

    fn build(settings: EngineSettings, store: Arc<MemoryStore>) -> Self {
        let nodes = connected_pool(&["main"]);
        let loader = Arc::new(FakeLoader::default());
        let transport = Arc::new(FakeTransport::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let track_cache = Arc::new(TrackCache::new("tracks", Duration::from_secs(3600)));

        let engine = QueueEngine::new(
            EngineDeps {
                nodes: nodes.clone(),
                resolver: Arc::new(TrackResolver::new(nodes.clone(), loader.clone(), track_cache.clone())),
                related: Arc::new(
                    RelatedResolver::new(
                        Arc::new(RelatedCache::new("related", Duration::from_secs(43200))),
                        fetcher.clone(),
                        UserAgentPool::new(4).with_seed(7),
                    )
                    .with_retries(0, 0),
                ),
                transport: transport.clone(),
                store: store.clone(),
                notifier: notifier.clone(),
            },
            settings,
        );

        Self {
            engine,
            nodes,
            loader,
            transport,
            store,
            notifier,
            fetcher,
            track_cache,
        }
    }
}
