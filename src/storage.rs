use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::audio::queue::{QueueItem, RepeatMode};

/// Per-guild settings and playback state stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    pub guild_id: u64,
    pub volume: u16,
    pub queue: Vec<QueueItem>,
    pub now_playing: Option<QueueItem>,
    pub now_playing_position: u64,
    pub repeat: RepeatMode,
    pub text_channel_id: Option<ChannelId>,
}

impl GuildConfig {
    pub fn new(guild: GuildId, volume: u16) -> Self {
        Self {
            guild_id: guild.get(),
            volume,
            ..Default::default()
        }
    }
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            volume: 100,
            queue: Vec::new(),
            now_playing: None,
            now_playing_position: 0,
            repeat: RepeatMode::None,
            text_channel_id: None,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildConfigPatch {
    pub volume: Option<u16>,
    pub queue: Option<Vec<QueueItem>>,
    pub now_playing: Option<Option<QueueItem>>,
    pub now_playing_position: Option<u64>,
    pub repeat: Option<RepeatMode>,
    pub text_channel_id: Option<Option<ChannelId>>,
}

impl GuildConfigPatch {
    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn queue(mut self, queue: Vec<QueueItem>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn now_playing(mut self, item: Option<QueueItem>) -> Self {
        self.now_playing = Some(item);
        self
    }

    pub fn position(mut self, position_ms: u64) -> Self {
        self.now_playing_position = Some(position_ms);
        self
    }

    pub fn repeat(mut self, mode: RepeatMode) -> Self {
        self.repeat = Some(mode);
        self
    }

    pub fn text_channel(mut self, channel: Option<ChannelId>) -> Self {
        self.text_channel_id = Some(channel);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, config: &mut GuildConfig) {
        if let Some(volume) = self.volume {
            config.volume = volume;
        }
        if let Some(queue) = self.queue {
            config.queue = queue;
        }
        if let Some(now_playing) = self.now_playing {
            config.now_playing = now_playing;
        }
        if let Some(position) = self.now_playing_position {
            config.now_playing_position = position;
        }
        if let Some(repeat) = self.repeat {
            config.repeat = repeat;
        }
        if let Some(channel) = self.text_channel_id {
            config.text_channel_id = channel;
        }
    }
}

/// Guild configuration persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildStore: Send + Sync {
    /// Returns the stored config, or defaults for an unknown guild.
    async fn get_guild_config(&self, guild: GuildId) -> Result<GuildConfig>;

    async fn update_guild_config(&self, guild: GuildId, patch: GuildConfigPatch) -> Result<GuildConfig>;
}

/// Cached config of one guild; `None` until the file has been read.
type GuildSlot = Arc<Mutex<Option<GuildConfig>>>;

/// One JSON file per guild under `<data_dir>/guilds`, cached in memory.
///
/// Each guild has its own lock, so a slow write only holds up that guild.
pub struct JsonStorage {
    data_dir: PathBuf,
    default_volume: u16,
    guilds: DashMap<u64, GuildSlot>,
}

impl JsonStorage {
    pub async fn new(data_dir: impl Into<PathBuf>, default_volume: u16) -> Result<Self> {
        let data_dir = data_dir.into();
        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir)
            .await
            .with_context(|| format!("Failed to create {}", guilds_dir.display()))?;

        info!("📁 Storage initialized at: {}", data_dir.display());

        let storage = Self {
            data_dir,
            default_volume,
            guilds: DashMap::new(),
        };
        storage.load_all_guilds().await?;

        Ok(storage)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn list_guilds(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.guilds.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(self.guilds_dir()).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            guild_configs: file_count,
            cached_configs: self.guilds.len(),
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    /// Reads the guild file; `None` when it does not exist yet.
    async fn load_guild_config(&self, guild_id: u64) -> Result<Option<GuildConfig>> {
        let path = self.guild_file_path(guild_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        serde_json::from_str(&content)
            .map(Some)
            .with_context(|| format!("Corrupt guild file {}", path.display()))
    }

    /// The cached config in `slot`, reading the file or creating defaults on first use.
    async fn loaded<'a>(&self, guild: GuildId, slot: &'a mut Option<GuildConfig>) -> Result<&'a mut GuildConfig> {
        let config = match slot.take() {
            Some(config) => config,
            None => match self.load_guild_config(guild.get()).await? {
                Some(config) => config,
                None => {
                    let config = GuildConfig::new(guild, self.default_volume);
                    self.save_guild_config(&config).await?;
                    info!("📝 Default config created for guild {}", guild);
                    config
                }
            },
        };

        Ok(slot.insert(config))
    }

    fn slot(&self, guild_id: u64) -> GuildSlot {
        self.guilds.entry(guild_id).or_default().clone()
    }

    async fn save_guild_config(&self, config: &GuildConfig) -> Result<()> {
        let path = self.guild_file_path(config.guild_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn load_all_guilds(&self) -> Result<()> {
        let mut files = fs::read_dir(self.guilds_dir()).await?;
        let mut loaded = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match self.load_guild_config(guild_id).await {
                Ok(Some(config)) => {
                    self.guilds.insert(guild_id, Arc::new(Mutex::new(Some(config))));
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Error loading config for guild {}: {:#}", guild_id, e),
            }
        }

        if loaded > 0 {
            info!("📂 Loaded {} guild configs", loaded);
        }

        Ok(())
    }

    fn guilds_dir(&self) -> PathBuf {
        self.data_dir.join("guilds")
    }

    fn guild_file_path(&self, guild_id: u64) -> PathBuf {
        self.guilds_dir().join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl GuildStore for JsonStorage {
    async fn get_guild_config(&self, guild: GuildId) -> Result<GuildConfig> {
        let slot = self.slot(guild.get());
        let mut slot = slot.lock().await;
        Ok(self.loaded(guild, &mut slot).await?.clone())
    }

    async fn update_guild_config(&self, guild: GuildId, patch: GuildConfigPatch) -> Result<GuildConfig> {
        let slot = self.slot(guild.get());
        let mut slot = slot.lock().await;
        let config = self.loaded(guild, &mut slot).await?;
        if patch.is_empty() {
            return Ok(config.clone());
        }

        // The cache only changes once the file is written
        let mut updated = config.clone();
        patch.apply(&mut updated);
        self.save_guild_config(&updated).await?;
        *config = updated.clone();

        debug!("💾 Config updated for guild {}", guild);
        Ok(updated)
    }
}

#[derive(Debug)]
pub struct StorageStats {
    pub guild_configs: usize,
    pub cached_configs: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Guild Configs: {} files\n\
             💾 Cached Configs: {} in memory\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.guild_configs,
            self.cached_configs,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}
