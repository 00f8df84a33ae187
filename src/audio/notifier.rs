use async_trait::async_trait;
use serenity::model::id::GuildId;
use tracing::{info, warn};

use super::queue::QueueItem;

/// Something the chat front end may want to tell the guild about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying { guild: GuildId, item: QueueItem },
    Enqueued { guild: GuildId, items: Vec<QueueItem>, position: usize },
    QueueEnded { guild: GuildId },
    Disconnected { guild: GuildId },
    TrackError { guild: GuildId, title: Option<String>, message: String },
}

impl Notice {
    pub fn guild(&self) -> GuildId {
        match self {
            Notice::NowPlaying { guild, .. }
            | Notice::Enqueued { guild, .. }
            | Notice::QueueEnded { guild }
            | Notice::Disconnected { guild }
            | Notice::TrackError { guild, .. } => *guild,
        }
    }
}

/// Receives notices; rendering them is up to the implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) {
        match notice {
            Notice::NowPlaying { guild, item } => {
                info!("▶️ [{}] Now playing: {}", guild, item.title())
            }
            Notice::Enqueued { guild, items, position } => {
                info!("➕ [{}] {} track(s) queued at #{}", guild, items.len(), position)
            }
            Notice::QueueEnded { guild } => info!("📭 [{}] Queue ended", guild),
            Notice::Disconnected { guild } => warn!("🔌 [{}] Audio disconnected", guild),
            Notice::TrackError { guild, title, message } => warn!(
                "❌ [{}] Track error ({}): {}",
                guild,
                title.as_deref().unwrap_or("unknown"),
                message
            ),
        }
    }
}
