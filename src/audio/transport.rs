use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};

use crate::error::MusicResult;
use crate::nodes::Node;
use crate::sources::Track;

/// A live voice session of one guild on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub node: String,
}

/// Voice/player transport to the audio nodes.
///
/// Implementations own the node websocket connections and report playback
/// through [`crate::events::PlayerEvent`]s.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioTransport: Send + Sync {
    async fn open_session(&self, node: &Node, guild: GuildId, channel: ChannelId) -> MusicResult<Session>;

    async fn close_session(&self, session: &Session) -> MusicResult<()>;

    /// Starts `track`, replacing whatever the session was playing.
    async fn play(&self, session: &Session, track: &Track) -> MusicResult<()>;

    async fn pause(&self, session: &Session) -> MusicResult<()>;

    async fn resume(&self, session: &Session) -> MusicResult<()>;

    async fn set_volume(&self, session: &Session, volume: u16) -> MusicResult<()>;
}
