use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::error::{MusicError, MusicResult};
use crate::sources::Track;

/// Oldest identifiers are forgotten past this many plays.
const MAX_HISTORY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub track: Track,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
    /// Picked by autoplay rather than requested
    #[serde(default)]
    pub autoplay: bool,
}

impl QueueItem {
    pub fn new(track: Track, requested_by: UserId) -> Self {
        Self {
            track,
            requested_by,
            added_at: Utc::now(),
            autoplay: false,
        }
    }

    pub fn autoplay(track: Track, requested_by: UserId) -> Self {
        Self {
            autoplay: true,
            ..Self::new(track, requested_by)
        }
    }

    pub fn title(&self) -> &str {
        self.track.title()
    }

    pub fn identifier(&self) -> &str {
        self.track.identifier()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.track.info.length)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatMode {
    #[default]
    None,
    /// Finished tracks go back to the end of the queue
    All,
    /// The current track replays until skipped
    Single,
}

impl RepeatMode {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(RepeatMode::None),
            1 => Some(RepeatMode::All),
            2 => Some(RepeatMode::Single),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            RepeatMode::None => 0,
            RepeatMode::All => 1,
            RepeatMode::Single => 2,
        }
    }

    /// None → All → Single → None
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::Single,
            RepeatMode::Single => RepeatMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayingState {
    Playing,
    Paused,
    None,
}

impl PlayingState {
    /// `None` without a current track, `Paused` when there is a track but no
    /// active player, `Playing` otherwise.
    pub fn from_parts(has_track: bool, player_active: bool) -> Self {
        match (has_track, player_active) {
            (false, _) => PlayingState::None,
            (true, false) => PlayingState::Paused,
            (true, true) => PlayingState::Playing,
        }
    }
}

/// Queue, now-playing slot, skip votes and play history of one guild.
#[derive(Debug)]
pub struct GuildQueue {
    items: VecDeque<QueueItem>,
    now_playing: Option<QueueItem>,
    position_ms: u64,
    repeat: RepeatMode,
    skippers: HashSet<UserId>,
    history: Vec<String>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            now_playing: None,
            position_ms: 0,
            repeat: RepeatMode::None,
            skippers: HashSet::new(),
            history: Vec::new(),
            max_size,
        }
    }

    /// Replaces queue contents with a persisted snapshot, capped at `max_size`.
    pub fn restore(&mut self, items: Vec<QueueItem>, repeat: RepeatMode) {
        self.items = items.into_iter().take(self.max_size).collect();
        self.repeat = repeat;
        debug!("Restored {} queued tracks", self.items.len());
    }

    pub fn push(&mut self, item: QueueItem) -> MusicResult<usize> {
        if self.items.len() >= self.max_size {
            return Err(MusicError::QueueFull(self.max_size));
        }

        info!("➕ Added to queue: {}", item.title());
        self.items.push_back(item);
        Ok(self.items.len())
    }

    /// Queues as many items as fit and returns how many were added.
    pub fn extend(&mut self, items: Vec<QueueItem>) -> usize {
        let space = self.max_size.saturating_sub(self.items.len());
        let added = items.len().min(space);
        self.items.extend(items.into_iter().take(added));
        info!("➕ Added {} tracks to queue", added);
        added
    }

    /// Moves to the next track according to the repeat mode.
    ///
    /// `Single` keeps the current track, `All` re-appends the finished track
    /// behind the rest while the queue has room, `None` pops. Returns `None` and clears the now-playing
    /// slot when nothing is left.
    pub fn next_track(&mut self) -> Option<QueueItem> {
        self.next_with(self.repeat)
    }

    /// Like [`GuildQueue::next_track`], but never replays the current track.
    pub fn skip_track(&mut self) -> Option<QueueItem> {
        let mode = match self.repeat {
            RepeatMode::Single => RepeatMode::None,
            other => other,
        };
        self.next_with(mode)
    }

    fn next_with(&mut self, mode: RepeatMode) -> Option<QueueItem> {
        if mode == RepeatMode::Single {
            if let Some(current) = self.now_playing.clone() {
                info!("🔂 Repeating track: {}", current.title());
                self.start(current.clone());
                return Some(current);
            }
        }

        let finished = self.now_playing.take();
        let mut next = self.items.pop_front();

        if let (RepeatMode::All, Some(finished)) = (mode, finished) {
            if next.is_none() {
                next = Some(finished);
            } else if self.is_full() {
                warn!("🔁 Queue full, not re-queueing: {}", finished.title());
            } else {
                debug!("🔁 Re-queued by repeat: {}", finished.title());
                self.items.push_back(finished);
            }
        }

        match next {
            Some(next) => {
                info!("➡️ Next in queue: {}", next.title());
                self.start(next.clone());
                Some(next)
            }
            None => {
                self.position_ms = 0;
                self.skippers.clear();
                None
            }
        }
    }

    /// Puts `item` in the now-playing slot without touching the queue.
    pub fn start(&mut self, item: QueueItem) {
        self.record_played(item.identifier());
        self.now_playing = Some(item);
        self.position_ms = 0;
        self.skippers.clear();
    }

    /// Puts an interrupted track back in front of the queue.
    pub fn requeue_current(&mut self) {
        if let Some(item) = self.clear_now_playing() {
            self.items.push_front(item);
        }
    }

    pub fn clear_now_playing(&mut self) -> Option<QueueItem> {
        self.position_ms = 0;
        self.skippers.clear();
        self.now_playing.take()
    }

    pub fn now_playing(&self) -> Option<&QueueItem> {
        self.now_playing.as_ref()
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn set_position(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        match mode {
            RepeatMode::None => info!("➡️ Repeat disabled"),
            RepeatMode::All => info!("🔁 Repeat queue enabled"),
            RepeatMode::Single => info!("🔂 Repeat track enabled"),
        }
    }

    /// Registers a skip vote for the current track; returns the vote count.
    pub fn add_skipper(&mut self, user: UserId) -> usize {
        self.skippers.insert(user);
        self.skippers.len()
    }

    pub fn skippers(&self) -> usize {
        self.skippers.len()
    }

    fn record_played(&mut self, identifier: &str) {
        self.history.push(identifier.to_string());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
    }

    pub fn has_played(&self, identifier: &str) -> bool {
        self.history.iter().any(|id| id == identifier)
    }

    pub fn last_played(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn remove(&mut self, index: usize) -> MusicResult<QueueItem> {
        let item = self
            .items
            .remove(index)
            .ok_or(MusicError::IndexOutOfRange(index))?;
        debug!("❌ Removed track at position {}", index);
        Ok(item)
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> MusicResult<()> {
        if from >= self.items.len() {
            return Err(MusicError::IndexOutOfRange(from));
        }
        if to >= self.items.len() {
            return Err(MusicError::IndexOutOfRange(to));
        }

        if from != to {
            if let Some(item) = self.items.remove(from) {
                self.items.insert(to, item);
            }
            debug!("📍 Moved track from position {} to {}", from, to);
        }
        Ok(())
    }

    pub fn shuffle(&mut self) {
        let mut items: Vec<_> = self.items.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        self.items.extend(items);
        info!("🔀 Queue shuffled");
    }

    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Queue cleared");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    pub fn members_queue(&self, user: UserId) -> Vec<QueueItem> {
        self.items
            .iter()
            .filter(|item| item.requested_by == user)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let items = self.items();
        let total_duration = items
            .iter()
            .chain(self.now_playing.iter())
            .filter(|item| !item.track.info.is_stream)
            .map(QueueItem::duration)
            .sum();

        QueueSnapshot {
            now_playing: self.now_playing.clone(),
            position_ms: self.position_ms,
            repeat: self.repeat,
            skippers: self.skippers.len(),
            items,
            total_duration,
        }
    }
}

/// Point-in-time copy of a guild queue for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub now_playing: Option<QueueItem>,
    pub position_ms: u64,
    pub repeat: RepeatMode,
    pub skippers: usize,
    pub items: Vec<QueueItem>,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        let per_page = per_page.max(1);
        let current_page = page.max(1);
        let start = (current_page - 1).saturating_mul(per_page);
        let end = start.saturating_add(per_page).min(self.items.len());

        QueuePage {
            items: self.items.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            current_page,
            total_pages: self.items.len().div_ceil(per_page).max(1),
            total_items: self.items.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<QueueItem>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
