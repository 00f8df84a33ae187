//! # Sources Module
//!
//! Everything that turns user input into playable tracks.
//!
//! - [`resolver::TrackResolver`]: cached query → [`LoadResult`] resolution
//!   through the node pool
//! - [`lavalink::LavalinkRestLoader`]: the node REST `loadtracks` client
//! - [`related::RelatedResolver`]: "up next"/related scraping for autoplay
//! - [`user_agent`]: browser user agents for the related page fetches
//!
//! The data types mirror the node's `loadtracks` JSON payload so a response
//! can be deserialized, cached and handed back without conversion.

pub mod lavalink;
pub mod related;
pub mod resolver;
pub mod user_agent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nodes::Node;

pub use lavalink::LavalinkRestLoader;
pub use related::{HttpPageFetcher, PageFetcher, RelatedResolver};
pub use resolver::TrackResolver;

/// Outcome classification of a `loadtracks` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

impl LoadType {
    /// Whether the result carries tracks worth caching.
    pub fn is_success(self) -> bool {
        !matches!(self, LoadType::NoMatches | LoadType::LoadFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadType::TrackLoaded => "TRACK_LOADED",
            LoadType::PlaylistLoaded => "PLAYLIST_LOADED",
            LoadType::SearchResult => "SEARCH_RESULT",
            LoadType::NoMatches => "NO_MATCHES",
            LoadType::LoadFailed => "LOAD_FAILED",
        }
    }
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving one query on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub load_type: LoadType,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub exception: Option<LoadException>,
}

impl LoadResult {
    /// A `TRACK_LOADED` result wrapping one track.
    pub fn single(track: Track) -> Self {
        Self {
            load_type: LoadType::TrackLoaded,
            playlist_info: None,
            tracks: vec![track],
            exception: None,
        }
    }

    pub fn no_matches() -> Self {
        Self {
            load_type: LoadType::NoMatches,
            playlist_info: None,
            tracks: Vec::new(),
            exception: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            load_type: LoadType::LoadFailed,
            playlist_info: None,
            tracks: Vec::new(),
            exception: Some(LoadException {
                message: message.into(),
                severity: None,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.load_type.is_success()
    }

    pub fn first_track(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Human-readable failure reason, if any.
    pub fn failure_message(&self) -> String {
        match &self.exception {
            Some(e) if !e.message.is_empty() => e.message.clone(),
            _ => match self.load_type {
                LoadType::NoMatches => "No matches found".to_string(),
                other => format!("Load returned {}", other),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selected_track: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadException {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}

/// A resolved, playable track. `encoded` is opaque and only meaningful to
/// the node that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(alias = "track")]
    pub encoded: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// Length in milliseconds
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub is_seekable: bool,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
}

impl Track {
    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }
}

/// Unresolved reference to a candidate next track, scraped from a video page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedStub {
    pub uri: String,
    pub identifier: String,
    pub title: String,
}

/// Resolves a query on one node.
///
/// Transport failures are reported as a `LOAD_FAILED` result rather than an
/// error so the caller handles every outcome the same way.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load_tracks(&self, node: &Node, query: &str) -> LoadResult;
}

#[cfg(test)]
pub(crate) fn test_track(identifier: &str) -> Track {
    Track {
        encoded: format!("QAAA{identifier}"),
        info: TrackInfo {
            identifier: identifier.to_string(),
            title: format!("Track {identifier}"),
            author: "Someone".to_string(),
            length: 212_000,
            is_stream: false,
            is_seekable: true,
            uri: Some(format!("https://www.youtube.com/watch?v={identifier}")),
            source_name: Some("youtube".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_v3_search_result() {
        let json = r#"{
            "loadType": "SEARCH_RESULT",
            "playlistInfo": {},
            "tracks": [{
                "track": "QAAAjQIAJFJpY2sg",
                "info": {
                    "identifier": "dQw4w9WgXcQ",
                    "isSeekable": true,
                    "author": "Rick Astley",
                    "length": 212000,
                    "isStream": false,
                    "position": 0,
                    "title": "Never Gonna Give You Up",
                    "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                    "sourceName": "youtube"
                }
            }]
        }"#;

        let result: LoadResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.load_type, LoadType::SearchResult);
        assert!(result.is_success());
        let track = result.first_track().unwrap();
        assert_eq!(track.encoded, "QAAAjQIAJFJpY2sg");
        assert_eq!(track.identifier(), "dQw4w9WgXcQ");
        assert_eq!(track.info.length, 212_000);
    }

    #[test]
    fn deserializes_load_failed() {
        let json = r#"{
            "loadType": "LOAD_FAILED",
            "playlistInfo": {},
            "tracks": [],
            "exception": {"message": "Video unavailable", "severity": "COMMON"}
        }"#;

        let result: LoadResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_success());
        assert_eq!(result.failure_message(), "Video unavailable");
        assert_eq!(LoadResult::no_matches().failure_message(), "No matches found");
    }

    #[test]
    fn load_type_display_matches_wire_format() {
        assert_eq!(LoadType::PlaylistLoaded.to_string(), "PLAYLIST_LOADED");
        assert_eq!(
            serde_json::to_string(&LoadType::NoMatches).unwrap(),
            r#""NO_MATCHES""#
        );
    }
}
