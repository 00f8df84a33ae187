use std::sync::Arc;
use tracing::{debug, info};

use super::{LoadResult, TrackLoader};
use crate::cache::TrackCache;
use crate::error::{MusicError, MusicResult};
use crate::nodes::NodePool;

/// Cached query resolution on the least-loaded node.
pub struct TrackResolver {
    nodes: Arc<NodePool>,
    loader: Arc<dyn TrackLoader>,
    cache: Arc<TrackCache>,
}

impl TrackResolver {
    pub fn new(nodes: Arc<NodePool>, loader: Arc<dyn TrackLoader>, cache: Arc<TrackCache>) -> Self {
        Self { nodes, loader, cache }
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        &self.cache
    }

    pub fn nodes(&self) -> &Arc<NodePool> {
        &self.nodes
    }

    /// Resolves `query`, consulting the track cache first when `use_cache`.
    ///
    /// Successful results are cached under the query, and every candidate
    /// track is also cached under its own identifier as a single-track
    /// result (unless that identifier is the query itself). `NO_MATCHES` and
    /// `LOAD_FAILED` are returned as [`MusicError::ResolutionFailed`] and
    /// never cached.
    pub async fn get_track(&self, query: &str, use_cache: bool) -> MusicResult<LoadResult> {
        if query.trim().is_empty() {
            return Err(MusicError::EmptyQuery);
        }

        if use_cache {
            if let Some(cached) = self.cache.get(query) {
                debug!("📦 Query Keyword: {} Cache Available, returns Data", query);
                return Ok(cached);
            }
        }

        let node = self.nodes.select_node(None)?;
        let result = self.loader.load_tracks(&node, query).await;

        if !result.is_success() {
            return Err(MusicError::ResolutionFailed {
                load_type: result.load_type,
                message: result.failure_message(),
            });
        }

        info!(
            "🎵 Resolved {} ({}, {} tracks) on node {}",
            query,
            result.load_type,
            result.tracks.len(),
            node.name
        );
        self.cache.set(query, result.clone());

        for track in result.tracks.iter().filter(|t| t.identifier() != query) {
            debug!("Registering identifier: {}", track.identifier());
            self.cache.set(track.identifier(), LoadResult::single(track.clone()));
        }

        Ok(result)
    }
}
