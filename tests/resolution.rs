mod common;

use common::{connected_pool, related_page, FakeLoader, ScriptedFetcher};
use lavaqueue::cache::{RelatedCache, TrackCache};
use lavaqueue::nodes::NodeState;
use lavaqueue::sources::related::watch_url;
use lavaqueue::sources::user_agent::UserAgentPool;
use lavaqueue::sources::{LoadType, RelatedResolver, TrackResolver};
use lavaqueue::MusicError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn resolver(loader: Arc<FakeLoader>, ttl: Duration) -> TrackResolver {
    TrackResolver::new(
        connected_pool(&["main"]),
        loader,
        Arc::new(TrackCache::new("tracks", ttl)),
    )
}

#[tokio::test(start_paused = true)]
async fn cached_tracks_expire_after_their_ttl() {
    let loader = Arc::new(FakeLoader::default());
    let resolver = resolver(loader.clone(), Duration::from_secs(3600));

    resolver.get_track("lofi beats", true).await.unwrap();
    tokio::time::advance(Duration::from_secs(3599)).await;
    resolver.get_track("lofi beats", true).await.unwrap();
    assert_eq!(loader.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    resolver.get_track("lofi beats", true).await.unwrap();
    assert_eq!(loader.calls(), 2);

    let stats = resolver.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn failed_lookups_are_retried_every_time() {
    let loader = Arc::new(FakeLoader::default());
    let resolver = resolver(loader.clone(), Duration::from_secs(3600));

    for _ in 0..2 {
        let err = resolver.get_track("fail:abc", true).await.unwrap_err();
        assert!(matches!(
            err,
            MusicError::ResolutionFailed {
                load_type: LoadType::LoadFailed,
                ..
            }
        ));
    }
    let err = resolver.get_track("none:abc", true).await.unwrap_err();
    assert!(matches!(
        err,
        MusicError::ResolutionFailed {
            load_type: LoadType::NoMatches,
            ..
        }
    ));

    assert_eq!(loader.calls(), 3);
    assert!(resolver.cache().is_empty());
}

#[tokio::test]
async fn search_candidates_are_reachable_by_identifier() {
    let loader = Arc::new(FakeLoader::default());
    let resolver = resolver(loader.clone(), Duration::from_secs(3600));

    let result = resolver.get_track("ytsearch:aaa,bbb", true).await.unwrap();
    assert_eq!(result.tracks.len(), 2);

    let by_id = resolver.get_track("bbb", true).await.unwrap();
    assert_eq!(by_id.load_type, LoadType::TrackLoaded);
    assert_eq!(by_id.tracks[0].identifier(), "bbb");
    assert_eq!(loader.calls(), 1);

    // Bypassing the cache always asks a node
    resolver.get_track("bbb", false).await.unwrap();
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn resolution_follows_node_health() {
    let loader = Arc::new(FakeLoader::default());
    let nodes = connected_pool(&["eu", "us"]);
    let resolver = TrackResolver::new(
        nodes.clone(),
        loader.clone(),
        Arc::new(TrackCache::new("tracks", Duration::from_secs(60))),
    );

    nodes.set_penalty("eu", 300);
    nodes.set_penalty("us", 20);
    assert_eq!(nodes.select_node(None).unwrap().name, "us");
    assert_eq!(nodes.select_node(Some("eu")).unwrap().name, "eu");

    nodes.set_state("us", NodeState::Disconnected);
    assert_eq!(nodes.select_node(Some("us")).unwrap().name, "eu");

    nodes.set_state("eu", NodeState::Connecting);
    let err = resolver.get_track("anything", true).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn related_lookup_retries_error_pages_and_caches() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let error_page = r#"<div id="player-unavailable"><div class="content-error">This video is unavailable.</div></div>"#;
    let page = related_page(&["bbbbbbbbbbb", "ccccccccccc"]);
    fetcher.script(&watch_url("aaaaaaaaaaa"), &[error_page, page.as_str()]);

    let related = RelatedResolver::new(
        Arc::new(RelatedCache::new("related", Duration::from_secs(43200))),
        fetcher.clone(),
        UserAgentPool::new(4),
    )
    .with_retries(1, 1);

    let stubs = related.get_related("aaaaaaaaaaa").await;
    let ids: Vec<&str> = stubs.iter().map(|s| s.identifier.as_str()).collect();
    assert_eq!(ids, vec!["bbbbbbbbbbb", "ccccccccccc"]);
    assert_eq!(stubs[0].title, "Song bbbbbbbbbbb");
    assert_eq!(fetcher.calls(), 2);

    let again = related.get_related("aaaaaaaaaaa").await;
    assert_eq!(again, stubs);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn related_lookup_gives_up_after_bounded_retries() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let related = RelatedResolver::new(
        Arc::new(RelatedCache::new("related", Duration::from_secs(43200))),
        fetcher.clone(),
        UserAgentPool::new(4),
    )
    .with_retries(1, 2);

    assert!(related.get_related("zzzzzzzzzzz").await.is_empty());
    // One fetch plus two empty-page retries
    assert_eq!(fetcher.calls(), 3);
    assert!(related.cache().is_empty());
}
