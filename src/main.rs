use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lavaqueue::cache::{RelatedCache, TrackCache};
use lavaqueue::nodes::NodeState;
use lavaqueue::sources::related::{is_video_id, video_id_from_url};
use lavaqueue::sources::user_agent::UserAgentPool;
use lavaqueue::sources::{HttpPageFetcher, LavalinkRestLoader, RelatedResolver, TrackResolver};
use lavaqueue::storage::JsonStorage;
use lavaqueue::{Config, NodePool};

const USAGE: &str = "Usage: lavaqueue [--health-check] [--related <video id or url>]... [query]...";

#[derive(Debug, Default)]
struct Args {
    health_check: bool,
    related: Vec<String>,
    queries: Vec<String>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--health-check" => parsed.health_check = true,
                "--related" => match args.next() {
                    Some(id) => parsed.related.push(id),
                    None => anyhow::bail!("--related needs a video id\n{}", USAGE),
                },
                "-h" | "--help" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                _ => parsed.queries.push(arg),
            }
        }

        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lavaqueue=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Starting lavaqueue v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse(std::env::args().skip(1))?;
    let config = Config::load()?;
    info!("{}", config.summary());

    let loader = Arc::new(LavalinkRestLoader::new(config.rest_timeout())?);
    let nodes = Arc::new(NodePool::from_config(&config.nodes));
    if nodes.is_empty() {
        anyhow::bail!("No audio nodes configured (set LAVAQUEUE_NODES or LAVALINK_HOST)");
    }
    check_nodes(&nodes, &loader).await;

    if args.health_check {
        return health_check(&nodes);
    }

    let storage = JsonStorage::new(config.data_dir.clone(), config.default_volume).await?;
    info!("{}", storage.get_storage_stats().await?);

    let track_cache = Arc::new(TrackCache::new("tracks", config.track_cache_ttl()));
    let related_cache = Arc::new(RelatedCache::new("related", config.related_cache_ttl()));

    let shutdown = CancellationToken::new();
    let sweepers = [
        track_cache.spawn_sweeper(config.cache_sweep_interval(), shutdown.clone()),
        related_cache.spawn_sweeper(config.cache_sweep_interval(), shutdown.clone()),
    ];

    let resolver = TrackResolver::new(nodes.clone(), loader, track_cache.clone());
    let related = RelatedResolver::new(
        related_cache.clone(),
        Arc::new(HttpPageFetcher::new(config.fetch_timeout())?),
        UserAgentPool::new(config.user_agent_draws),
    )
    .with_retries(config.related_error_retries, config.related_empty_retries);

    for query in &args.queries {
        match resolver.get_track(query, true).await {
            Ok(result) => {
                println!("{} → {} ({} tracks)", query, result.load_type, result.tracks.len());
                for track in result.tracks.iter().take(10) {
                    println!("  {} | {} - {}", track.identifier(), track.info.author, track.title());
                }
            }
            Err(e) => error!("❌ {}: {}", query, e),
        }
    }

    for input in &args.related {
        let id = if is_video_id(input) {
            Some(input.clone())
        } else {
            video_id_from_url(input)
        };
        let Some(id) = id else {
            warn!("'{}' is not a video id or watch url", input);
            continue;
        };

        let stubs = related.get_related(&id).await;
        println!("{} → {} related", id, stubs.len());
        for stub in &stubs {
            println!("  {} | {}", stub.identifier, stub.title);
        }
    }

    println!("{}", track_cache.stats());
    println!("{}", related_cache.stats());

    shutdown.cancel();
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            warn!("Cache sweeper ended abnormally: {}", e);
        }
    }

    Ok(())
}

/// Marks each node connected or disconnected depending on `GET /version`.
async fn check_nodes(nodes: &NodePool, loader: &LavalinkRestLoader) {
    for node in nodes.nodes() {
        match loader.version(&node).await {
            Ok(version) => {
                info!("✅ Node {} is up (Lavalink {})", node.name, version.trim());
                nodes.set_state(&node.name, NodeState::Connected);
            }
            Err(e) => {
                warn!("❌ Node {} is unreachable: {:#}", node.name, e);
                nodes.set_state(&node.name, NodeState::Disconnected);
            }
        }
    }
}

fn health_check(nodes: &NodePool) -> Result<()> {
    let usable = nodes.usable_nodes();
    if usable.is_empty() {
        anyhow::bail!("No audio node is reachable");
    }

    println!("OK ({}/{} nodes)", usable.len(), nodes.len());
    Ok(())
}
