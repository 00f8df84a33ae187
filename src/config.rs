use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection details for one audio node.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
}

impl NodeConfig {
    pub fn rest_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Nodes
    pub nodes: Vec<NodeConfig>,

    // Caches (seconds)
    pub track_cache_ttl: u64,
    pub related_cache_ttl: u64,
    pub cache_sweep_interval: u64,

    // HTTP (seconds)
    pub rest_timeout: u64,
    pub fetch_timeout: u64,

    // Related tracks
    pub related_error_retries: u32,
    pub related_empty_retries: u32,
    pub user_agent_draws: u32,

    // Playback
    pub default_volume: u16,
    pub max_queue_size: usize,
    /// Seconds to stay in an idle session before leaving; 0 leaves immediately
    pub idle_timeout: u64,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    /// Loads defaults, then an optional `lavaqueue.{toml,json,yaml}` file, then
    /// `LAVAQUEUE_*` environment variables (`__` separates nested keys).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("lavaqueue").required(false))
            .add_source(
                config::Environment::with_prefix("LAVAQUEUE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        // Single-node shortcut, handy for docker-compose setups
        if config.nodes.is_empty() {
            if let Ok(host) = std::env::var("LAVALINK_HOST") {
                config.nodes.push(NodeConfig {
                    name: "main".to_string(),
                    host,
                    port: std::env::var("LAVALINK_PORT")
                        .unwrap_or_else(|_| "2333".to_string())
                        .parse()
                        .context("LAVALINK_PORT is not a valid port")?,
                    password: std::env::var("LAVALINK_PASSWORD")
                        .unwrap_or_else(|_| "youshallnotpass".to_string()),
                    secure: false,
                });
            }
        }

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Node names must be unique and non-empty
    /// - TTLs and HTTP timeouts must be greater than zero
    /// - Volume must be between 0 and 1000
    /// - Queue size must be greater than zero
    pub fn validate(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                anyhow::bail!("Node #{} has an empty name", i);
            }
            if self.nodes[..i].iter().any(|n| n.name == node.name) {
                anyhow::bail!("Duplicate node name: {}", node.name);
            }
        }

        if self.track_cache_ttl == 0 || self.related_cache_ttl == 0 {
            anyhow::bail!("Cache TTLs must be greater than 0");
        }

        if self.rest_timeout == 0 || self.fetch_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than 0");
        }

        if self.user_agent_draws == 0 {
            anyhow::bail!("User agent draws must be greater than 0");
        }

        if self.default_volume > 1000 {
            anyhow::bail!("Default volume must be between 0 and 1000, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        Ok(())
    }

    pub fn track_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.track_cache_ttl)
    }

    pub fn related_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.related_cache_ttl)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval.max(1))
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Node passwords are never included.
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|n| format!("{}@{}", n.name, n.rest_url()))
            .collect();

        format!(
            "Config Summary:\n  \
            Nodes: [{}]\n  \
            Cache TTL: tracks {}, related {} (sweep every {})\n  \
            HTTP timeouts: rest {}, fetch {}\n  \
            Related retries: {} on error page, {} on empty\n  \
            Playback: {} volume, {} max queue, idle timeout {}",
            nodes.join(", "),
            humantime::format_duration(self.track_cache_ttl()),
            humantime::format_duration(self.related_cache_ttl()),
            humantime::format_duration(self.cache_sweep_interval()),
            humantime::format_duration(self.rest_timeout()),
            humantime::format_duration(self.fetch_timeout()),
            self.related_error_retries,
            self.related_empty_retries,
            self.default_volume,
            self.max_queue_size,
            humantime::format_duration(self.idle_timeout()),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),

            track_cache_ttl: 3600,    // 1 hour
            related_cache_ttl: 43200, // 12 hours
            cache_sweep_interval: 600,

            rest_timeout: 10,
            fetch_timeout: 15,

            related_error_retries: 1,
            related_empty_retries: 1,
            user_agent_draws: 16,

            default_volume: 100,
            max_queue_size: 1000,
            idle_timeout: 0,

            data_dir: "./data".into(),
        }
    }
}
