use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

use super::{LoadResult, TrackLoader};
use crate::nodes::Node;

/// `loadtracks` client for Lavalink-compatible node REST APIs.
#[derive(Debug, Clone)]
pub struct LavalinkRestLoader {
    client: reqwest::Client,
}

impl LavalinkRestLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Asks the node for its version. Used as a liveness check.
    pub async fn version(&self, node: &Node) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/version", node.rest_url.trim_end_matches('/')))
            .header(reqwest::header::AUTHORIZATION, &node.password)
            .send()
            .await
            .with_context(|| format!("Node {} is unreachable", node.name))?;

        if !response.status().is_success() {
            anyhow::bail!("Node {} answered HTTP {}", node.name, response.status());
        }

        let version = response.text().await.context("Error reading version")?;
        Ok(version.trim().to_string())
    }

    async fn fetch(&self, node: &Node, query: &str) -> Result<LoadResult> {
        let url = format!("{}/loadtracks", node.rest_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .query(&[("identifier", query)])
            .header(reqwest::header::AUTHORIZATION, &node.password)
            .send()
            .await
            .context("Error sending loadtracks request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json::<LoadResult>()
            .await
            .context("Error parsing loadtracks response")
    }
}

#[async_trait]
impl TrackLoader for LavalinkRestLoader {
    async fn load_tracks(&self, node: &Node, query: &str) -> LoadResult {
        debug!("🔍 [{}] loadtracks: {}", node.name, query);

        match self.fetch(node, query).await {
            Ok(result) => result,
            Err(e) => {
                error!("❌ [{}] Query Keyword: {} {:#}", node.name, query, e);
                LoadResult::failed(format!("{:#}", e))
            }
        }
    }
}
