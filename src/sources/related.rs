//! Related-track discovery for autoplay.
//!
//! Related videos are scraped from the public watch page. Two layouts are
//! understood: the legacy server-rendered sidebar (`watch7-sidebar` up-next
//! anchor followed by the `watch-related` list) and the embedded
//! `compactVideoRenderer` JSON of the current page. Scraping is best effort;
//! every failure ends up as an empty list.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::{collections::HashSet, sync::Arc, sync::LazyLock, time::Duration};
use tracing::{debug, error, info, warn};
use url::Url;

use super::user_agent::UserAgentPool;
use super::RelatedStub;
use crate::cache::RelatedCache;

const YOUTUBE_BASE: &str = "https://www.youtube.com";

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"));

static CONTENT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div[^>]*class="[^"]*\bcontent-error\b[^"]*"[^>]*>\s*[^<\s]"#)
        .expect("valid content-error regex")
});

static SIDEBAR_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div[^>]*class="content-wrapper"[^>]*>\s*<a\b([^>]*)>"#).expect("valid anchor regex")
});

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_:-]+)="([^"]*)""#).expect("valid attribute regex"));

static COMPACT_RENDERER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""compactVideoRenderer":\{"videoId":"([A-Za-z0-9_-]{11})""#)
        .expect("valid renderer regex")
});

static RENDERER_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""title":\{(?:"runs":\[\{"text"|(?:"accessibility":\{"accessibilityData":\{"label":"(?:[^"\\]|\\.)*"\}\},)?"simpleText"):"((?:[^"\\]|\\.)*)""#)
        .expect("valid title regex")
});

/// Fetches a page body as text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String>;
}

/// [`PageFetcher`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("Error fetching {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response.text().await.context("Error reading page body")
    }
}

/// Cached related-track lookup with bounded retries.
pub struct RelatedResolver {
    cache: Arc<RelatedCache>,
    fetcher: Arc<dyn PageFetcher>,
    agents: UserAgentPool,
    error_retries: u32,
    empty_retries: u32,
}

impl RelatedResolver {
    pub fn new(cache: Arc<RelatedCache>, fetcher: Arc<dyn PageFetcher>, agents: UserAgentPool) -> Self {
        Self {
            cache,
            fetcher,
            agents,
            error_retries: 1,
            empty_retries: 1,
        }
    }

    /// Extra fetches allowed when the page is an error page, and when it parses to nothing.
    pub fn with_retries(mut self, error_retries: u32, empty_retries: u32) -> Self {
        self.error_retries = error_retries;
        self.empty_retries = empty_retries;
        self
    }

    pub fn cache(&self) -> &Arc<RelatedCache> {
        &self.cache
    }

    /// Ordered related stubs for `video_id`.
    ///
    /// Non-empty results are cached; an empty result is returned but not
    /// cached so the next call tries again. Never fails.
    pub async fn get_related(&self, video_id: &str) -> Vec<RelatedStub> {
        if let Some(stubs) = self.cache.get(video_id).filter(|s| !s.is_empty()) {
            debug!("📦 Cache Hit [{}], returns {} Items", video_id, stubs.len());
            return stubs;
        }

        debug!("No Cache Hits [{}], Fetch Related Videos..", video_id);
        self.fetch_related(video_id).await
    }

    async fn fetch_related(&self, video_id: &str) -> Vec<RelatedStub> {
        let mut html = self.fetch_page(video_id).await;

        let mut attempts = 0;
        while is_error_page(&html) && attempts < self.error_retries {
            warn!("⚠️ Failed to fetch [{}]... retrying..", video_id);
            html = self.fetch_page(video_id).await;
            attempts += 1;
        }

        let mut stubs = parse_related_html(&html, video_id);

        let mut attempts = 0;
        while stubs.is_empty() && attempts < self.empty_retries {
            warn!("⚠️ [{}] No related videos, retrying..", video_id);
            html = self.fetch_page(video_id).await;
            stubs = parse_related_html(&html, video_id);
            attempts += 1;
        }

        if !stubs.is_empty() {
            info!("🔗 Registering Cache [{}], {} Items", video_id, stubs.len());
            self.cache.set(video_id, stubs.clone());
        }

        stubs
    }

    /// Page body for `video_id`; a failed fetch reads as an empty page.
    async fn fetch_page(&self, video_id: &str) -> String {
        let ua = self.agents.get();
        debug!("Fetch {} via UA: {}", video_id, ua);
        match self.fetcher.fetch(&watch_url(video_id), &ua).await {
            Ok(html) => html,
            Err(e) => {
                error!("❌ Failed to fetch related videos for [{}]: {:#}", video_id, e);
                String::new()
            }
        }
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("{}/watch?v={}", YOUTUBE_BASE, urlencoding::encode(video_id))
}

/// Whether the page carries a non-empty `content-error` block.
pub fn is_error_page(html: &str) -> bool {
    CONTENT_ERROR.is_match(html)
}

/// Extracts related stubs in page order, up-next first.
///
/// Duplicates and `source_id` itself are dropped.
pub fn parse_related_html(html: &str, source_id: &str) -> Vec<RelatedStub> {
    let mut seen = HashSet::new();
    seen.insert(source_id.to_string());

    parse_legacy_sidebar(html)
        .into_iter()
        .chain(parse_compact_renderers(html))
        .filter(|stub| seen.insert(stub.identifier.clone()))
        .collect()
}

fn parse_legacy_sidebar(html: &str) -> Vec<RelatedStub> {
    let mut stubs = Vec::new();
    let related_start = html.find(r#"id="watch-related""#);

    if let Some(sidebar_start) = html.find("watch7-sidebar-modules") {
        let end = related_start.filter(|&i| i > sidebar_start).unwrap_or(html.len());
        // Only the first anchor is the up-next slot
        if let Some(stub) = SIDEBAR_ANCHOR
            .captures_iter(&html[sidebar_start..end])
            .find_map(|cap| anchor_stub(&cap[1]))
        {
            stubs.push(stub);
        }
    }

    if let Some(start) = related_start {
        let section = &html[start..];
        let section = section.find("</ul>").map_or(section, |end| &section[..end]);
        stubs.extend(
            SIDEBAR_ANCHOR
                .captures_iter(section)
                .filter_map(|cap| anchor_stub(&cap[1])),
        );
    }

    stubs
}

fn anchor_stub(attributes: &str) -> Option<RelatedStub> {
    let mut href = None;
    let mut title = None;
    for cap in ATTRIBUTE.captures_iter(attributes) {
        match &cap[1] {
            "href" => href = Some(decode_html_entities(&cap[2])),
            "title" => title = Some(decode_html_entities(&cap[2])),
            _ => {}
        }
    }

    let href = href?;
    let identifier = video_id_from_url(&href)?;
    let uri = if href.starts_with('/') {
        format!("https://youtube.com{}", href)
    } else {
        href
    };

    Some(RelatedStub {
        uri,
        identifier,
        title: title.unwrap_or_default(),
    })
}

fn parse_compact_renderers(html: &str) -> Vec<RelatedStub> {
    let matches: Vec<_> = COMPACT_RENDERER.captures_iter(html).collect();

    matches
        .iter()
        .enumerate()
        .filter_map(|(i, cap)| {
            let whole = cap.get(0)?;
            let id = cap.get(1)?.as_str();
            // Search for the title only inside this renderer's own object
            let end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |m| m.start());
            let title = RENDERER_TITLE
                .captures(&html[whole.end()..end])
                .map(|t| decode_json_string(&t[1]))
                .unwrap_or_default();

            Some(RelatedStub {
                uri: format!("https://youtube.com/watch?v={}", id),
                identifier: id.to_string(),
                title,
            })
        })
        .collect()
}

fn decode_html_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn decode_json_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

pub fn is_video_id(candidate: &str) -> bool {
    VIDEO_ID.is_match(candidate)
}

/// Video id of a YouTube URL (`watch?v=`, `youtu.be/`, `embed/`, `v/`,
/// `shorts/`), including site-relative links such as `/watch?v=...`.
pub fn video_id_from_url(input: &str) -> Option<String> {
    let url = Url::parse(input)
        .or_else(|_| Url::parse(YOUTUBE_BASE).and_then(|base| base.join(input)))
        .ok()?;

    let host = url.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(host);

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => {
            let from_query = url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned());

            from_query.or_else(|| {
                let mut segments = url.path_segments()?;
                match segments.next()? {
                    "embed" | "v" | "shorts" | "live" => segments.next().map(str::to_string),
                    _ => None,
                }
            })
        }
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Whether `url` points at a single YouTube video.
pub fn is_youtube_url(url: &str) -> bool {
    video_id_from_url(url).is_some()
}
