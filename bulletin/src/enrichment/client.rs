use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::extraction::{article_metadata, check_single_article, collapse_whitespace, is_image_url, resolve_url};
use crate::fanout;
use crate::model::ArticleMetadata;

/// Full-page data for one article URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedContent {
    pub url: String,
    pub title: String,
    pub full_content: String,
    pub author: Option<String>,
    pub published_date: Option<String>,
    pub image_url: Option<String>,
    pub metadata: Option<ArticleMetadata>,
}

/// Per-URL result of a batch.
pub type UrlOutcome = (String, Result<EnrichedContent>);

#[async_trait::async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Fetch every URL with at most `concurrency` requests in flight.
    /// An `Err` means the batch as a whole could not run.
    async fn enrich_urls(&self, urls: &[String], concurrency: usize) -> Result<Vec<UrlOutcome>>;
}

/// Client for a crawl service exposing `POST {base_url}/crawl`.
pub struct CrawlServiceClient {
    base_url: String,
    client: Client,
}

impl CrawlServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("bulletin/0.1.0")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(cfg: &common::EnrichmentConfig) -> Result<Self> {
        let base_url = cfg
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11235".to_string());
        Self::new(base_url, Duration::from_secs(cfg.timeout_seconds.unwrap_or(300)))
    }

    pub async fn enrich_one(&self, url: &str) -> Result<EnrichedContent> {
        if is_image_url(url) {
            anyhow::bail!("skipping image url {}", url);
        }

        let body = json!({
            "urls": [url],
            "browser_config": {"type": "BrowserConfig", "params": {"headless": true, "verbose": false}},
            "crawler_config": {"type": "CrawlerRunConfig", "params": {"word_count_threshold": 0}},
        });

        let response = self
            .client
            .post(format!("{}/crawl", self.base_url))
            .json(&body)
            .send()
            .await
            .context("crawl request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("crawl service error {}: {}", status, text);
        }

        let raw = response.text().await.context("failed to read crawl response body")?;
        let parsed: CrawlResponse = serde_json::from_str(&strip_control_chars(&raw))
            .context("failed to parse crawl response")?;

        if !parsed.success {
            anyhow::bail!(
                "crawl service reported failure: {}",
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        let result = parsed
            .results
            .into_iter()
            .next()
            .context("crawl response has no results")?;
        parse_page(url, result)
    }
}

#[async_trait::async_trait]
impl EnrichmentClient for CrawlServiceClient {
    async fn enrich_urls(&self, urls: &[String], concurrency: usize) -> Result<Vec<UrlOutcome>> {
        let out = fanout::bounded(urls.to_vec(), concurrency, |url: String| async move {
            self.enrich_one(&url).await
        })
        .await;

        debug!(ok = out.successes.len(), failed = out.failures.len(), "crawl batch finished");
        Ok(out
            .successes
            .into_iter()
            .map(|(u, c)| (u, Ok(c)))
            .chain(out.failures.into_iter().map(|(u, e)| (u, Err(e))))
            .collect())
    }
}

fn parse_page(requested_url: &str, result: CrawlResult) -> Result<EnrichedContent> {
    if result.success == Some(false) {
        anyhow::bail!(
            "crawl failed for {}: {}",
            requested_url,
            result.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let markdown = result.markdown.and_then(MarkdownField::best);
    let content = match markdown {
        Some(md) => md,
        None => result
            .cleaned_html
            .or(result.html)
            .map(|h| html_text(&h))
            .unwrap_or_default(),
    };

    let meta = result.metadata.unwrap_or_default();
    let title = meta
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| markdown_title(&content))
        .unwrap_or_default();

    check_single_article(&title, &content).map_err(|reason| anyhow::anyhow!("{}: {}", requested_url, reason))?;

    let image_url = result
        .media
        .unwrap_or_default()
        .images
        .into_iter()
        .filter_map(|img| img.src)
        .filter(|src| !src.starts_with("data:"))
        .find_map(|src| resolve_url(requested_url, &src));

    let full_content = content.trim().to_string();
    Ok(EnrichedContent {
        url: requested_url.to_string(),
        title: collapse_whitespace(&title),
        metadata: Some(article_metadata(&full_content)),
        full_content,
        author: meta.author.filter(|a| !a.trim().is_empty()),
        published_date: meta.published_date,
        image_url,
    })
}

/// First `# heading` line of a markdown document.
fn markdown_title(md: &str) -> Option<String> {
    md.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn html_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Drop ASCII control characters other than newline, carriage return and tab.
fn strip_control_chars(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<CrawlResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrawlResult {
    success: Option<bool>,
    markdown: Option<MarkdownField>,
    html: Option<String>,
    cleaned_html: Option<String>,
    metadata: Option<PageMetadata>,
    media: Option<Media>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarkdownField {
    Plain(String),
    Rich {
        raw_markdown: Option<String>,
        fit_markdown: Option<String>,
    },
}

impl MarkdownField {
    fn best(self) -> Option<String> {
        let picked = match self {
            MarkdownField::Plain(s) => Some(s),
            MarkdownField::Rich {
                raw_markdown,
                fit_markdown,
            } => fit_markdown.filter(|s| !s.trim().is_empty()).or(raw_markdown),
        };
        picked.filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    title: Option<String>,
    author: Option<String>,
    #[serde(alias = "article:published_time", alias = "publishedDate")]
    published_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    #[serde(default)]
    images: Vec<MediaImage>,
}

#[derive(Debug, Deserialize)]
struct MediaImage {
    src: Option<String>,
}
