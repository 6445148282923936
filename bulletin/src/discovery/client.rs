use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::extraction::RawDocument;
use crate::model::ScrapeConfig;

/// Fetches one listing page and returns its markdown/HTML rendition.
#[async_trait::async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn fetch(&self, url: &str, options: &ScrapeConfig) -> Result<RawDocument>;
}

/// Extra time the HTTP client waits beyond the timeout handed to the service, so a reply
/// produced right at the service deadline still arrives.
pub const TRANSPORT_SLACK: Duration = Duration::from_secs(10);

fn transport_timeout(service_timeout: Duration) -> Duration {
    service_timeout + TRANSPORT_SLACK
}

/// Client for a hosted "scrape" endpoint: `POST {api_url}` returning `{success, data:{markdown, html}}`.
pub struct RemoteDiscoveryClient {
    api_url: String,
    api_key: Option<String>,
    timeout: Duration,
    max_attempts: u32,
    retry_delays: Vec<Duration>,
    formats: Vec<String>,
    mobile: bool,
    client: Client,
}

impl RemoteDiscoveryClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(transport_timeout(timeout))
            .user_agent("bulletin/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_url: api_url.into(),
            api_key,
            timeout,
            max_attempts: 2,
            retry_delays: vec![Duration::from_secs(3), Duration::from_secs(5)],
            formats: vec!["markdown".to_string(), "html".to_string()],
            mobile: false,
            client,
        })
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delays: Vec<Duration>) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delays = retry_delays;
        self
    }

    pub fn from_config(cfg: &common::DiscoveryConfig) -> Result<Self> {
        let api_url = cfg
            .api_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing api_url in [discovery] config"))?;
        let api_key = match cfg.api_key_env.as_deref() {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("discovery API key env var '{}' not set", var))?,
            ),
            None => None,
        };

        let mut client = Self::new(api_url, api_key, Duration::from_secs(cfg.timeout_seconds.unwrap_or(120)))?
            .with_retries(
                cfg.max_attempts.unwrap_or(2),
                cfg.retry_delays_seconds
                    .clone()
                    .unwrap_or_else(|| vec![3, 5])
                    .into_iter()
                    .map(Duration::from_secs)
                    .collect(),
            );
        if let Some(formats) = &cfg.formats {
            client.formats = formats.clone();
        }
        client.mobile = cfg.mobile.unwrap_or(false);
        Ok(client)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).saturating_sub(2);
        self.retry_delays
            .get(idx)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// The service gets the configured timeout; the HTTP client itself waits a little longer.
    fn request_body<'a>(&'a self, url: &'a str, options: &ScrapeConfig) -> ScrapeRequest<'a> {
        ScrapeRequest {
            url,
            formats: &self.formats,
            only_main_content: options.only_main_content,
            wait_for: options.wait_for,
            remove_base64_images: options.remove_base64_images,
            timeout: self.timeout.as_millis() as u64,
            mobile: self.mobile,
        }
    }

    async fn fetch_once(&self, body: &ScrapeRequest<'_>) -> std::result::Result<RawDocument, Attempt> {
        let mut req = self.client.post(&self.api_url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => return Err(Attempt::Retry(anyhow::Error::new(e).context("network error during fetch"))),
        };

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Retry(anyhow::anyhow!("discovery service error: {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Attempt::Fatal(anyhow::anyhow!("discovery request rejected {}: {}", status, body)));
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| Attempt::Retry(anyhow::Error::new(e).context("failed to parse discovery response")))?;

        if !parsed.success {
            let message = parsed.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(Attempt::Retry(anyhow::anyhow!("discovery service reported failure: {}", message)));
        }

        let data = parsed.data.unwrap_or_default();
        if data.markdown.as_deref().map_or(true, str::is_empty) && data.html.as_deref().map_or(true, str::is_empty) {
            return Err(Attempt::Retry(anyhow::anyhow!("discovery service returned an empty document")));
        }
        Ok(RawDocument {
            markdown: data.markdown,
            html: data.html,
        })
    }
}

enum Attempt {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

#[async_trait::async_trait]
impl DiscoveryClient for RemoteDiscoveryClient {
    async fn fetch(&self, url: &str, options: &ScrapeConfig) -> Result<RawDocument> {
        let body = self.request_body(url, options);

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = self.backoff(attempt);
                info!("Retrying discovery fetch for {} (attempt {}/{}) after {:?}...", url, attempt, self.max_attempts, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.fetch_once(&body).await {
                Ok(doc) => return Ok(doc),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(e)) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [String],
    only_main_content: bool,
    wait_for: u64,
    remove_base64_images: bool,
    timeout: u64,
    mobile: bool,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    html: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_waits_longer_than_service() {
        assert_eq!(transport_timeout(Duration::from_secs(120)), Duration::from_secs(130));
        assert!(transport_timeout(Duration::ZERO) > Duration::ZERO);
    }

    #[test]
    fn service_receives_its_own_timeout() {
        let client = RemoteDiscoveryClient::new("http://localhost", None, Duration::from_secs(120)).unwrap();
        let options = ScrapeConfig::default();
        let body = serde_json::to_value(client.request_body("https://www.primicias.ec/", &options)).unwrap();
        assert_eq!(body["timeout"], 120_000);
    }
}
