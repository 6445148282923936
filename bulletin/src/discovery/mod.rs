//! Phase 1: visit every active source's listing pages and extract article candidates.

pub mod client;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::extraction::Extractor;
use crate::model::{Article, ArticlesBySource, Source};
use client::DiscoveryClient;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryMetadata {
    pub total_articles: usize,
    pub scraped_at: DateTime<Utc>,
    pub sources_success: usize,
    pub sources_failed: usize,
    pub errors: Vec<SourceError>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutput {
    /// Every active source, possibly with an empty list
    pub sources: ArticlesBySource,
    /// Source name -> whether at least one of its URLs was fetched
    pub source_status: BTreeMap<String, bool>,
    pub metadata: DiscoveryMetadata,
}

/// Notified after every listing URL, whether or not it could be fetched.
#[async_trait::async_trait]
pub trait DiscoveryProgress: Send + Sync {
    async fn url_done(&self, source: &str, url: &str, fetched: bool);
}

#[async_trait::async_trait]
impl DiscoveryProgress for () {
    async fn url_done(&self, _source: &str, _url: &str, _fetched: bool) {}
}

struct SourceOutcome {
    name: String,
    articles: Vec<Article>,
    fetched_urls: usize,
    errors: Vec<PipelineError>,
}

/// URLs are visited one after another; a source fails only when none of them could be fetched.
async fn discover_source(
    client: &dyn DiscoveryClient,
    extractor: &Extractor,
    source: &Source,
    progress: &dyn DiscoveryProgress,
) -> SourceOutcome {
    let mut outcome = SourceOutcome {
        name: source.name.clone(),
        articles: Vec::new(),
        fetched_urls: 0,
        errors: Vec::new(),
    };
    let mut seen = HashSet::new();

    for url in source.scrape_urls() {
        let fetched = client.fetch(&url, &source.scrape_config).await;
        progress.url_done(&source.name, &url, fetched.is_ok()).await;
        let doc = match fetched {
            Ok(doc) => doc,
            Err(e) => {
                warn!(source = %source.name, %url, "discovery fetch failed: {:#}", e);
                outcome.errors.push(PipelineError::SourceFetch {
                    url: url.clone(),
                    message: format!("{:#}", e),
                });
                continue;
            }
        };
        outcome.fetched_urls += 1;

        match extractor.extract(&doc, &url, &source.name) {
            Some(extraction) => {
                info!(
                    source = %source.name,
                    %url,
                    strategy = extraction.strategy,
                    count = extraction.articles.len(),
                    "articles extracted"
                );
                outcome
                    .articles
                    .extend(extraction.articles.into_iter().filter(|a| seen.insert(a.url.clone())));
            }
            None => {
                warn!(source = %source.name, %url, "no valid articles on page");
                outcome.errors.push(PipelineError::ExtractionEmpty { url: url.clone() });
            }
        }
    }

    outcome
}

/// All active sources concurrently. Fatal when nothing is active or no source could be fetched.
pub async fn run_discovery(
    client: &dyn DiscoveryClient,
    extractor: &Extractor,
    sources: &[Source],
    progress: &dyn DiscoveryProgress,
) -> Result<DiscoveryOutput, PipelineError> {
    let active: Vec<&Source> = sources.iter().filter(|s| s.is_active).collect();
    if active.is_empty() {
        return Err(PipelineError::NoActiveSources);
    }
    info!(count = active.len(), "discovery starting");

    let outcomes = join_all(active.iter().map(|s| discover_source(client, extractor, s, progress))).await;

    let mut output = DiscoveryOutput {
        sources: BTreeMap::new(),
        source_status: BTreeMap::new(),
        metadata: DiscoveryMetadata {
            total_articles: 0,
            scraped_at: Utc::now(),
            sources_success: 0,
            sources_failed: 0,
            errors: Vec::new(),
        },
    };

    for outcome in outcomes {
        let succeeded = outcome.fetched_urls > 0;
        if succeeded {
            output.metadata.sources_success += 1;
        } else {
            output.metadata.sources_failed += 1;
        }
        output.metadata.total_articles += outcome.articles.len();
        output.metadata.errors.extend(outcome.errors.iter().map(|e| SourceError {
            source: outcome.name.clone(),
            error: e.to_string(),
        }));
        output.source_status.insert(outcome.name.clone(), succeeded);
        output.sources.insert(outcome.name, outcome.articles);
    }

    info!(
        total = output.metadata.total_articles,
        ok = output.metadata.sources_success,
        failed = output.metadata.sources_failed,
        "discovery finished"
    );

    if output.metadata.sources_success == 0 {
        return Err(PipelineError::AllSourcesFailed);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{RawDocument, DEFAULT_MAX_CANDIDATES};
    use crate::model::ScrapeConfig;
    use std::sync::Mutex;

    /// Serves canned markdown per URL; URLs not in the map fail.
    struct CannedPages {
        pages: BTreeMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DiscoveryClient for CannedPages {
        async fn fetch(&self, url: &str, _options: &ScrapeConfig) -> anyhow::Result<RawDocument> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(md) => Ok(RawDocument {
                    markdown: Some(md.clone()),
                    html: None,
                }),
                None => anyhow::bail!("discovery service error: 503 Service Unavailable"),
            }
        }
    }

    fn source(name: &str, urls: &[&str], active: bool) -> Source {
        Source {
            id: 0,
            name: name.to_string(),
            url: urls[0].to_string(),
            base_url: urls[0].to_string(),
            scrape_config: ScrapeConfig {
                urls: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            },
            is_active: active,
            last_scraped_at: None,
            last_scraped_status: None,
            total_scraped: 0,
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(&[], DEFAULT_MAX_CANDIDATES).unwrap()
    }

    fn page(links: &[(&str, &str)]) -> String {
        links.iter().map(|(t, u)| format!("[{}]({})\nTexto de apoyo.\n\n", t, u)).collect()
    }

    #[tokio::test]
    async fn no_active_sources_is_fatal() {
        let client = CannedPages {
            pages: BTreeMap::new(),
            requested: Mutex::new(Vec::new()),
        };
        let err = run_discovery(&client, &extractor(), &[source("A", &["https://a.ec/"], false)], &())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoActiveSources));
        assert!(client.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_sources_failing_is_fatal() {
        let client = CannedPages {
            pages: BTreeMap::new(),
            requested: Mutex::new(Vec::new()),
        };
        let sources = [source("A", &["https://a.ec/"], true), source("B", &["https://b.ec/"], true)];
        let err = run_discovery(&client, &extractor(), &sources, &()).await.unwrap_err();
        assert!(matches!(err, PipelineError::AllSourcesFailed));
    }

    #[tokio::test]
    async fn partial_failures_are_recorded() {
        let mut pages = BTreeMap::new();
        pages.insert(
            "https://a.ec/economia/".to_string(),
            page(&[("Exportaciones de camarón crecen 8% en el año", "https://a.ec/economia/camaron")]),
        );
        pages.insert("https://b.ec/".to_string(), "página sin enlaces".to_string());
        let client = CannedPages {
            pages,
            requested: Mutex::new(Vec::new()),
        };

        let sources = [
            source("A", &["https://a.ec/economia/", "https://a.ec/politica/"], true),
            source("B", &["https://b.ec/"], true),
            source("C", &["https://c.ec/"], true),
        ];
        let out = run_discovery(&client, &extractor(), &sources, &()).await.unwrap();

        assert_eq!(out.metadata.total_articles, 1);
        // B fetched its page even though nothing was extracted
        assert_eq!(out.metadata.sources_success, 2);
        assert_eq!(out.metadata.sources_failed, 1);
        assert_eq!(out.metadata.errors.len(), 3);
        assert_eq!(out.sources["A"].len(), 1);
        assert!(out.sources["B"].is_empty());
        assert_eq!(out.source_status["C"], false);
        assert!(out.sources["A"].iter().all(|a| a.source == "A" && a.selected));
    }

    #[derive(Default)]
    struct Visits(Mutex<Vec<(String, String, bool)>>);

    #[async_trait::async_trait]
    impl DiscoveryProgress for Visits {
        async fn url_done(&self, source: &str, url: &str, fetched: bool) {
            self.0.lock().unwrap().push((source.to_string(), url.to_string(), fetched));
        }
    }

    #[tokio::test]
    async fn every_listing_url_is_reported() {
        let mut pages = BTreeMap::new();
        pages.insert(
            "https://a.ec/economia/".to_string(),
            page(&[("Exportaciones de camarón crecen 8% en el año", "https://a.ec/economia/camaron")]),
        );
        let client = CannedPages {
            pages,
            requested: Mutex::new(Vec::new()),
        };
        let visits = Visits::default();

        let sources = [source("A", &["https://a.ec/economia/", "https://a.ec/politica/"], true)];
        run_discovery(&client, &extractor(), &sources, &visits).await.unwrap();

        let visits = visits.0.lock().unwrap();
        assert_eq!(
            *visits,
            vec![
                ("A".to_string(), "https://a.ec/economia/".to_string(), true),
                ("A".to_string(), "https://a.ec/politica/".to_string(), false),
            ]
        );
    }
}
