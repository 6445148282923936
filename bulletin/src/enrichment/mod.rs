//! Phase 2: fetch the full text of every discovered article and merge it in by URL.

pub mod client;

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::extraction::{truncate_excerpt, EXCERPT_CHARS};
use crate::model::{Article, ArticlesBySource, EnrichmentStats};
use client::{EnrichedContent, EnrichmentClient};

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceEnrichment {
    pub total: usize,
    pub enriched: usize,
}

/// Notified after each source finishes, e.g. to persist progress.
#[async_trait::async_trait]
pub trait EnrichmentProgress: Send + Sync {
    async fn source_done(&self, source: &str, counts: SourceEnrichment);
}

#[async_trait::async_trait]
impl EnrichmentProgress for () {
    async fn source_done(&self, _source: &str, _counts: SourceEnrichment) {}
}

#[derive(Debug, Clone)]
pub struct EnrichmentOutput {
    pub sources: ArticlesBySource,
    pub per_source: BTreeMap<String, SourceEnrichment>,
    pub stats: EnrichmentStats,
}

/// Overlay enriched fields onto an article. Image from the full page wins when present.
fn merge(article: &mut Article, content: EnrichedContent) {
    if article.content.trim().is_empty() {
        article.content = truncate_excerpt(&content.full_content, EXCERPT_CHARS);
    }
    article.full_content = Some(content.full_content);
    if content.author.is_some() {
        article.author = content.author;
    }
    if content.published_date.is_some() {
        article.published_date = content.published_date;
    }
    if content.image_url.is_some() {
        article.image_url = content.image_url;
    }
    article.metadata = content.metadata;
}

async fn enrich_source(
    client: &dyn EnrichmentClient,
    name: &str,
    articles: &[Article],
    concurrency: usize,
) -> (Vec<Article>, SourceEnrichment) {
    let mut merged = articles.to_vec();
    let mut counts = SourceEnrichment {
        total: articles.len(),
        enriched: 0,
    };
    if articles.is_empty() {
        return (merged, counts);
    }

    let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
    let outcomes = match client.enrich_urls(&urls, concurrency).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            let err = PipelineError::Enrichment {
                source_name: name.to_string(),
                message: format!("{:#}", e),
            };
            warn!("{}; keeping original articles", err);
            return (merged, counts);
        }
    };

    let mut by_url: HashMap<String, EnrichedContent> = HashMap::new();
    for (url, outcome) in outcomes {
        match outcome {
            Ok(content) => {
                by_url.insert(url, content);
            }
            Err(e) => warn!(source = name, %url, "could not enrich article: {:#}", e),
        }
    }

    for article in merged.iter_mut() {
        if let Some(content) = by_url.remove(&article.url) {
            merge(article, content);
            counts.enriched += 1;
        }
    }

    info!(source = name, enriched = counts.enriched, total = counts.total, "source enriched");
    (merged, counts)
}

/// Enrich all sources concurrently. Never drops an article; failures keep the discovery version.
pub async fn run_enrichment(
    client: &dyn EnrichmentClient,
    discovered: &ArticlesBySource,
    concurrency: usize,
    progress: &dyn EnrichmentProgress,
) -> EnrichmentOutput {
    let started = Instant::now();
    let limit = concurrency.max(1);

    let results = join_all(discovered.iter().map(|(name, articles)| async move {
        let (merged, counts) = enrich_source(client, name, articles, limit).await;
        if counts.total > 0 {
            progress.source_done(name, counts).await;
        }
        (name.clone(), merged, counts)
    }))
    .await;

    let mut sources = BTreeMap::new();
    let mut per_source = BTreeMap::new();
    let (mut total, mut enriched) = (0, 0);
    for (name, merged, counts) in results {
        total += counts.total;
        enriched += counts.enriched;
        per_source.insert(name.clone(), counts);
        sources.insert(name, merged);
    }

    let stats = EnrichmentStats::new(total, enriched, started.elapsed().as_millis() as u64);
    info!(
        total = stats.total_articles,
        enriched = stats.enriched_articles,
        failed = stats.failed_articles,
        rate = %stats.success_rate,
        "enrichment finished"
    );

    EnrichmentOutput {
        sources,
        per_source,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::UrlOutcome;
    use std::sync::Mutex;

    /// Succeeds for URLs containing "ok", fails the rest. Sources named "down" fail as a batch.
    struct Selective;

    #[async_trait::async_trait]
    impl EnrichmentClient for Selective {
        async fn enrich_urls(&self, urls: &[String], _concurrency: usize) -> anyhow::Result<Vec<UrlOutcome>> {
            if urls.iter().any(|u| u.contains("down")) {
                anyhow::bail!("crawl service unreachable");
            }
            Ok(urls
                .iter()
                .map(|u| {
                    let outcome = if u.contains("ok") {
                        Ok(EnrichedContent {
                            url: u.clone(),
                            title: "Título completo de la nota".into(),
                            full_content: "Texto completo de la nota con todos los detalles relevantes del hecho.".into(),
                            author: Some("Redacción".into()),
                            published_date: Some("2025-03-01".into()),
                            image_url: Some(format!("{}/foto.jpg", u)),
                            metadata: None,
                        })
                    } else {
                        Err(anyhow::anyhow!("crawl failed"))
                    };
                    (u.clone(), outcome)
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, SourceEnrichment)>>);

    #[async_trait::async_trait]
    impl EnrichmentProgress for Recorder {
        async fn source_done(&self, source: &str, counts: SourceEnrichment) {
            self.0.lock().unwrap().push((source.to_string(), counts));
        }
    }

    fn article(url: &str, source: &str) -> Article {
        let mut a = Article::new("Titular de prueba suficientemente largo", "extracto", url, source);
        a.image_url = Some("https://img.ec/original.jpg".into());
        a
    }

    #[tokio::test]
    async fn two_of_five_failures_keep_originals() {
        let mut discovered = BTreeMap::new();
        discovered.insert(
            "Primicias".to_string(),
            vec![
                article("https://p.ec/ok-1", "Primicias"),
                article("https://p.ec/ok-2", "Primicias"),
                article("https://p.ec/ok-3", "Primicias"),
                article("https://p.ec/bad-1", "Primicias"),
                article("https://p.ec/bad-2", "Primicias"),
            ],
        );

        let recorder = Recorder::default();
        let out = run_enrichment(&Selective, &discovered, 5, &recorder).await;

        assert_eq!(out.stats.total_articles, 5);
        assert_eq!(out.stats.enriched_articles, 3);
        assert_eq!(out.stats.failed_articles, 2);
        assert_eq!(out.stats.success_rate, "60.00%");

        let merged = &out.sources["Primicias"];
        assert_eq!(merged.len(), 5);
        let ok = merged.iter().find(|a| a.url == "https://p.ec/ok-1").unwrap();
        assert!(ok.full_content.is_some());
        assert_eq!(ok.image_url.as_deref(), Some("https://p.ec/ok-1/foto.jpg"));
        assert_eq!(ok.content, "extracto");
        let bad = merged.iter().find(|a| a.url == "https://p.ec/bad-1").unwrap();
        assert_eq!(bad, &discovered["Primicias"][3]);

        let recorded = recorder.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, SourceEnrichment { total: 5, enriched: 3 });
    }

    #[tokio::test]
    async fn batch_failure_keeps_source_and_empty_sources_skip() {
        let mut discovered = BTreeMap::new();
        discovered.insert("Caido".to_string(), vec![article("https://down.ec/a", "Caido")]);
        discovered.insert("Vacio".to_string(), Vec::new());
        discovered.insert("Bien".to_string(), vec![article("https://b.ec/ok", "Bien")]);

        let out = run_enrichment(&Selective, &discovered, 2, &()).await;

        assert_eq!(out.stats.total_articles, 2);
        assert_eq!(out.stats.enriched_articles + out.stats.failed_articles, out.stats.total_articles);
        assert_eq!(out.sources["Caido"], discovered["Caido"]);
        assert!(out.sources["Vacio"].is_empty());
        assert_eq!(out.per_source["Bien"].enriched, 1);
    }
}
