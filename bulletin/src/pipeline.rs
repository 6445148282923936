//! Drives a bulletin through its phases and records every step in the pipeline log.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classification::{self, DEFAULT_MAX_INPUT_CHARS};
use crate::discovery::{self, client::DiscoveryClient, DiscoveryProgress};
use crate::enrichment::{self, client::EnrichmentClient, EnrichmentProgress, SourceEnrichment, DEFAULT_CONCURRENCY};
use crate::error::{PipelineError, Result};
use crate::extraction::Extractor;
use crate::llm::AiClient;
use crate::model::{Bulletin, BulletinStatus, EnrichmentStats, LogStatus};
use crate::progress::{STEP_CLASSIFICATION, STEP_ENRICHMENT, STEP_SCRAPING, STEP_SUMMARIZATION};
use crate::storage;
use crate::summarization::{self, CategoryStatus, SummaryTemplates};

pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub enrichment_enabled: bool,
    pub enrichment_concurrency: usize,
    pub stale_after: chrono::Duration,
    pub max_classification_chars: usize,
    pub templates: SummaryTemplates,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enrichment_enabled: true,
            enrichment_concurrency: DEFAULT_CONCURRENCY,
            stale_after: chrono::Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
            max_classification_chars: DEFAULT_MAX_INPUT_CHARS,
            templates: SummaryTemplates::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &common::Config) -> Self {
        let enrichment = config.enrichment.clone().unwrap_or_default();
        Self {
            enrichment_enabled: enrichment.enabled.unwrap_or(true),
            enrichment_concurrency: enrichment.max_concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            stale_after: chrono::Duration::minutes(
                config
                    .admin
                    .as_ref()
                    .and_then(|a| a.stale_after_minutes)
                    .unwrap_or(DEFAULT_STALE_AFTER_MINUTES),
            ),
            max_classification_chars: config
                .llm
                .as_ref()
                .and_then(|l| l.max_classification_chars)
                .unwrap_or(DEFAULT_MAX_INPUT_CHARS),
            templates: SummaryTemplates::from_config(config.summarization.as_ref()),
        }
    }
}

/// Writes an `in_progress` enrichment entry per finished source, with running totals.
struct LoggedProgress<'a> {
    pool: &'a SqlitePool,
    bulletin_id: Uuid,
    total_articles: usize,
    enriched_so_far: AtomicUsize,
}

#[async_trait::async_trait]
impl<'a> EnrichmentProgress for LoggedProgress<'a> {
    async fn source_done(&self, source: &str, counts: SourceEnrichment) {
        let enriched = self.enriched_so_far.fetch_add(counts.enriched, Ordering::SeqCst) + counts.enriched;
        let logged = storage::append_log(
            self.pool,
            self.bulletin_id,
            STEP_ENRICHMENT,
            LogStatus::InProgress,
            &format!("{}: {}/{} articles enriched", source, counts.enriched, counts.total),
            json!({
                "source": source,
                "enriched": counts.enriched,
                "total": counts.total,
                "enrichedArticles": enriched,
                "totalArticles": self.total_articles,
            }),
            None,
        )
        .await;
        if let Err(e) = logged {
            warn!(bulletin_id = %self.bulletin_id, "could not record enrichment progress: {}", e);
        }
    }
}

/// Refreshes the bulletin's activity time after each listing page.
struct DiscoveryHeartbeat<'a> {
    pool: &'a SqlitePool,
    bulletin_id: Uuid,
}

#[async_trait::async_trait]
impl<'a> DiscoveryProgress for DiscoveryHeartbeat<'a> {
    async fn url_done(&self, source: &str, url: &str, _fetched: bool) {
        if let Err(e) = storage::touch_bulletin(self.pool, self.bulletin_id).await {
            warn!(bulletin_id = %self.bulletin_id, %source, %url, "could not record discovery activity: {}", e);
        }
    }
}

pub struct Pipeline {
    pool: SqlitePool,
    discovery: Arc<dyn DiscoveryClient>,
    extractor: Extractor,
    enrichment: Arc<dyn EnrichmentClient>,
    ai: AiClient,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        discovery: Arc<dyn DiscoveryClient>,
        extractor: Extractor,
        enrichment: Arc<dyn EnrichmentClient>,
        ai: AiClient,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            discovery,
            extractor,
            enrichment,
            ai,
            settings,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Log start, run the phase, log the outcome with its duration. A failing phase marks the
    /// bulletin failed before the error is returned.
    async fn run_phase<T, F, Fut>(&self, bulletin_id: Uuid, step: &str, start_meta: Value, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Value)>>,
    {
        storage::append_log(
            &self.pool,
            bulletin_id,
            step,
            LogStatus::InProgress,
            &format!("{} started", step),
            start_meta,
            None,
        )
        .await?;
        let started = Instant::now();

        let result = body().await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok((value, mut meta)) => {
                if let Value::Object(map) = &mut meta {
                    map.insert("duration".to_string(), json!(duration_ms));
                }
                storage::append_log(
                    &self.pool,
                    bulletin_id,
                    step,
                    LogStatus::Completed,
                    &format!("{} completed", step),
                    meta,
                    Some(duration_ms),
                )
                .await?;
                info!(%bulletin_id, step, duration_ms, "phase completed");
                Ok(value)
            }
            Err(e) => {
                error!(%bulletin_id, step, "phase failed: {}", e);
                let message = e.to_string();
                if let Err(log_err) = storage::append_log(
                    &self.pool,
                    bulletin_id,
                    step,
                    LogStatus::Failed,
                    &message,
                    json!({"error": message, "duration": duration_ms}),
                    Some(duration_ms),
                )
                .await
                {
                    warn!(%bulletin_id, "could not write failure log: {}", log_err);
                }
                if let Err(mark_err) = storage::mark_failed(&self.pool, bulletin_id, step, &message).await {
                    warn!(%bulletin_id, "could not mark bulletin failed: {}", mark_err);
                }
                Err(e)
            }
        }
    }

    /// Create today's bulletin in `scraping`. An existing bulletin for the date blocks the run
    /// unless it failed or has sat in an in-progress state past the stale threshold. Staleness
    /// is measured from the bulletin's last recorded activity.
    pub async fn start_scrape(&self, date: NaiveDate) -> Result<Bulletin> {
        if let Some(existing) = storage::bulletin_for_date(&self.pool, date).await? {
            let stale = existing.status.is_in_progress()
                && Utc::now() - existing.updated_at > self.settings.stale_after;
            if stale {
                warn!(bulletin_id = %existing.id, status = %existing.status, "replacing stale bulletin");
                let marked = storage::mark_failed(
                    &self.pool,
                    existing.id,
                    existing.status.as_str(),
                    "abandoned: no progress within the stale threshold",
                )
                .await;
                // Another caller moved it first; the insert below decides who wins.
                if let Err(e) = marked {
                    if !matches!(e, PipelineError::InvalidTransition { .. }) {
                        return Err(e);
                    }
                }
            } else if existing.status != BulletinStatus::Failed {
                return Err(PipelineError::BulletinAlreadyExists {
                    date,
                    status: existing.status,
                });
            }
        }

        storage::create_bulletin(&self.pool, date, BulletinStatus::Scraping).await
    }

    /// Discovery followed by enrichment. Results are stored and the bulletin returns to `draft`.
    pub async fn run_scrape(&self, bulletin_id: Uuid) -> Result<()> {
        let discovered = self
            .run_phase(bulletin_id, STEP_SCRAPING, json!({}), || async {
                let sources = storage::load_sources(&self.pool).await?;
                let heartbeat = DiscoveryHeartbeat {
                    pool: &self.pool,
                    bulletin_id,
                };
                let output =
                    discovery::run_discovery(self.discovery.as_ref(), &self.extractor, &sources, &heartbeat).await?;

                for (name, ok) in &output.source_status {
                    storage::record_source_scrape(&self.pool, name, *ok).await?;
                }

                let meta = json!({
                    "totalArticles": output.metadata.total_articles,
                    "sourcesSuccess": output.metadata.sources_success,
                    "sourcesFailed": output.metadata.sources_failed,
                    "errors": output.metadata.errors,
                    "scrapedAt": output.metadata.scraped_at,
                });
                Ok::<_, PipelineError>((output, meta))
            })
            .await?;

        let total: usize = discovered.sources.values().map(Vec::len).sum();
        let start_meta = json!({"totalArticles": total, "enrichedArticles": 0});
        let (full_articles, stats) = self
            .run_phase(bulletin_id, STEP_ENRICHMENT, start_meta, || async {
                if !self.settings.enrichment_enabled {
                    info!(%bulletin_id, "enrichment disabled, keeping discovery articles");
                    let stats = EnrichmentStats::new(total, 0, 0);
                    let meta = json!({"skipped": true, "totalArticles": total, "enrichedArticles": 0, "failedArticles": total});
                    return Ok::<_, PipelineError>(((discovered.sources.clone(), stats), meta));
                }

                let progress = LoggedProgress {
                    pool: &self.pool,
                    bulletin_id,
                    total_articles: total,
                    enriched_so_far: AtomicUsize::new(0),
                };
                let output = enrichment::run_enrichment(
                    self.enrichment.as_ref(),
                    &discovered.sources,
                    self.settings.enrichment_concurrency,
                    &progress,
                )
                .await;

                let meta = json!({
                    "totalArticles": output.stats.total_articles,
                    "enrichedArticles": output.stats.enriched_articles,
                    "failedArticles": output.stats.failed_articles,
                    "successRate": output.stats.success_rate,
                });
                Ok::<_, PipelineError>(((output.sources, output.stats), meta))
            })
            .await?;

        storage::save_scrape_results(&self.pool, bulletin_id, &discovered.sources, &full_articles, &stats).await?;
        info!(%bulletin_id, total, enriched = stats.enriched_articles, "scrape stored");
        Ok(())
    }

    /// `draft` -> `classifying`. Checked synchronously so callers can reject the request.
    pub async fn start_classification(&self, bulletin_id: Uuid) -> Result<()> {
        let bulletin = storage::get_bulletin(&self.pool, bulletin_id).await?;
        if bulletin.working_articles().is_none() {
            return Err(PipelineError::NoSelectedArticles);
        }
        storage::transition(&self.pool, bulletin_id, BulletinStatus::Classifying).await?;
        Ok(())
    }

    pub async fn run_classification(&self, bulletin_id: Uuid) -> Result<()> {
        self.run_phase(bulletin_id, STEP_CLASSIFICATION, json!({}), || async {
            let bulletin = storage::get_bulletin(&self.pool, bulletin_id).await?;
            let articles = bulletin.working_articles().ok_or(PipelineError::NoSelectedArticles)?;
            let outcome = classification::classify(&self.ai, articles, self.settings.max_classification_chars).await?;

            storage::save_classification(&self.pool, bulletin_id, &outcome.news).await?;
            let meta = json!({
                "model": outcome.model,
                "attempts": outcome.attempts,
                "usedFallback": outcome.used_fallback,
                "inputArticles": outcome.input_articles,
                "classified": outcome.news.total(),
                "categories": outcome.news.counts(),
            });
            Ok::<_, PipelineError>(((), meta))
        })
        .await
    }

    /// `classifying` (with stored classification) -> `summarizing`.
    pub async fn start_summarization(&self, bulletin_id: Uuid) -> Result<()> {
        let bulletin = storage::get_bulletin(&self.pool, bulletin_id).await?;
        if bulletin.classified_news.is_none() {
            return Err(PipelineError::InvalidTransition {
                from: bulletin.status,
                to: BulletinStatus::Summarizing,
            });
        }
        storage::transition(&self.pool, bulletin_id, BulletinStatus::Summarizing).await?;
        Ok(())
    }

    pub async fn run_summarization(&self, bulletin_id: Uuid) -> Result<()> {
        self.run_phase(bulletin_id, STEP_SUMMARIZATION, json!({}), || async {
            let bulletin = storage::get_bulletin(&self.pool, bulletin_id).await?;
            let news = bulletin.classified_news.unwrap_or_default();
            let outcome = summarization::summarize_all(&self.ai, &news, &self.settings.templates).await?;

            for report in outcome.reports.iter().filter(|r| r.status == CategoryStatus::Failed) {
                storage::append_log(
                    &self.pool,
                    bulletin_id,
                    &format!("{}_{}", STEP_SUMMARIZATION, report.category),
                    LogStatus::Failed,
                    report.error.as_deref().unwrap_or("summary failed"),
                    json!({"category": report.category, "articles": report.articles}),
                    None,
                )
                .await?;
            }

            storage::save_summaries(&self.pool, bulletin_id, &outcome.summaries).await?;
            let meta = json!({
                "categories": outcome.reports,
                "failedCategories": outcome.failed(),
            });
            Ok::<_, PipelineError>(((), meta))
        })
        .await
    }

    /// All four phases for `date`, as the scheduled worker runs them.
    pub async fn run_full(&self, date: NaiveDate) -> Result<Uuid> {
        let bulletin = self.start_scrape(date).await?;
        info!(bulletin_id = %bulletin.id, %date, "full pipeline run started");

        self.run_scrape(bulletin.id).await?;
        self.start_classification(bulletin.id).await?;
        self.run_classification(bulletin.id).await?;
        self.start_summarization(bulletin.id).await?;
        self.run_summarization(bulletin.id).await?;

        info!(bulletin_id = %bulletin.id, "bulletin ready");
        Ok(bulletin.id)
    }
}
