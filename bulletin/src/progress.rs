//! Progress view of a bulletin, derived from its status and pipeline log.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::model::{Bulletin, BulletinStatus, LogStatus, PipelineLogEntry};

pub const STEP_SCRAPING: &str = "scraping";
pub const STEP_ENRICHMENT: &str = "enrichment";
pub const STEP_CLASSIFICATION: &str = "classification";
pub const STEP_SUMMARIZATION: &str = "summarization";

const WEIGHT_DISCOVERY: f64 = 25.0;
const WEIGHT_ENRICHMENT: f64 = 35.0;
const WEIGHT_CLASSIFICATION: f64 = 20.0;
const WEIGHT_SUMMARIZATION: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Scraping,
    Enrichment,
    Classifying,
    Summarizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub total_articles: u64,
    pub sources_success: u64,
    pub sources_failed: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentPhaseStats {
    pub total_articles: u64,
    pub enriched_articles: u64,
    pub failed_articles: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase1: Option<DiscoveryStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase2: Option<EnrichmentPhaseStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceProgress {
    pub status: SourceState,
    pub articles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_phase: Phase,
    /// 0..=100
    pub progress: u8,
    pub stats: PhaseStats,
    pub sources: BTreeMap<String, SourceProgress>,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn has_log(logs: &[PipelineLogEntry], step: &str, status: LogStatus) -> bool {
    logs.iter().any(|l| l.step == step && l.status == status)
}

fn last_log<'a>(logs: &'a [PipelineLogEntry], step: &str, status: LogStatus) -> Option<&'a PipelineLogEntry> {
    logs.iter().rev().find(|l| l.step == step && l.status == status)
}

fn meta_u64(metadata: &Value, key: &str) -> u64 {
    metadata.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub fn current_phase(bulletin: &Bulletin, logs: &[PipelineLogEntry]) -> Phase {
    match bulletin.status {
        BulletinStatus::Failed => Phase::Failed,
        BulletinStatus::Ready | BulletinStatus::Authorized | BulletinStatus::Published => Phase::Completed,
        BulletinStatus::Summarizing => Phase::Summarizing,
        BulletinStatus::Classifying => Phase::Classifying,
        BulletinStatus::Scraping | BulletinStatus::Draft => match logs.last().map(|l| l.step.as_str()) {
            Some(STEP_ENRICHMENT) => Phase::Enrichment,
            Some(_) => Phase::Scraping,
            None if bulletin.status == BulletinStatus::Scraping => Phase::Scraping,
            None => Phase::Pending,
        },
    }
}

/// Completion of each phase in `0.0..=1.0`, in pipeline order.
fn phase_fractions(bulletin: &Bulletin, logs: &[PipelineLogEntry]) -> [f64; 4] {
    use BulletinStatus::*;
    let status = bulletin.status;
    let past_scrape = matches!(status, Classifying | Summarizing | Ready | Authorized | Published);

    let discovery = if past_scrape || has_log(logs, STEP_SCRAPING, LogStatus::Completed) {
        1.0
    } else if status == Scraping {
        0.5
    } else {
        0.0
    };

    let enrichment = if past_scrape || has_log(logs, STEP_ENRICHMENT, LogStatus::Completed) {
        1.0
    } else if let Some(entry) = last_log(logs, STEP_ENRICHMENT, LogStatus::InProgress) {
        let total = meta_u64(&entry.metadata, "totalArticles").max(1);
        (meta_u64(&entry.metadata, "enrichedArticles") as f64 / total as f64).min(1.0)
    } else {
        0.0
    };

    let classification = match status {
        Summarizing | Ready | Authorized | Published => 1.0,
        Classifying if bulletin.classified_news.is_some() => 1.0,
        Classifying => 0.5,
        _ => 0.0,
    };

    let summarization = match status {
        Ready | Authorized | Published => 1.0,
        Summarizing => 0.5,
        _ => 0.0,
    };

    [discovery, enrichment, classification, summarization]
}

pub fn percent(bulletin: &Bulletin, logs: &[PipelineLogEntry]) -> u8 {
    let [d, e, c, s] = phase_fractions(bulletin, logs);
    let total = d * WEIGHT_DISCOVERY + e * WEIGHT_ENRICHMENT + c * WEIGHT_CLASSIFICATION + s * WEIGHT_SUMMARIZATION;
    total.round().clamp(0.0, 100.0) as u8
}

fn stats(logs: &[PipelineLogEntry]) -> PhaseStats {
    let phase1 = last_log(logs, STEP_SCRAPING, LogStatus::Completed).map(|l| DiscoveryStats {
        total_articles: meta_u64(&l.metadata, "totalArticles"),
        sources_success: meta_u64(&l.metadata, "sourcesSuccess"),
        sources_failed: meta_u64(&l.metadata, "sourcesFailed"),
        duration: meta_u64(&l.metadata, "duration"),
    });
    let phase2 = last_log(logs, STEP_ENRICHMENT, LogStatus::Completed).map(|l| EnrichmentPhaseStats {
        total_articles: meta_u64(&l.metadata, "totalArticles"),
        enriched_articles: meta_u64(&l.metadata, "enrichedArticles"),
        failed_articles: meta_u64(&l.metadata, "failedArticles"),
        duration: meta_u64(&l.metadata, "duration"),
    });
    PhaseStats { phase1, phase2 }
}

fn sources(bulletin: &Bulletin, logs: &[PipelineLogEntry], source_names: &[String]) -> BTreeMap<String, SourceProgress> {
    let mut out: BTreeMap<String, SourceProgress> = source_names
        .iter()
        .map(|name| {
            (
                name.clone(),
                SourceProgress {
                    status: SourceState::Pending,
                    articles: 0,
                    enriched: None,
                    total: None,
                },
            )
        })
        .collect();

    if let Some(raw) = &bulletin.raw_news {
        for (name, articles) in raw.iter().filter(|(_, a)| !a.is_empty()) {
            let entry = out.entry(name.clone()).or_insert(SourceProgress {
                status: SourceState::Pending,
                articles: 0,
                enriched: None,
                total: None,
            });
            entry.status = SourceState::Completed;
            entry.articles = articles.len();
        }
    }

    match &bulletin.full_articles {
        Some(full) => {
            for (name, articles) in full.iter().filter(|(_, a)| !a.is_empty()) {
                if let Some(entry) = out.get_mut(name) {
                    entry.total = Some(articles.len());
                    entry.enriched = Some(articles.iter().filter(|a| a.full_content.is_some()).count());
                }
            }
        }
        // While enrichment is running, per-source counts only live in the log.
        None => {
            for entry in logs
                .iter()
                .filter(|l| l.step == STEP_ENRICHMENT && l.status == LogStatus::InProgress)
            {
                let Some(name) = entry.metadata.get("source").and_then(Value::as_str) else {
                    continue;
                };
                if let Some(progress) = out.get_mut(name) {
                    progress.enriched = Some(meta_u64(&entry.metadata, "enriched") as usize);
                    progress.total = Some(meta_u64(&entry.metadata, "total") as usize);
                }
            }
        }
    }

    out
}

/// Full progress report. `source_names` seeds the per-source map so sources that have not
/// produced anything yet show as pending.
pub fn compute(bulletin: &Bulletin, logs: &[PipelineLogEntry], source_names: &[String]) -> Progress {
    let is_complete = matches!(
        bulletin.status,
        BulletinStatus::Ready | BulletinStatus::Authorized | BulletinStatus::Published | BulletinStatus::Failed
    );
    let error = if bulletin.status == BulletinStatus::Failed {
        Some(
            bulletin
                .error_log
                .as_ref()
                .map(|e| format!("{} failed: {}", e.step, e.message))
                .unwrap_or_else(|| "pipeline failed".to_string()),
        )
    } else {
        None
    };

    Progress {
        current_phase: current_phase(bulletin, logs),
        progress: percent(bulletin, logs),
        stats: stats(logs),
        sources: sources(bulletin, logs, source_names),
        is_complete,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, CategorySummaries, ClassifiedNews, ErrorLog};
    use chrono::{NaiveDate, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn bulletin(status: BulletinStatus) -> Bulletin {
        Bulletin {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            status,
            raw_news: None,
            full_articles: None,
            classified_news: None,
            summaries: CategorySummaries::default(),
            total_news: 0,
            enrichment_stats: None,
            error_log: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn log(id: i64, step: &str, status: LogStatus, metadata: Value) -> PipelineLogEntry {
        PipelineLogEntry {
            id,
            bulletin_id: Uuid::nil(),
            step: step.to_string(),
            status,
            message: String::new(),
            metadata,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_draft_is_pending() {
        let b = bulletin(BulletinStatus::Draft);
        assert_eq!(current_phase(&b, &[]), Phase::Pending);
        assert_eq!(percent(&b, &[]), 0);
    }

    #[test]
    fn scraping_counts_half() {
        let b = bulletin(BulletinStatus::Scraping);
        let logs = [log(1, STEP_SCRAPING, LogStatus::InProgress, json!({}))];
        assert_eq!(current_phase(&b, &logs), Phase::Scraping);
        assert_eq!(percent(&b, &logs), 13);
    }

    #[test]
    fn enrichment_uses_log_counts() {
        let b = bulletin(BulletinStatus::Scraping);
        let logs = [
            log(1, STEP_SCRAPING, LogStatus::InProgress, json!({})),
            log(2, STEP_SCRAPING, LogStatus::Completed, json!({"totalArticles": 20, "sourcesSuccess": 4, "sourcesFailed": 1, "duration": 3000})),
            log(3, STEP_ENRICHMENT, LogStatus::InProgress, json!({"source": "Primicias", "enriched": 5, "total": 5, "enrichedArticles": 10, "totalArticles": 20})),
        ];
        assert_eq!(current_phase(&b, &logs), Phase::Enrichment);
        // 25 + 35 * 0.5
        assert_eq!(percent(&b, &logs), 43);

        let report = compute(&b, &logs, &["Primicias".to_string(), "La Hora".to_string()]);
        assert_eq!(report.stats.phase1.as_ref().unwrap().sources_failed, 1);
        assert!(report.stats.phase2.is_none());
        assert_eq!(report.sources["Primicias"].enriched, Some(5));
        assert_eq!(report.sources["La Hora"].status, SourceState::Pending);
        assert!(!report.is_complete);
    }

    #[test]
    fn later_phases_and_terminal_states() {
        let mut b = bulletin(BulletinStatus::Classifying);
        assert_eq!(percent(&b, &[]), 70);
        b.classified_news = Some(ClassifiedNews::default());
        assert_eq!(percent(&b, &[]), 80);

        b.status = BulletinStatus::Summarizing;
        assert_eq!(percent(&b, &[]), 90);
        assert_eq!(current_phase(&b, &[]), Phase::Summarizing);

        b.status = BulletinStatus::Published;
        assert_eq!(percent(&b, &[]), 100);
        assert_eq!(current_phase(&b, &[]), Phase::Completed);
        assert!(compute(&b, &[], &[]).is_complete);
    }

    #[test]
    fn failed_reports_error() {
        let mut b = bulletin(BulletinStatus::Failed);
        b.error_log = Some(ErrorLog {
            step: "classification".into(),
            message: "all models failed".into(),
            timestamp: Utc::now(),
        });
        let report = compute(&b, &[], &[]);
        assert_eq!(report.current_phase, Phase::Failed);
        assert!(report.is_complete);
        assert!(report.error.unwrap().contains("all models failed"));
    }

    #[test]
    fn sources_from_stored_articles() {
        let mut b = bulletin(BulletinStatus::Draft);
        let mut enriched = Article::new("Primera noticia del día", "a", "https://a.ec/1", "A");
        enriched.full_content = Some("texto".into());
        let plain = Article::new("Segunda noticia del día", "b", "https://a.ec/2", "A");
        let mut map = BTreeMap::new();
        map.insert("A".to_string(), vec![enriched, plain]);
        b.raw_news = Some(map.clone());
        b.full_articles = Some(map);

        let report = compute(&b, &[], &["A".to_string()]);
        assert_eq!(
            report.sources["A"],
            SourceProgress {
                status: SourceState::Completed,
                articles: 2,
                enriched: Some(1),
                total: Some(2),
            }
        );
    }
}
