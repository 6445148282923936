//! SQLite persistence for sources, bulletins and the pipeline log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::model::{
    ArticlesBySource, Bulletin, BulletinStatus, Category, CategorySummaries, ClassifiedNews, EnrichmentStats,
    ErrorLog, LogStatus, PipelineLogEntry, ScrapeConfig, Source,
};

const BULLETIN_COLUMNS: &str = "id, date, status, raw_news, full_articles, classified_news, \
     economia, politica, sociedad, seguridad, internacional, vial, \
     total_news, enrichment_stats, error_log, created_at, updated_at";

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(Some(serde_json::from_str(&text)?)),
        _ => Ok(None),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| PipelineError::Other(anyhow::anyhow!("invalid bulletin id {}: {}", raw, e)))
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let scrape_config: Option<ScrapeConfig> = from_json(row.try_get("scrape_config")?)?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        base_url: row.try_get("base_url")?,
        scrape_config: scrape_config.unwrap_or_default(),
        is_active: row.try_get("is_active")?,
        last_scraped_at: row.try_get("last_scraped_at")?,
        last_scraped_status: row.try_get("last_scraped_status")?,
        total_scraped: row.try_get("total_scraped")?,
    })
}

fn bulletin_from_row(row: &SqliteRow) -> Result<Bulletin> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<BulletinStatus>()
        .map_err(|e| PipelineError::Other(anyhow::anyhow!(e)))?;

    let mut summaries = CategorySummaries::default();
    for category in Category::ALL {
        let text: Option<String> = row.try_get(category.key())?;
        summaries.set(category, text.unwrap_or_default());
    }

    Ok(Bulletin {
        id: parse_uuid(&id)?,
        date: row.try_get("date")?,
        status,
        raw_news: from_json(row.try_get("raw_news")?)?,
        full_articles: from_json(row.try_get("full_articles")?)?,
        classified_news: from_json(row.try_get("classified_news")?)?,
        summaries,
        total_news: row.try_get("total_news")?,
        enrichment_stats: from_json(row.try_get("enrichment_stats")?)?,
        error_log: from_json(row.try_get("error_log")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Every configured source, active or not, in insertion order.
pub async fn load_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query(
        "SELECT id, name, url, base_url, scrape_config, is_active, last_scraped_at, last_scraped_status, total_scraped \
         FROM sources ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(source_from_row).collect()
}

/// Bookkeeping after a discovery run touched the source.
pub async fn record_source_scrape(pool: &SqlitePool, name: &str, success: bool) -> Result<()> {
    sqlx::query(
        "UPDATE sources SET last_scraped_at = ?, last_scraped_status = ?, total_scraped = total_scraped + 1 WHERE name = ?",
    )
    .bind(Utc::now())
    .bind(if success { "success" } else { "failed" })
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("2067") || db.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Insert a new bulletin. The date must not already have a bulletin outside `failed`.
pub async fn create_bulletin(pool: &SqlitePool, date: NaiveDate, status: BulletinStatus) -> Result<Bulletin> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let inserted = sqlx::query("INSERT INTO bulletins (id, date, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(date)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await;

    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            let existing = bulletin_for_date(pool, date).await?.map_or(status, |b| b.status);
            return Err(PipelineError::BulletinAlreadyExists { date, status: existing });
        }
        return Err(e.into());
    }

    info!(bulletin_id = %id, %date, %status, "bulletin created");
    get_bulletin(pool, id).await
}

pub async fn find_bulletin(pool: &SqlitePool, id: Uuid) -> Result<Option<Bulletin>> {
    let row = sqlx::query(&format!("SELECT {} FROM bulletins WHERE id = ?", BULLETIN_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(bulletin_from_row).transpose()
}

pub async fn get_bulletin(pool: &SqlitePool, id: Uuid) -> Result<Bulletin> {
    find_bulletin(pool, id)
        .await?
        .ok_or_else(|| PipelineError::BulletinNotFound(id.to_string()))
}

/// Most recently created bulletin for a date.
pub async fn bulletin_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Option<Bulletin>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM bulletins WHERE date = ? ORDER BY created_at DESC LIMIT 1",
        BULLETIN_COLUMNS
    ))
    .bind(date)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(bulletin_from_row).transpose()
}

/// Move a bulletin to `next`, refusing transitions the lifecycle does not allow. The update only
/// applies while the row still holds the status that was checked, so concurrent callers cannot
/// both move it.
pub async fn transition(pool: &SqlitePool, id: Uuid, next: BulletinStatus) -> Result<BulletinStatus> {
    let current = get_bulletin(pool, id).await?.status;
    if !current.can_transition_to(next) {
        return Err(PipelineError::InvalidTransition { from: current, to: next });
    }

    let updated = sqlx::query("UPDATE bulletins SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(current.as_str())
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        let now = get_bulletin(pool, id).await?.status;
        return Err(PipelineError::InvalidTransition { from: now, to: next });
    }

    debug!(bulletin_id = %id, from = %current, to = %next, "bulletin status changed");
    Ok(current)
}

/// Store discovery and enrichment output and return the bulletin to `draft`.
pub async fn save_scrape_results(
    pool: &SqlitePool,
    id: Uuid,
    raw_news: &ArticlesBySource,
    full_articles: &ArticlesBySource,
    stats: &EnrichmentStats,
) -> Result<()> {
    transition(pool, id, BulletinStatus::Draft).await?;

    let total: usize = raw_news.values().map(Vec::len).sum();
    sqlx::query(
        "UPDATE bulletins SET raw_news = ?, full_articles = ?, enrichment_stats = ?, total_news = ?, updated_at = ? WHERE id = ?",
    )
    .bind(to_json(raw_news)?)
    .bind(to_json(full_articles)?)
    .bind(to_json(stats)?)
    .bind(total as i64)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Store classifier output. Status stays `classifying` until summarization starts.
pub async fn save_classification(pool: &SqlitePool, id: Uuid, news: &ClassifiedNews) -> Result<()> {
    sqlx::query("UPDATE bulletins SET classified_news = ?, total_news = ?, updated_at = ? WHERE id = ?")
        .bind(to_json(news)?)
        .bind(news.total() as i64)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Store all six summaries and mark the bulletin `ready`.
pub async fn save_summaries(pool: &SqlitePool, id: Uuid, summaries: &CategorySummaries) -> Result<()> {
    transition(pool, id, BulletinStatus::Ready).await?;

    sqlx::query(
        "UPDATE bulletins SET economia = ?, politica = ?, sociedad = ?, seguridad = ?, internacional = ?, vial = ?, updated_at = ? WHERE id = ?",
    )
    .bind(summaries.get(Category::Economia))
    .bind(summaries.get(Category::Politica))
    .bind(summaries.get(Category::Sociedad))
    .bind(summaries.get(Category::Seguridad))
    .bind(summaries.get(Category::Internacional))
    .bind(summaries.get(Category::Vial))
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Absorbing failure state with the step and message that caused it.
pub async fn mark_failed(pool: &SqlitePool, id: Uuid, step: &str, message: &str) -> Result<()> {
    transition(pool, id, BulletinStatus::Failed).await?;

    let error_log = ErrorLog {
        step: step.to_string(),
        message: message.to_string(),
        timestamp: Utc::now(),
    };
    sqlx::query("UPDATE bulletins SET error_log = ?, updated_at = ? WHERE id = ?")
        .bind(to_json(&error_log)?)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    info!(bulletin_id = %id, step, "bulletin marked failed");
    Ok(())
}

/// Record activity on a bulletin so long-running phases are not mistaken for abandoned ones.
pub async fn touch_bulletin(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE bulletins SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Append a log entry; this also counts as activity on the bulletin.
pub async fn append_log(
    pool: &SqlitePool,
    bulletin_id: Uuid,
    step: &str,
    status: LogStatus,
    message: &str,
    metadata: Value,
    duration_ms: Option<i64>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO bulletin_logs (bulletin_id, step, status, message, metadata, duration_ms, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(bulletin_id.to_string())
    .bind(step)
    .bind(status.as_str())
    .bind(message)
    .bind(to_json(&metadata)?)
    .bind(duration_ms)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    touch_bulletin(pool, bulletin_id).await?;
    Ok(id)
}

/// Log entries in the order they were written.
pub async fn list_logs(pool: &SqlitePool, bulletin_id: Uuid) -> Result<Vec<PipelineLogEntry>> {
    let rows = sqlx::query(
        "SELECT id, bulletin_id, step, status, message, metadata, duration_ms, created_at \
         FROM bulletin_logs WHERE bulletin_id = ? ORDER BY id",
    )
    .bind(bulletin_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let bulletin_id: String = row.try_get("bulletin_id")?;
            let status: String = row.try_get("status")?;
            let created_at: DateTime<Utc> = row.try_get("created_at")?;
            Ok(PipelineLogEntry {
                id: row.try_get("id")?,
                bulletin_id: parse_uuid(&bulletin_id)?,
                step: row.try_get("step")?,
                status: status.parse().map_err(|e: String| PipelineError::Other(anyhow::anyhow!(e)))?,
                message: row.try_get("message")?,
                metadata: from_json(row.try_get("metadata")?)?.unwrap_or(Value::Null),
                duration_ms: row.try_get("duration_ms")?,
                created_at,
            })
        })
        .collect()
}
