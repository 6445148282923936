/*!
common/src/lib.rs

Shared configuration types and DB helper functions for the bulletin pipeline.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- Helpers to initialize and migrate an SQLite database
- Synchronisation of configured news sources into the `sources` table
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/bulletin.db")
    pub path: String,
}

/// Daily pipeline schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock times in "HH:MM" 24h format (UTC) when the daily run should start
    #[serde(default)]
    pub times: Vec<String>,
}

/// Discovery ("discover content") service used to fetch category pages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delays_seconds: Option<Vec<u64>>,
    pub formats: Option<Vec<String>>,
    pub mobile: Option<bool>,
    pub max_candidates_per_url: Option<usize>,
    /// Extra title tokens that mark navigation or ad links
    pub banned_title_tokens: Option<Vec<String>>,
}

/// Deep-extraction service used to enrich discovered articles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_concurrency: Option<usize>,
}

/// OpenAI-compatible completion endpoint plus the model line-up
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    /// High-capability model (classification primary, summarization fallback)
    pub primary_model: Option<String>,
    /// Secondary model used when the primary exhausts its attempts
    pub fallback_model: Option<String>,
    /// Low-latency model tried first for summaries
    pub fast_model: Option<String>,
    pub classification_timeout_seconds: Option<u64>,
    pub summarization_timeout_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delays_seconds: Option<Vec<u64>>,
    pub use_fallback: Option<bool>,
    /// Upper bound on the serialized article payload sent for classification
    pub max_classification_chars: Option<usize>,
    /// Output cap for summary calls; classification is never capped
    pub summarization_max_tokens: Option<usize>,
}

/// Per-category summary template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryTemplateConfig {
    pub max_words: Option<usize>,
    pub example_output: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizationConfig {
    pub default_max_words: Option<usize>,
    /// Keyed by category key ("economia", "politica", ...)
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryTemplateConfig>,
}

/// Crawl options attached to a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_true")]
    pub only_main_content: bool,
    #[serde(default)]
    pub wait_for: u64,
    #[serde(default = "default_true")]
    pub remove_base64_images: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            only_main_content: true,
            wait_for: 0,
            remove_base64_images: true,
        }
    }
}

/// A news source declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub scrape_config: ScrapeConfig,
}

/// Admin / maintenance config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    pub auto_migrate: Option<bool>,
    /// Minutes after which an in-progress bulletin is considered abandoned
    pub stale_after_minutes: Option<i64>,
}

/// HTTP listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub discovery: Option<DiscoveryConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub llm: Option<LlmConfig>,
    pub summarization: Option<SummarizationConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub admin: Option<AdminConfig>,
    pub server: Option<ServerConfig>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Run SQL migrations from the workspace `migrations` directory against the given pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and opens the database in WAL mode
/// with a modest pool size (5 connections).
///
/// Example:
///   let pool = init_db_pool("data/bulletin.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// In-memory database with migrations applied. A single connection is used because
/// every SQLite in-memory connection is its own database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open in-memory sqlite database")?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Ensure that sources defined in the configuration are present in the `sources` table.
/// Safe to call repeatedly: rows are matched by name and their crawl settings refreshed.
/// Scrape bookkeeping columns (`last_scraped_*`, `total_scraped`) are left untouched.
pub async fn sync_sources(config: &Config, pool: &SqlitePool) -> Result<usize> {
    for s in &config.sources {
        let scrape_config = serde_json::to_string(&s.scrape_config)
            .with_context(|| format!("failed to serialize scrape config for {}", s.name))?;
        let base_url = s.base_url.clone().unwrap_or_else(|| origin_of(&s.url));

        sqlx::query(
            "INSERT OR IGNORE INTO sources (name, url, base_url, scrape_config, is_active) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&s.name)
        .bind(&s.url)
        .bind(&base_url)
        .bind(&scrape_config)
        .bind(s.is_active)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert or ignore source {}", s.name))?;

        sqlx::query(
            "UPDATE sources SET url = ?, base_url = ?, scrape_config = ?, is_active = ? WHERE name = ?",
        )
        .bind(&s.url)
        .bind(&base_url)
        .bind(&scrape_config)
        .bind(s.is_active)
        .bind(&s.name)
        .execute(pool)
        .await
        .with_context(|| format!("failed to update source {}", s.name))?;
    }

    tracing::info!(count = config.sources.len(), "configured sources synchronized");
    Ok(config.sources.len())
}

/// `https://host/path` -> `https://host`; input returned unchanged when it is not a URL.
fn origin_of(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(u) => u.origin().ascii_serialization(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    const SAMPLE: &str = r#"
        [database]
        path = "data/test.db"

        [scheduler]
        times = ["05:00", "11:00"]

        [llm]
        primary_model = "anthropic/claude-sonnet-4"
        use_fallback = true

        [summarization]
        default_max_words = 150

        [summarization.categories.vial]
        max_words = 80

        [[sources]]
        name = "Primicias"
        url = "https://www.primicias.ec/noticias/"

        [sources.scrape_config]
        urls = ["https://www.primicias.ec/noticias/politica/", "https://www.primicias.ec/noticias/economia/"]
        waitFor = 2000
    "#;

    #[test]
    fn parses_sections_and_sources() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse config");
        assert_eq!(cfg.scheduler.times.len(), 2);
        assert_eq!(cfg.sources.len(), 1);

        let source = &cfg.sources[0];
        assert!(source.is_active);
        assert_eq!(source.scrape_config.urls.len(), 2);
        assert_eq!(source.scrape_config.wait_for, 2000);
        assert!(source.scrape_config.only_main_content);

        let summarization = cfg.summarization.expect("summarization section");
        assert_eq!(summarization.categories["vial"].max_words, Some(80));
    }

    #[test]
    fn merge_override_wins_and_keeps_defaults() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [llm]
            primary_model = "a"
            fast_model = "b"
            "#,
        )
        .unwrap();
        let over: toml::Value = toml::from_str(
            r#"
            [llm]
            primary_model = "c"
            "#,
        )
        .unwrap();
        merge_toml(&mut base, over);

        assert_eq!(base["llm"]["primary_model"].as_str(), Some("c"));
        assert_eq!(base["llm"]["fast_model"].as_str(), Some("b"));
    }

    #[tokio::test]
    async fn load_with_defaults_merges_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        std::fs::write(&default_path, SAMPLE).unwrap();
        std::fs::write(&override_path, "[database]\npath = \"other.db\"\n").unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load");
        assert_eq!(cfg.database.path, "other.db");
        assert_eq!(cfg.sources.len(), 1);
    }

    #[tokio::test]
    async fn file_pool_and_source_sync() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("bulletin.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        run_migrations(&pool).await.expect("migrate");

        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        sync_sources(&cfg, &pool).await.expect("sync");
        // second sync must not duplicate
        sync_sources(&cfg, &pool).await.expect("sync again");

        let rows = sqlx::query("SELECT name, base_url FROM sources")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let base_url: String = rows[0].get("base_url");
        assert_eq!(base_url, "https://www.primicias.ec");
    }

    #[tokio::test]
    async fn memory_pool_has_schema() {
        let pool = init_memory_pool().await.expect("memory pool");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bulletins")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
