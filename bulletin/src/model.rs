//! Domain types shared by every pipeline phase.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use common::ScrapeConfig;

/// A configured news outlet, as stored in the `sources` table.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub base_url: String,
    pub scrape_config: ScrapeConfig,
    pub is_active: bool,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub last_scraped_status: Option<String>,
    pub total_scraped: i64,
}

impl Source {
    /// URLs to visit for discovery. Falls back to the main URL when none are configured.
    pub fn scrape_urls(&self) -> Vec<String> {
        if self.scrape_config.urls.is_empty() {
            vec![self.url.clone()]
        } else {
            self.scrape_config.urls.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleMetadata {
    pub word_count: usize,
    /// Minutes at 200 words per minute
    pub reading_time: usize,
    /// 0..=100
    pub content_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    /// Short excerpt (at most 500 chars)
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub source: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArticleMetadata>,
}

fn default_selected() -> bool {
    true
}

impl Article {
    pub fn new(title: impl Into<String>, content: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            full_content: None,
            url: url.into(),
            image_url: None,
            author: None,
            published_date: None,
            source: source.into(),
            selected: true,
            scraped_at: Utc::now(),
            metadata: None,
        }
    }
}

/// Articles grouped by source name.
pub type ArticlesBySource = BTreeMap<String, Vec<Article>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Economia,
    Politica,
    Sociedad,
    Seguridad,
    Internacional,
    Vial,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Economia,
        Category::Politica,
        Category::Sociedad,
        Category::Seguridad,
        Category::Internacional,
        Category::Vial,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Category::Economia => "economia",
            Category::Politica => "politica",
            Category::Sociedad => "sociedad",
            Category::Seguridad => "seguridad",
            Category::Internacional => "internacional",
            Category::Vial => "vial",
        }
    }

    /// Human label used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Economia => "Economía",
            Category::Politica => "Política",
            Category::Sociedad => "Sociedad",
            Category::Seguridad => "Seguridad",
            Category::Internacional => "Internacional",
            Category::Vial => "Vial",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.key() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// An article as returned by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedArticle {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Classifier output. Every category key is required when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedNews {
    pub economia: Vec<ClassifiedArticle>,
    pub politica: Vec<ClassifiedArticle>,
    pub sociedad: Vec<ClassifiedArticle>,
    pub seguridad: Vec<ClassifiedArticle>,
    pub internacional: Vec<ClassifiedArticle>,
    pub vial: Vec<ClassifiedArticle>,
}

impl ClassifiedNews {
    pub fn get(&self, category: Category) -> &[ClassifiedArticle] {
        match category {
            Category::Economia => &self.economia,
            Category::Politica => &self.politica,
            Category::Sociedad => &self.sociedad,
            Category::Seguridad => &self.seguridad,
            Category::Internacional => &self.internacional,
            Category::Vial => &self.vial,
        }
    }

    pub fn counts(&self) -> BTreeMap<Category, usize> {
        Category::ALL.iter().map(|c| (*c, self.get(*c).len())).collect()
    }

    pub fn total(&self) -> usize {
        Category::ALL.iter().map(|c| self.get(*c).len()).sum()
    }
}

/// One summary paragraph per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySummaries {
    pub economia: String,
    pub politica: String,
    pub sociedad: String,
    pub seguridad: String,
    pub internacional: String,
    pub vial: String,
}

impl CategorySummaries {
    pub fn get(&self, category: Category) -> &str {
        match category {
            Category::Economia => &self.economia,
            Category::Politica => &self.politica,
            Category::Sociedad => &self.sociedad,
            Category::Seguridad => &self.seguridad,
            Category::Internacional => &self.internacional,
            Category::Vial => &self.vial,
        }
    }

    pub fn set(&mut self, category: Category, text: String) {
        let slot = match category {
            Category::Economia => &mut self.economia,
            Category::Politica => &mut self.politica,
            Category::Sociedad => &mut self.sociedad,
            Category::Seguridad => &mut self.seguridad,
            Category::Internacional => &mut self.internacional,
            Category::Vial => &mut self.vial,
        };
        *slot = text;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletinStatus {
    Draft,
    Scraping,
    Classifying,
    Summarizing,
    Ready,
    Authorized,
    Published,
    Failed,
}

impl BulletinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulletinStatus::Draft => "draft",
            BulletinStatus::Scraping => "scraping",
            BulletinStatus::Classifying => "classifying",
            BulletinStatus::Summarizing => "summarizing",
            BulletinStatus::Ready => "ready",
            BulletinStatus::Authorized => "authorized",
            BulletinStatus::Published => "published",
            BulletinStatus::Failed => "failed",
        }
    }

    /// A phase is currently running against the bulletin.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            BulletinStatus::Scraping | BulletinStatus::Classifying | BulletinStatus::Summarizing
        )
    }

    pub fn can_transition_to(&self, next: BulletinStatus) -> bool {
        use BulletinStatus::*;
        match (self, next) {
            (Failed, _) => false,
            (s, Failed) => s.is_in_progress() || *s == Draft,
            (Draft, Scraping) | (Draft, Classifying) => true,
            (Scraping, Draft) => true,
            (Classifying, Summarizing) => true,
            (Summarizing, Ready) => true,
            (Ready, Authorized) => true,
            (Authorized, Published) => true,
            (Published, Authorized) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BulletinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulletinStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use BulletinStatus::*;
        [Draft, Scraping, Classifying, Summarizing, Ready, Authorized, Published, Failed]
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown bulletin status: {}", s))
    }
}

/// Enrichment phase counters persisted on the bulletin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStats {
    pub total_articles: usize,
    pub enriched_articles: usize,
    pub failed_articles: usize,
    /// Percentage with two decimals, e.g. "60.00%"
    pub success_rate: String,
    pub duration_ms: u64,
}

impl EnrichmentStats {
    pub fn new(total: usize, enriched: usize, duration_ms: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            enriched as f64 * 100.0 / total as f64
        };
        Self {
            total_articles: total,
            enriched_articles: enriched,
            failed_articles: total - enriched,
            success_rate: format!("{:.2}%", rate),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub step: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bulletin {
    pub id: Uuid,
    pub date: NaiveDate,
    pub status: BulletinStatus,
    pub raw_news: Option<ArticlesBySource>,
    pub full_articles: Option<ArticlesBySource>,
    pub classified_news: Option<ClassifiedNews>,
    pub summaries: CategorySummaries,
    pub total_news: i64,
    pub enrichment_stats: Option<EnrichmentStats>,
    pub error_log: Option<ErrorLog>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bulletin {
    /// Articles the classifier should see: enriched set when present, raw set otherwise.
    pub fn working_articles(&self) -> Option<&ArticlesBySource> {
        self.full_articles.as_ref().or(self.raw_news.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    InProgress,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::InProgress => "in_progress",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(LogStatus::InProgress),
            "completed" => Ok(LogStatus::Completed),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineLogEntry {
    pub id: i64,
    pub bulletin_id: Uuid,
    pub step: String,
    pub status: LogStatus,
    pub message: String,
    pub metadata: serde_json::Value,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_lifecycle() {
        use BulletinStatus::*;
        assert!(Draft.can_transition_to(Scraping));
        assert!(Scraping.can_transition_to(Draft));
        assert!(Draft.can_transition_to(Classifying));
        assert!(Classifying.can_transition_to(Summarizing));
        assert!(Summarizing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Authorized));
        assert!(Authorized.can_transition_to(Published));
        assert!(Published.can_transition_to(Authorized));

        assert!(Scraping.can_transition_to(Failed));
        assert!(Summarizing.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Summarizing));
    }

    #[test]
    fn category_keys_round_trip() {
        for c in Category::ALL {
            assert_eq!(c.key().parse::<Category>().unwrap(), c);
            assert_eq!(serde_json::to_string(&c).unwrap(), format!("\"{}\"", c.key()));
        }
        assert!("deportes".parse::<Category>().is_err());
    }

    #[test]
    fn classified_news_requires_every_key() {
        let missing_vial = r#"{"economia":[],"politica":[],"sociedad":[],"seguridad":[],"internacional":[]}"#;
        assert!(serde_json::from_str::<ClassifiedNews>(missing_vial).is_err());
    }

    #[test]
    fn classified_news_round_trip_is_byte_identical() {
        let text = r#"{"economia":[{"title":"Sube el precio del arroz","content":"El quintal llega a 40 dólares.","url":"https://a.ec/1","source":"Primicias","imageUrl":"https://a.ec/1.jpg"}],"politica":[{"title":"Asamblea aprueba reforma","content":"Con 80 votos.","source":"La Hora"}],"sociedad":[],"seguridad":[],"internacional":[],"vial":[]}"#;
        let parsed: ClassifiedNews = serde_json::from_str(text).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), text);
        assert_eq!(parsed.total(), 2);
        assert_eq!(parsed.counts()[&Category::Politica], 1);
    }

    #[test]
    fn article_serializes_camel_case_and_defaults_selected() {
        let mut article = Article::new("Titular de prueba suficiente", "contenido", "https://x.ec/a", "X");
        article.image_url = Some("https://x.ec/a.jpg".into());
        let value = serde_json::to_value(&article).unwrap();
        assert!(value.get("imageUrl").is_some());
        assert!(value.get("scrapedAt").is_some());
        assert!(value.get("fullContent").is_none());

        let mut obj = value.as_object().unwrap().clone();
        obj.remove("selected");
        let back: Article = serde_json::from_value(serde_json::Value::Object(obj)).unwrap();
        assert!(back.selected);
    }

    #[test]
    fn source_falls_back_to_primary_url() {
        let mut source = Source {
            id: 1,
            name: "La Hora".into(),
            url: "https://www.lahora.com.ec/".into(),
            base_url: "https://www.lahora.com.ec".into(),
            scrape_config: ScrapeConfig::default(),
            is_active: true,
            last_scraped_at: None,
            last_scraped_status: None,
            total_scraped: 0,
        };
        assert_eq!(source.scrape_urls(), vec!["https://www.lahora.com.ec/".to_string()]);
        source.scrape_config.urls = vec!["https://www.lahora.com.ec/pais".into()];
        assert_eq!(source.scrape_urls(), vec!["https://www.lahora.com.ec/pais".to_string()]);
    }

    #[test]
    fn enrichment_stats_rate() {
        let stats = EnrichmentStats::new(5, 3, 1200);
        assert_eq!(stats.failed_articles, 2);
        assert_eq!(stats.success_rate, "60.00%");
        assert_eq!(EnrichmentStats::new(0, 0, 0).success_rate, "0.00%");
    }
}
