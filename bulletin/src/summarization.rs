//! Phase 4: one summary paragraph per category, all categories concurrently.

use std::collections::HashMap;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::AiClient;
use crate::model::{Category, CategorySummaries, ClassifiedArticle, ClassifiedNews};
use crate::prompts;

pub const NO_NEWS_PLACEHOLDER: &str = "No hay información disponible para esta categoría en el día de hoy.";
pub const ERROR_PLACEHOLDER: &str =
    "Error generando el resumen para esta categoría. Por favor, intente nuevamente.";
pub const DEFAULT_MAX_WORDS: usize = 150;
pub const MIN_WORDS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct CategoryTemplate {
    pub max_words: usize,
    pub example_output: Option<String>,
}

/// Word ceilings and example outputs per category.
#[derive(Debug, Clone)]
pub struct SummaryTemplates {
    default_max_words: usize,
    overrides: HashMap<Category, CategoryTemplate>,
}

impl Default for SummaryTemplates {
    fn default() -> Self {
        Self {
            default_max_words: DEFAULT_MAX_WORDS,
            overrides: HashMap::new(),
        }
    }
}

impl SummaryTemplates {
    pub fn from_config(cfg: Option<&common::SummarizationConfig>) -> Self {
        let Some(cfg) = cfg else {
            return Self::default();
        };
        let default_max_words = cfg.default_max_words.unwrap_or(DEFAULT_MAX_WORDS);

        let mut overrides = HashMap::new();
        for (key, template) in &cfg.categories {
            match key.parse::<Category>() {
                Ok(category) => {
                    overrides.insert(
                        category,
                        CategoryTemplate {
                            max_words: template.max_words.unwrap_or(default_max_words),
                            example_output: template.example_output.clone(),
                        },
                    );
                }
                Err(e) => warn!("ignoring summary template: {}", e),
            }
        }
        Self {
            default_max_words,
            overrides,
        }
    }

    pub fn get(&self, category: Category) -> CategoryTemplate {
        self.overrides.get(&category).cloned().unwrap_or(CategoryTemplate {
            max_words: self.default_max_words,
            example_output: None,
        })
    }
}

/// Length verdict for a generated summary. The ceiling tolerates 10 % overshoot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum LengthCheck {
    Ok { words: usize },
    TooShort { words: usize, min: usize },
    OverCeiling { words: usize, max: usize },
    TooLong { words: usize, max_with_tolerance: usize },
}

impl LengthCheck {
    pub fn words(&self) -> usize {
        match *self {
            LengthCheck::Ok { words }
            | LengthCheck::TooShort { words, .. }
            | LengthCheck::OverCeiling { words, .. }
            | LengthCheck::TooLong { words, .. } => words,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, LengthCheck::Ok { .. } | LengthCheck::OverCeiling { .. })
    }
}

pub fn check_length(text: &str, max_words: usize) -> LengthCheck {
    let words = text.split_whitespace().count();
    let max_with_tolerance = max_words + max_words / 10;
    if words < MIN_WORDS {
        LengthCheck::TooShort { words, min: MIN_WORDS }
    } else if words > max_with_tolerance {
        LengthCheck::TooLong { words, max_with_tolerance }
    } else if words > max_words {
        LengthCheck::OverCeiling { words, max: max_words }
    } else {
        LengthCheck::Ok { words }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// No articles, placeholder stored without a model call
    Empty,
    Generated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub category: Category,
    pub status: CategoryStatus,
    pub articles: usize,
    pub model: Option<String>,
    pub length: Option<LengthCheck>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SummarizationOutcome {
    pub summaries: CategorySummaries,
    pub reports: Vec<CategoryReport>,
}

impl SummarizationOutcome {
    pub fn failed(&self) -> Vec<Category> {
        self.reports
            .iter()
            .filter(|r| r.status == CategoryStatus::Failed)
            .map(|r| r.category)
            .collect()
    }
}

/// Summary for one category. Empty categories never reach the model.
pub async fn summarize_category(
    ai: &AiClient,
    category: Category,
    articles: &[ClassifiedArticle],
    template: &CategoryTemplate,
) -> Result<(String, CategoryReport), PipelineError> {
    if articles.is_empty() {
        return Ok((
            NO_NEWS_PLACEHOLDER.to_string(),
            CategoryReport {
                category,
                status: CategoryStatus::Empty,
                articles: 0,
                model: None,
                length: None,
                error: None,
            },
        ));
    }

    let news = serde_json::to_string_pretty(articles)?;
    let prompt = prompts::summary_prompt(category, &news, template.max_words, template.example_output.as_deref());
    let reply = ai
        .complete_summary(prompts::SUMMARY_SYSTEM, &prompt)
        .await
        .map_err(|e| PipelineError::SummarizationCategory {
            category,
            message: e.to_string(),
        })?;

    let text = reply.content.trim().to_string();
    let length = check_length(&text, template.max_words);
    match length {
        LengthCheck::Ok { words } => info!(%category, words, model = %reply.model, "summary generated"),
        other => warn!(%category, model = %reply.model, ?other, "summary length outside target"),
    }

    Ok((
        text,
        CategoryReport {
            category,
            status: CategoryStatus::Generated,
            articles: articles.len(),
            model: Some(reply.model),
            length: Some(length),
            error: None,
        },
    ))
}

/// Summarize all six categories concurrently. Per-category failures store the error
/// placeholder; only a failure of every category is fatal.
pub async fn summarize_all(
    ai: &AiClient,
    news: &ClassifiedNews,
    templates: &SummaryTemplates,
) -> Result<SummarizationOutcome, PipelineError> {
    let results = join_all(Category::ALL.iter().map(|&category| async move {
        let template = templates.get(category);
        let result = summarize_category(ai, category, news.get(category), &template).await;
        (category, result)
    }))
    .await;

    let mut outcome = SummarizationOutcome {
        summaries: CategorySummaries::default(),
        reports: Vec::with_capacity(results.len()),
    };

    for (category, result) in results {
        match result {
            Ok((text, report)) => {
                outcome.summaries.set(category, text);
                outcome.reports.push(report);
            }
            Err(e) => {
                warn!(%category, "summary failed: {}", e);
                outcome.summaries.set(category, ERROR_PLACEHOLDER.to_string());
                outcome.reports.push(CategoryReport {
                    category,
                    status: CategoryStatus::Failed,
                    articles: news.get(category).len(),
                    model: None,
                    length: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if outcome.failed().len() == Category::ALL.len() {
        return Err(PipelineError::AllCategoriesFailed);
    }
    Ok(outcome)
}
