//! Phase 3: assign every selected article to exactly one category with a single model call.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::json::extract_json;
use crate::llm::AiClient;
use crate::model::{ArticlesBySource, Category, ClassifiedArticle, ClassifiedNews};
use crate::prompts;

pub const DEFAULT_MAX_INPUT_CHARS: usize = 400_000;

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub news: ClassifiedNews,
    pub model: String,
    pub attempts: u32,
    pub used_fallback: bool,
    pub input_articles: usize,
}

/// Selected articles in the shape the classifier echoes back.
pub fn selected_payload(articles: &ArticlesBySource) -> Vec<ClassifiedArticle> {
    articles
        .values()
        .flatten()
        .filter(|a| a.selected)
        .map(|a| ClassifiedArticle {
            title: a.title.clone(),
            content: a.content.clone(),
            url: Some(a.url.clone()),
            source: Some(a.source.clone()),
            image_url: a.image_url.clone(),
        })
        .collect()
}

fn optional_string(item: &serde_json::Map<String, Value>, key: &str) -> bool {
    matches!(item.get(key), None | Some(Value::Null) | Some(Value::String(_)))
}

/// Check the classifier output against the six-category contract. All problems are reported
/// together; nothing is accepted when any check fails. The output may hold at most
/// `input_articles` items across all categories.
pub fn validate_classification(value: &Value, input_articles: usize) -> Result<ClassifiedNews, PipelineError> {
    let Some(obj) = value.as_object() else {
        return Err(PipelineError::ClassificationValidation(vec![
            "response is not a JSON object".to_string(),
        ]));
    };

    let mut errors = Vec::new();
    let mut classified = 0;
    for category in Category::ALL {
        let key = category.key();
        let Some(entry) = obj.get(key) else {
            errors.push(format!("missing category '{}'", key));
            continue;
        };
        let Some(items) = entry.as_array() else {
            errors.push(format!("category '{}' must be an array", key));
            continue;
        };
        classified += items.len();

        for (i, item) in items.iter().enumerate() {
            let Some(item) = item.as_object() else {
                errors.push(format!("{}[{}] must be an object", key, i));
                continue;
            };
            for field in ["title", "content", "source"] {
                let ok = item
                    .get(field)
                    .and_then(Value::as_str)
                    .map_or(false, |s| !s.trim().is_empty());
                if !ok {
                    errors.push(format!("{}[{}].{} is required and must be a non-empty string", key, i, field));
                }
            }
            if !optional_string(item, "url") {
                errors.push(format!("{}[{}].url must be a string", key, i));
            }
            if !optional_string(item, "imageUrl") {
                errors.push(format!("{}[{}].imageUrl must be a string", key, i));
            }
        }
    }

    if classified > input_articles {
        errors.push(format!(
            "{} articles classified but only {} were selected",
            classified, input_articles
        ));
    }

    if !errors.is_empty() {
        return Err(PipelineError::ClassificationValidation(errors));
    }
    Ok(serde_json::from_value(value.clone())?)
}

pub async fn classify(
    ai: &AiClient,
    articles: &ArticlesBySource,
    max_input_chars: usize,
) -> Result<ClassificationOutcome, PipelineError> {
    let payload = selected_payload(articles);
    if payload.is_empty() {
        return Err(PipelineError::NoSelectedArticles);
    }

    let news_data = serde_json::to_string_pretty(&payload)?;
    let size = news_data.chars().count();
    if size > max_input_chars {
        return Err(PipelineError::ClassificationInputTooLarge {
            size,
            limit: max_input_chars,
        });
    }

    info!(articles = payload.len(), chars = size, "classifying selected articles");
    let prompt = prompts::classification_prompt(&news_data);
    let reply = ai.complete_classification(prompts::CLASSIFICATION_SYSTEM, &prompt).await?;

    let Some((strategy, value)) = extract_json(&reply.content) else {
        warn!(model = %reply.model, "classification reply contained no JSON");
        return Err(PipelineError::ClassificationValidation(vec![
            "response contains no parseable JSON".to_string(),
        ]));
    };
    let news = validate_classification(&value, payload.len())?;

    info!(
        model = %reply.model,
        strategy = ?strategy,
        classified = news.total(),
        "classification accepted"
    );
    Ok(ClassificationOutcome {
        news,
        model: reply.model,
        attempts: reply.attempts,
        used_fallback: reply.used_fallback,
        input_articles: payload.len(),
    })
}
