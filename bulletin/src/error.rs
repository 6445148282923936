use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{BulletinStatus, Category};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to fetch {url}: {message}")]
    SourceFetch { url: String, message: String },

    #[error("no valid articles extracted from {url}")]
    ExtractionEmpty { url: String },

    #[error("enrichment failed for {source_name}: {message}")]
    Enrichment { source_name: String, message: String },

    #[error("invalid classification output: {}", .0.join("; "))]
    ClassificationValidation(Vec<String>),

    #[error("classification payload has {size} chars, limit is {limit}")]
    ClassificationInputTooLarge { size: usize, limit: usize },

    #[error("model {model} timed out after {seconds}s")]
    ModelTimeout { model: String, seconds: u64 },

    #[error("model {model} failed: {message}")]
    Model { model: String, message: String },

    #[error("all models failed, last error: {0}")]
    AllModelsFailed(String),

    #[error("summary for {category} failed: {message}")]
    SummarizationCategory { category: Category, message: String },

    #[error("every category failed to summarize")]
    AllCategoriesFailed,

    #[error("no active sources configured")]
    NoActiveSources,

    #[error("every source failed during discovery")]
    AllSourcesFailed,

    #[error("no selected articles to classify")]
    NoSelectedArticles,

    #[error("bulletin for {date} already exists with status {status}")]
    BulletinAlreadyExists { date: NaiveDate, status: BulletinStatus },

    #[error("cannot move bulletin from {from} to {to}")]
    InvalidTransition { from: BulletinStatus, to: BulletinStatus },

    #[error("bulletin {0} not found")]
    BulletinNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
