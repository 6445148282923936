use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use common::Config;

use crate::error::PipelineError;
use crate::model::{Bulletin, PipelineLogEntry};
use crate::pipeline::Pipeline;
use crate::progress::{self, Progress};
use crate::storage;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Option<Arc<Config>>,
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    error: String,
}

type ApiResult<T> = std::result::Result<T, (Status, Json<ApiError>)>;

fn status_for(err: &PipelineError) -> Status {
    match err {
        PipelineError::BulletinNotFound(_) => Status::NotFound,
        PipelineError::BulletinAlreadyExists { .. }
        | PipelineError::InvalidTransition { .. }
        | PipelineError::NoSelectedArticles => Status::Conflict,
        _ => Status::InternalServerError,
    }
}

fn api_error(err: PipelineError) -> (Status, Json<ApiError>) {
    let status = status_for(&err);
    if status == Status::InternalServerError {
        error!("request failed: {}", err);
    }
    (status, Json(ApiError { error: err.to_string() }))
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| api_error(PipelineError::BulletinNotFound(raw.to_string())))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    scheduler_times: Vec<String>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let scheduler_times = state
        .config
        .as_ref()
        .map(|c| c.scheduler.times.clone())
        .unwrap_or_default();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        scheduler_times,
    })
}

/// Start discovery + enrichment for today. The work runs in the background.
#[post("/api/v1/bulletins/scrape")]
async fn start_scrape(state: &State<AppState>) -> ApiResult<(Status, Json<Value>)> {
    let today = Utc::now().date_naive();
    let bulletin = state.pipeline.start_scrape(today).await.map_err(api_error)?;

    let pipeline = state.pipeline.clone();
    let id = bulletin.id;
    tokio::spawn(async move {
        info!(bulletin_id = %id, "scrape triggered");
        if let Err(e) = pipeline.run_scrape(id).await {
            error!(bulletin_id = %id, "scrape failed: {}", e);
        }
    });

    Ok((Status::Accepted, Json(json!({"id": id, "status": bulletin.status}))))
}

#[post("/api/v1/bulletins/<id>/classify")]
async fn classify(state: &State<AppState>, id: &str) -> ApiResult<(Status, Json<Value>)> {
    let id = parse_id(id)?;
    state.pipeline.start_classification(id).await.map_err(api_error)?;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run_classification(id).await {
            error!(bulletin_id = %id, "classification failed: {}", e);
        }
    });

    Ok((Status::Accepted, Json(json!({"id": id, "status": "classifying"}))))
}

#[post("/api/v1/bulletins/<id>/summarize")]
async fn summarize(state: &State<AppState>, id: &str) -> ApiResult<(Status, Json<Value>)> {
    let id = parse_id(id)?;
    state.pipeline.start_summarization(id).await.map_err(api_error)?;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run_summarization(id).await {
            error!(bulletin_id = %id, "summarization failed: {}", e);
        }
    });

    Ok((Status::Accepted, Json(json!({"id": id, "status": "summarizing"}))))
}

#[get("/api/v1/bulletins/<id>")]
async fn get_bulletin(state: &State<AppState>, id: &str) -> ApiResult<Json<Bulletin>> {
    let id = parse_id(id)?;
    let bulletin = storage::get_bulletin(state.pipeline.pool(), id).await.map_err(api_error)?;
    Ok(Json(bulletin))
}

#[get("/api/v1/bulletins/<id>/progress")]
async fn get_progress(state: &State<AppState>, id: &str) -> ApiResult<Json<Progress>> {
    let id = parse_id(id)?;
    let pool = state.pipeline.pool();
    let bulletin = storage::get_bulletin(pool, id).await.map_err(api_error)?;
    let logs = storage::list_logs(pool, id).await.map_err(api_error)?;
    let names: Vec<String> = storage::load_sources(pool)
        .await
        .map_err(api_error)?
        .into_iter()
        .filter(|s| s.is_active)
        .map(|s| s.name)
        .collect();

    Ok(Json(progress::compute(&bulletin, &logs, &names)))
}

#[get("/api/v1/bulletins/<id>/logs")]
async fn get_logs(state: &State<AppState>, id: &str) -> ApiResult<Json<Vec<PipelineLogEntry>>> {
    let id = parse_id(id)?;
    let pool = state.pipeline.pool();
    storage::get_bulletin(pool, id).await.map_err(api_error)?;
    let logs = storage::list_logs(pool, id).await.map_err(api_error)?;
    Ok(Json(logs))
}

/// Rocket instance with state and routes, without binding a listener.
pub fn build_rocket(state: AppState, figment: rocket::figment::Figment) -> Rocket<Build> {
    rocket::custom(figment).manage(state).mount(
        "/",
        routes![
            health,
            status,
            start_scrape,
            classify,
            summarize,
            get_bulletin,
            get_progress,
            get_logs,
        ],
    )
}

/// Serve the HTTP API until Rocket shuts down. Address and port come from `[server]`.
pub async fn launch_rocket(pipeline: Arc<Pipeline>, config: Option<Arc<Config>>) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = config.as_ref().and_then(|c| c.server.as_ref()) {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let state = AppState {
        started_at: Utc::now(),
        config,
        pipeline,
    };

    let _rocket = build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    Ok(())
}
