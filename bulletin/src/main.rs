/*
bulletin - single-binary main.rs
This binary starts the Rocket HTTP server and runs the scheduled pipeline worker inside the same process.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::Config;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;

use bulletin::discovery::client::RemoteDiscoveryClient;
use bulletin::enrichment::client::CrawlServiceClient;
use bulletin::extraction::{Extractor, DEFAULT_MAX_CANDIDATES};
use bulletin::llm::remote::RemoteLlmProvider;
use bulletin::llm::AiClient;
use bulletin::pipeline::{Pipeline, PipelineSettings};
use bulletin::scheduler;
use bulletin::server::launch_rocket;

#[derive(Parser, Debug)]
#[command(name = "bulletin", about = "Daily news bulletin server + pipeline worker")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable background worker (run server only)
    #[arg(long)]
    no_worker: bool,

    /// Run worker only (do not bind HTTP server)
    #[arg(long)]
    worker_only: bool,

    /// Run the full pipeline for today once at startup
    #[arg(long)]
    run_now: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config.clone() {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let db_pool = match init_db_pool(&db_path_abs).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
            return Err(e);
        }
    };

    if config.admin.as_ref().and_then(|a| a.auto_migrate).unwrap_or(false) {
        info!("Auto-migrate enabled: running DB migrations");
        common::run_migrations(&db_pool).await?;
        info!("DB migrations completed");
    }
    common::sync_sources(&config, &db_pool).await?;

    let pipeline = Arc::new(build_pipeline(&config, db_pool.clone())?);
    let shutdown_notify = Arc::new(Notify::new());

    if args.worker_only {
        info!("Starting in worker-only mode");
        let worker = run_worker(pipeline.clone(), config.clone(), shutdown_notify.clone(), args.run_now);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, notifying worker to shutdown");
                shutdown_notify.notify_waiters();
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            res = worker => {
                if let Err(e) = res {
                    error!(%e, "worker encountered an error");
                }
            }
        }
        info!("worker-only run finished");
        return Ok(());
    }

    let mut worker_handle = None;
    if !args.no_worker {
        info!("Spawning background worker task");
        let w_pipeline = pipeline.clone();
        let w_cfg = config.clone();
        let w_shutdown = shutdown_notify.clone();
        let run_now = args.run_now;
        worker_handle = Some(tokio::spawn(async move {
            if let Err(e) = run_worker(w_pipeline, w_cfg, w_shutdown, run_now).await {
                error!(%e, "background worker failed");
                Err(e)
            } else {
                Ok(())
            }
        }));
    } else {
        info!("Background worker disabled via CLI (--no-worker)");
    }

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(pipeline.clone(), Some(Arc::new(config.clone()))).await {
        error!(%e, "Rocket server failed");
    }

    info!("HTTP server stopped; notifying worker to shutdown");
    shutdown_notify.notify_waiters();

    if let Some(handle) = worker_handle {
        match tokio::time::timeout(Duration::from_secs(20), handle).await {
            Ok(join_res) => match join_res {
                Ok(Ok(_)) => info!("worker exited cleanly"),
                Ok(Err(e)) => error!(%e, "worker task returned an error"),
                Err(join_err) => error!(%join_err, "worker task panicked"),
            },
            Err(_) => {
                info!("Timed out waiting for worker to exit; continuing shutdown");
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wire the remote services and the model line-up from configuration.
fn build_pipeline(config: &Config, pool: SqlitePool) -> Result<Pipeline> {
    let discovery_cfg = config
        .discovery
        .as_ref()
        .context("Missing [discovery] section in config")?;
    let discovery = RemoteDiscoveryClient::from_config(discovery_cfg)?;

    let extractor = Extractor::new(
        discovery_cfg.banned_title_tokens.as_deref().unwrap_or(&[]),
        discovery_cfg.max_candidates_per_url.unwrap_or(DEFAULT_MAX_CANDIDATES),
    )?;

    let enrichment = CrawlServiceClient::from_config(&config.enrichment.clone().unwrap_or_default())?;

    let llm_cfg = config.llm.clone().unwrap_or_default();
    let provider = RemoteLlmProvider::from_config(&llm_cfg)?;
    let ai = AiClient::from_config(Arc::new(provider), Some(&llm_cfg));
    info!(
        classification = %ai.classification_policy().primary_model,
        summaries = %ai.summarization_policy().primary_model,
        "LLM line-up initialized"
    );

    Ok(Pipeline::new(
        pool,
        Arc::new(discovery),
        extractor,
        Arc::new(enrichment),
        ai,
        PipelineSettings::from_config(config),
    ))
}

/// Background worker: runs the full pipeline at each configured daily time until
/// `shutdown_notify` is signalled.
async fn run_worker(
    pipeline: Arc<Pipeline>,
    config: Config,
    shutdown_notify: Arc<Notify>,
    run_now: bool,
) -> anyhow::Result<()> {
    let times = scheduler::parse_times(&config.scheduler.times)?;
    info!("worker: initializing scheduler with times: {:?}", config.scheduler.times);

    if run_now {
        run_once(&pipeline).await;
    }

    loop {
        let Some(next) = scheduler::next_run(Utc::now(), &times) else {
            warn!("worker: no scheduler times configured, waiting for shutdown");
            shutdown_notify.notified().await;
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        info!(next_run = %next, "worker: sleeping until next scheduled run");

        select! {
            _ = tokio::time::sleep(wait) => {
                run_once(&pipeline).await;
            },
            _ = shutdown_notify.notified() => {
                info!("worker: shutdown requested, exiting loop");
                break;
            }
        }
    }

    info!("worker: cleanup complete");
    Ok(())
}

async fn run_once(pipeline: &Pipeline) {
    let today = Utc::now().date_naive();
    match pipeline.run_full(today).await {
        Ok(id) => info!(bulletin_id = %id, "worker: daily bulletin ready"),
        Err(e) => error!(%e, "worker: daily pipeline run failed"),
    }
}
