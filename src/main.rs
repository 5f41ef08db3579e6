mod api;
mod catalog;
mod config;
mod contest;
mod duel;
mod error;
mod grader;
mod metrics;
mod sandbox;
mod store;
mod submissions;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{AppState, routes},
    catalog::InMemoryCatalog,
    config::AppConfig,
    contest::{ContestEngine, ContestReaper},
    duel::MatchEngine,
    grader::Grader,
    metrics::MetricsRegistry,
    sandbox::SandboxFactory,
    store::MemoryRepository,
    submissions::SubmissionLog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_tracing(&cfg);

    let catalog = match &cfg.catalog_path {
        Some(path) => InMemoryCatalog::from_json_file(path)
            .with_context(|| format!("failed to load catalog from {}", path.display()))?,
        None => {
            tracing::warn!("CATALOG_PATH not set, starting with an empty catalog");
            InMemoryCatalog::default()
        }
    };
    let catalog = Arc::new(catalog);

    let metrics = Arc::new(MetricsRegistry::new());
    let sandbox =
        SandboxFactory::from_config(&cfg.judge).context("sandbox backend init failed")?;
    let grader = Arc::new(Grader::new(
        catalog.clone(),
        sandbox,
        metrics.clone(),
        cfg.judge.clone(),
    ));

    let contests = Arc::new(ContestEngine::new(
        Arc::new(MemoryRepository::new("session")),
        catalog.clone(),
        grader.clone(),
        metrics.clone(),
        cfg.contest.clone(),
    ));
    let matches = Arc::new(MatchEngine::new(
        Arc::new(MemoryRepository::new("match")),
        grader.clone(),
        metrics.clone(),
        cfg.duel.clone(),
    ));

    let shutdown = CancellationToken::new();
    let reaper = cfg
        .contest
        .reaper_enabled
        .then(|| ContestReaper::spawn(contests.clone(), shutdown.clone()));

    let app = routes(AppState {
        grader,
        submissions: Arc::new(SubmissionLog::new(cfg.submission_log_path.clone())),
        contests,
        matches,
        metrics,
    });

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;
    let local = listener
        .local_addr()
        .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
    tracing::info!(
        bind = %local,
        problems = catalog.len(),
        judge_enabled = cfg.judge.enabled,
        "arena engine ready"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    Ok(())
}

fn init_tracing(cfg: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .init();
}
