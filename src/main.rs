//! newsrelay service entrypoint.
//! Loads the pipeline config, runs fetch cycles on an interval and serves the
//! monitoring surface (`/metrics`, `/health`, `/health/sources`).

use std::sync::Arc;

use newsrelay::config::{HotReloadConfig, PipelineConfig};
use newsrelay::metrics::Metrics;
use newsrelay::pipeline::{Orchestrator, PipelineContext};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `NEWSRELAY_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsrelay=info,warn"));
    let json = std::env::var("NEWSRELAY_LOG_JSON").is_ok_and(|v| v == "1");

    // The runtime may already have installed a subscriber; keep it if so.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

async fn cycle_loop(orchestrator: Arc<Orchestrator>, config: Arc<HotReloadConfig>) {
    loop {
        let current = config.current();
        match orchestrator.run_cycle(&current).await {
            Ok(report) if report.cancelled => break,
            Ok(report) => tracing::info!(
                delivered = report.total_delivered(),
                new = report.items_new,
                dropped = report.moderation_events.len(),
                errors = report.errors.len(),
                elapsed_ms = report.duration.as_millis() as u64,
                "cycle complete"
            ),
            Err(newsrelay::error::PipelineError::Cancelled) => break,
            Err(e) => tracing::warn!(error = %e, "cycle not run"),
        }

        tokio::select! {
            _ = tokio::time::sleep(current.settings.fetch_interval()) => {}
            _ = orchestrator.stopped() => break,
        }
    }
    tracing::info!("cycle loop stopped");
}

async fn digest_loop(orchestrator: Arc<Orchestrator>, config: Arc<HotReloadConfig>) {
    loop {
        let interval = config.current().settings.digest_interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = orchestrator.stopped() => break,
        }
        let current = config.current();
        let Some(dest) = current.settings.digest_destination.as_deref() else {
            continue;
        };
        let end = chrono::Utc::now();
        let start = end - chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(1));
        match orchestrator.send_digest(&current, dest, start, end).await {
            Ok(rep) => tracing::info!(destination = dest, sent = rep.messages_sent, failed = rep.messages_failed, "digest sent"),
            Err(e) => tracing::warn!(destination = dest, error = %e, "digest not sent"),
        }
    }
}

/// Ctrl-C cancels in-flight work, including a cycle that is mid-delivery.
async fn shutdown_on_ctrl_c(orchestrator: Arc<Orchestrator>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => orchestrator.shutdown(),
        Err(e) => tracing::warn!(error = %e, "ctrl-c handler unavailable"),
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = PipelineConfig::default_path()?;
    let config = Arc::new(HotReloadConfig::open(path)?);
    let initial = config.current();

    let ctx = PipelineContext::from_config(&initial)?;
    let health = ctx.health.clone();
    let orchestrator = Arc::new(Orchestrator::new(ctx).with_send_delay(initial.settings.send_delay()));

    let metrics = Metrics::init()?;
    tracing::info!(
        sources = initial.sources.len(),
        rules = initial.rules.len(),
        interval_s = initial.settings.fetch_interval().as_secs(),
        "newsrelay starting"
    );
    tokio::spawn(shutdown_on_ctrl_c(orchestrator.clone()));
    tokio::spawn(digest_loop(orchestrator.clone(), config.clone()));
    tokio::spawn(cycle_loop(orchestrator, config));

    Ok(metrics.router(health).into())
}
