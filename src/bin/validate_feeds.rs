//! Fetch every configured source once and print whether its feed is usable.
//!
//! Usage: `validate_feeds [path/to/pipeline.toml]` (defaults to the normal
//! config lookup). Exits non-zero when any source fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use newsrelay::config::PipelineConfig;
use newsrelay::ingest::types::HttpFeedSource;
use newsrelay::ingest::Fetcher;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => PipelineConfig::default_path()?,
    };
    let config = PipelineConfig::load_from(&path)?;
    let s = &config.settings;

    let feed = Arc::new(HttpFeedSource::new(&s.user_agent, s.fetch_timeout())?);
    // No cap: report how many entries each feed actually carries.
    let fetcher = Fetcher::new(feed)
        .with_concurrency(s.concurrency)
        .with_timeout(s.fetch_timeout())
        .with_max_items(usize::MAX);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcomes = fetcher.fetch_all(&config.sources, cancel_rx).await;

    let width = config.sources.iter().map(|s| s.name.len()).max().unwrap_or(6).max(6);
    println!("{:<width$}  {:<8}  {:>7}  {:>9}  detail", "source", "status", "entries", "latency");
    let mut failed = 0usize;
    for o in &outcomes {
        let latency = format!("{}ms", o.elapsed.as_millis());
        match &o.result {
            Ok(entries) => println!(
                "{:<width$}  {:<8}  {:>7}  {:>9}  {}",
                o.source.name,
                if entries.is_empty() { "EMPTY" } else { "OK" },
                entries.len(),
                latency,
                o.source.url
            ),
            Err(e) => {
                failed += 1;
                println!("{:<width$}  {:<8}  {:>7}  {:>9}  {}", o.source.name, "FAIL", "-", latency, e);
            }
        }
    }
    println!("\n{} of {} sources valid", outcomes.len() - failed, outcomes.len());

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
