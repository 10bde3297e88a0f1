//! Prospector command line shell.
//!
//! Wires the chromium driver, the browser provider lookup and the optional
//! session store into a `ScrapingOrchestrator`, runs it and writes the
//! records as JSON. Ctrl-C stops the run and keeps what was scraped.

mod args;

use anyhow::Context;
use args::Cli;
use clap::Parser;
use prospector_browser::{ChromiumDriver, LaunchOptions};
use prospector_core::{AppConfig, BusinessRecord};
use prospector_db::Database;
use prospector_scraper::{BrowserProviderLookup, ScrapingOrchestrator, TracingEventSink};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,prospector=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn open_store(config: &AppConfig) -> Option<Arc<Database>> {
    if config.storage.disabled {
        return None;
    }
    let path = match config.database_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("No session database path, sessions will not be recorded: {}", e);
            return None;
        }
    };
    match Database::open(&path).await {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            warn!("Could not open {}, sessions will not be recorded: {}", path.display(), e);
            None
        }
    }
}

fn write_records(records: &[BusinessRecord], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing records to {}", path.display()))?;
            info!("Wrote {} records to {}", records.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    info!("Starting Prospector v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.app_config().context("loading configuration")?;
    let driver = Arc::new(ChromiumDriver::new());
    let lookup = Arc::new(BrowserProviderLookup::new(
        driver.clone(),
        LaunchOptions::from_config(&config.browser, config.scraping.browser_headless),
        config.lookup.clone(),
    ));
    let store = open_store(&config).await;

    let mut orchestrator =
        ScrapingOrchestrator::new(driver, lookup, Arc::new(TracingEventSink))
            .with_app_config(config.clone());
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(store);
    }

    if let Some(query) = &cli.lookup {
        let records = orchestrator
            .lookup_business(query, &config.scraping)
            .await
            .with_context(|| format!("looking up \"{query}\""))?;
        return write_records(&records, cli.output.as_deref());
    }

    let handle = orchestrator
        .start(cli.towns.clone(), cli.industries.clone(), config.scraping.clone())
        .await
        .context("starting run")?;

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the towns in progress");
                orchestrator.stop().await;
            }
        })
    };

    let outcome = handle.join().await.context("scraping run failed")?;
    interrupt.abort();

    if let Some(session_id) = orchestrator.session_id() {
        info!(%session_id, "session recorded");
    }
    info!(
        records = outcome.records.len(),
        towns = outcome.summary.completed_towns,
        errors = outcome.summary.total_errors,
        stopped = outcome.stopped,
        "run finished"
    );
    write_records(&outcome.records, cli.output.as_deref())
}
