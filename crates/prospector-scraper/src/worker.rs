//! One browser, one town at a time.
//!
//! A `BrowserWorker` owns a single browser instance and scrapes every
//! industry of a town with it, a bounded number of industries at once.
//! Each industry gets a fresh page and its own retry budget; an industry
//! that still fails is logged and skipped while the rest of the town
//! carries on.

use crate::control::RunStatus;
use crate::error::{Result, ScrapeError};
use crate::error_log::{ErrorContext, ErrorLogger};
use crate::logging::LoggingManager;
use crate::page_scraper::{PageScraper, ScrapeTarget};
use crate::retry::RetryStrategy;
use futures::future::join_all;
use prospector_browser::{BrowserDriver, BrowserError, BrowserHandle, LaunchOptions};
use prospector_core::BusinessRecord;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

/// What a worker brought back from one town.
#[derive(Debug, Clone)]
pub struct TownScrape {
    pub town: String,
    /// Unique by `map_url`, in extraction order
    pub records: Vec<BusinessRecord>,
    pub failed_industries: Vec<String>,
    /// Industries that ran, successfully or not
    pub industries_processed: usize,
    /// The stop signal cut the town short
    pub interrupted: bool,
    pub duration: Duration,
}

pub struct BrowserWorker {
    id: usize,
    driver: Arc<dyn BrowserDriver>,
    launch_options: LaunchOptions,
    scraper: Arc<PageScraper>,
    retry: RetryStrategy,
    simultaneous_industries: usize,
    logging: Arc<LoggingManager>,
    errors: Arc<ErrorLogger>,
    browser: RwLock<Option<Box<dyn BrowserHandle>>>,
    status: Option<watch::Receiver<RunStatus>>,
}

impl std::fmt::Debug for BrowserWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserWorker")
            .field("id", &self.id)
            .field("simultaneous_industries", &self.simultaneous_industries)
            .finish_non_exhaustive()
    }
}

impl BrowserWorker {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: usize,
        driver: Arc<dyn BrowserDriver>,
        launch_options: LaunchOptions,
        scraper: Arc<PageScraper>,
        retry: RetryStrategy,
        simultaneous_industries: usize,
        logging: Arc<LoggingManager>,
        errors: Arc<ErrorLogger>,
    ) -> Self {
        Self {
            id,
            driver,
            launch_options,
            scraper,
            retry,
            simultaneous_industries: simultaneous_industries.max(1),
            logging,
            errors,
            browser: RwLock::new(None),
            status: None,
        }
    }

    /// Observe the run status; a `Stopped` value ends the town between batches.
    #[must_use]
    pub fn with_stop_signal(mut self, status: watch::Receiver<RunStatus>) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    fn stop_requested(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|rx| *rx.borrow() == RunStatus::Stopped)
    }

    /// Whether a browser is currently held.
    pub async fn has_browser(&self) -> bool {
        self.browser.read().await.is_some()
    }

    async fn ensure_browser(&self) -> Result<()> {
        let mut slot = self.browser.write().await;
        if slot.is_none() {
            *slot = Some(self.driver.launch(&self.launch_options).await?);
            debug!(worker = self.id, "browser launched");
        }
        Ok(())
    }

    /// Close the browser if one is open. Safe to call at any time.
    pub async fn close_browser(&self) {
        let browser = self.browser.write().await.take();
        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                warn!(worker = self.id, "closing browser failed: {}", e);
            }
            debug!(worker = self.id, "browser closed");
        }
    }

    /// Scrape every industry of `town`.
    ///
    /// Fails only when the browser cannot be launched; failed industries are
    /// listed in the result instead.
    pub async fn process_town(&self, town: &str, industries: &[String]) -> Result<TownScrape> {
        let started = Instant::now();
        self.logging.log_town_start(town);

        if let Err(e) = self.ensure_browser().await {
            self.errors.log_browser_error(
                "Browser launch failed",
                &e,
                ErrorContext::new()
                    .town(town)
                    .worker(self.id)
                    .operation("launch_browser"),
            );
            return Err(e);
        }

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut failed_industries = Vec::new();
        let mut industries_processed = 0;
        let mut interrupted = false;

        for batch in industries.chunks(self.simultaneous_industries) {
            if self.stop_requested() {
                interrupted = true;
                break;
            }

            let outcomes = join_all(batch.iter().map(|industry| self.scrape_industry(town, industry))).await;

            for (industry, outcome) in batch.iter().zip(outcomes) {
                industries_processed += 1;
                match outcome {
                    Ok(found) => {
                        self.logging.log_industry_progress(
                            town,
                            industry,
                            &format!("completed ({})", found.len()),
                        );
                        for record in found {
                            if record.map_url.is_empty() || seen.insert(record.map_url.clone()) {
                                records.push(record);
                            }
                        }
                    }
                    Err(e) => {
                        self.report_industry_failure(town, industry, &e);
                        failed_industries.push(industry.clone());
                    }
                }
            }
        }

        self.close_browser().await;

        debug!(
            worker = self.id,
            town,
            records = records.len(),
            failed = failed_industries.len(),
            interrupted,
            "town processed"
        );

        Ok(TownScrape {
            town: town.to_string(),
            records,
            failed_industries,
            industries_processed,
            interrupted,
            duration: started.elapsed(),
        })
    }

    fn report_industry_failure(&self, town: &str, industry: &str, error: &ScrapeError) {
        self.logging.log_industry_progress(town, industry, "failed");
        self.logging.log_error(town, Some(industry), &error.to_string());

        let context = ErrorContext::new()
            .town(town)
            .industry(industry)
            .worker(self.id)
            .operation("scrape_industry");
        match error {
            ScrapeError::Navigation { .. } | ScrapeError::Browser(_) => {
                self.errors
                    .log_browser_error("Industry scrape failed", error, context);
            }
            _ => {
                self.errors
                    .log_extraction_error("Industry scrape failed", error, context);
            }
        }
    }

    async fn scrape_industry(&self, town: &str, industry: &str) -> Result<Vec<BusinessRecord>> {
        let target = ScrapeTarget::industry(town, industry);
        let target = &target;
        self.retry
            .execute_with(move |attempt| async move {
                if attempt > 1 {
                    debug!(worker = self.id, town, industry, attempt, "retrying industry");
                }
                self.scrape_on_fresh_page(target).await
            })
            .await
    }

    async fn scrape_on_fresh_page(&self, target: &ScrapeTarget) -> Result<Vec<BusinessRecord>> {
        let page = {
            let slot = self.browser.read().await;
            let browser = slot.as_ref().ok_or(BrowserError::NotRunning)?;
            browser.new_page().await?
        };

        let result = self.scraper.scrape(page.as_ref(), target).await;

        if let Err(e) = page.close().await {
            debug!(worker = self.id, "closing page failed: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_browser::{ReplayDriver, ReplayStats};
    use prospector_core::{ClassifierConfig, ScrapingConfig, SiteConfig};

    fn card(name: &str, href: &str) -> String {
        format!(
            r#"<div role="article"><a href="{href}"></a><div class="card-name">{name}</div><span>Plumber</span><span>12 Main Road</span></div>"#
        )
    }

    fn feed(cards: &[String]) -> String {
        format!(
            r#"<html><body><div role="feed">{}</div><p class="end-of-list">end</p></body></html>"#,
            cards.concat()
        )
    }

    fn worker(driver: ReplayDriver) -> (BrowserWorker, Arc<ReplayStats>, Arc<LoggingManager>, Arc<ErrorLogger>) {
        let stats = driver.stats();
        let errors = Arc::new(ErrorLogger::new());
        let logging = Arc::new(LoggingManager::new());
        let scraping = ScrapingConfig {
            retry_attempts: 2,
            retry_delay_ms: 10,
            navigation_timeout_ms: 500,
            scroll_wait_ms: 10,
            ..ScrapingConfig::default()
        };
        let scraper = PageScraper::new(
            &SiteConfig::default(),
            &ClassifierConfig::default(),
            &scraping,
            Arc::clone(&errors),
        )
        .unwrap();
        let worker = BrowserWorker::new(
            0,
            Arc::new(driver),
            LaunchOptions::default(),
            Arc::new(scraper),
            RetryStrategy::from_config(&scraping),
            2,
            Arc::clone(&logging),
            Arc::clone(&errors),
        );
        (worker, stats, logging, errors)
    }

    fn industries(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_town_dedups_across_industries() {
        let driver = ReplayDriver::new()
            .route(
                "plumbers in Springs",
                vec![feed(&[card("Acme Plumbing", "/maps/place/acme"), card("Bob's Pipes", "/maps/place/bob")])],
            )
            .route(
                "electricians in Springs",
                vec![feed(&[card("Acme Plumbing", "/maps/place/acme"), card("Sparky", "/maps/place/sparky")])],
            );
        let (worker, stats, logging, errors) = worker(driver);

        let scrape = worker
            .process_town("Springs", &industries(&["plumbers", "electricians"]))
            .await
            .unwrap();

        let names: Vec<_> = scrape.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Plumbing", "Bob's Pipes", "Sparky"]);
        assert_eq!(scrape.industries_processed, 2);
        assert!(scrape.failed_industries.is_empty());
        assert!(!scrape.interrupted);
        assert!(errors.is_empty());

        assert_eq!(stats.open_pages(), 0);
        assert_eq!(stats.open_browsers(), 0);
        assert!(!worker.has_browser().await);

        let town = logging.town_log("Springs").unwrap();
        assert_eq!(town.industries["plumbers"], "completed (2)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_industry_is_isolated() {
        let driver = ReplayDriver::new()
            .route("plumbers in Benoni", vec![feed(&[card("Acme", "/maps/place/acme")])])
            .route("bakeries in Benoni", vec![feed(&[])])
            .fail_navigation("bakeries in Benoni", 5);
        let (worker, stats, logging, errors) = worker(driver);

        let scrape = worker
            .process_town("Benoni", &industries(&["plumbers", "bakeries"]))
            .await
            .unwrap();

        assert_eq!(scrape.records.len(), 1);
        assert_eq!(scrape.failed_industries, vec!["bakeries".to_string()]);
        // one plumbers navigation, two bakeries attempts
        assert_eq!(stats.navigations(), 3);
        assert_eq!(stats.open_pages(), 0);

        let logged = errors.by_context("industry", "bakeries");
        assert_eq!(logged.len(), 1);
        assert_eq!(logging.town_log("Benoni").unwrap().errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_transient_failure() {
        let driver = ReplayDriver::new()
            .route("plumbers in Brakpan", vec![feed(&[card("Acme", "/maps/place/acme")])])
            .fail_navigation("plumbers in Brakpan", 1);
        let (worker, _, _, errors) = worker(driver);

        let scrape = worker
            .process_town("Brakpan", &industries(&["plumbers"]))
            .await
            .unwrap();
        assert_eq!(scrape.records.len(), 1);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_slot_empty() {
        let driver = ReplayDriver::new().fail_launches(1);
        let (worker, stats, _, errors) = worker(driver);

        let result = worker
            .process_town("Springs", &industries(&["plumbers"]))
            .await;
        assert!(matches!(result, Err(ScrapeError::Browser(BrowserError::LaunchFailed(_)))));
        assert!(!worker.has_browser().await);
        assert_eq!(stats.launches(), 0);
        assert_eq!(errors.by_context("operation", "launch_browser").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_interrupts_between_batches() {
        let driver = ReplayDriver::new()
            .route("in Springs", vec![feed(&[card("Acme", "/maps/place/acme")])]);
        let (worker, _, _, _) = worker(driver);
        let (tx, rx) = watch::channel(RunStatus::Stopped);
        let worker = worker.with_stop_signal(rx);

        let scrape = worker
            .process_town("Springs", &industries(&["a", "b", "c"]))
            .await
            .unwrap();
        assert!(scrape.interrupted);
        assert_eq!(scrape.industries_processed, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_close_browser_is_idempotent() {
        let (worker, _, _, _) = worker(ReplayDriver::new());
        worker.close_browser().await;
        worker.close_browser().await;
        assert!(!worker.has_browser().await);
    }
}
