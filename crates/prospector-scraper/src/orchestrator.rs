//! Scraping orchestrator for running towns across a pool of browser workers.
//!
//! `ScrapingOrchestrator` owns the run lifecycle. `start` validates the
//! request, spawns one loop per worker over a shared town queue and hands
//! back a `RunHandle`. Workers report finished towns over a channel to a
//! single completion handler, which accumulates records, tracks progress
//! and emits events. Once the queue drains, phone numbers are resolved to
//! providers and the run completes.
//!
//! Pausing closes a gate the worker loops wait on before taking the next
//! town. Stopping lets every worker finish its current batch, then skips the
//! provider lookup; towns reported after the stop count as interrupted.

use crate::control::{wait_while_paused, RunControl, RunStatus};
use crate::error::{OrchestratorError, OrchestratorResult, ScrapeError};
use crate::error_log::{ErrorContext, ErrorLogger};
use crate::events::{CompleteEvent, ErrorEvent, EventSink, ProgressEvent};
use crate::logging::{LogEntry, LoggingManager, SessionSummary};
use crate::lookup::{apply_providers, mark_unknown, ProviderLookup, ProviderLookupService};
use crate::page_scraper::{PageScraper, ScrapeTarget};
use crate::progress::ProgressState;
use crate::retry::RetryStrategy;
use crate::session::SessionRecorder;
use crate::worker::{BrowserWorker, TownScrape};
use prospector_browser::{BrowserDriver, LaunchOptions};
use prospector_core::{AppConfig, BusinessRecord, ScrapingConfig};
use prospector_db::{Database, SessionStatus};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Final result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub records: Vec<BusinessRecord>,
    pub summary: SessionSummary,
    /// The run ended through `stop()`
    pub stopped: bool,
}

/// A finished town, sent from a worker loop to the completion handler.
#[derive(Debug)]
struct TownReport {
    worker_id: usize,
    town: String,
    outcome: Result<TownScrape, ScrapeError>,
    duration: Duration,
}

/// Records of the run so far, unique by `map_url`.
#[derive(Debug, Default)]
struct Accumulator {
    records: Vec<BusinessRecord>,
    seen: HashSet<String>,
}

impl Accumulator {
    /// Add `records`, returning the ones that were new.
    fn extend(&mut self, records: Vec<BusinessRecord>) -> Vec<BusinessRecord> {
        let mut added = Vec::new();
        for record in records {
            if record.map_url.is_empty() || self.seen.insert(record.map_url.clone()) {
                added.push(record.clone());
                self.records.push(record);
            }
        }
        added
    }
}

/// Handles kept so `stop()` can reach a run in flight.
#[derive(Debug, Clone)]
struct ActiveRun {
    workers: Vec<Arc<BrowserWorker>>,
    tasks: Vec<AbortHandle>,
    finished: watch::Receiver<bool>,
    accumulator: Arc<Mutex<Accumulator>>,
    completed: Arc<AtomicBool>,
    session: Option<Arc<SessionRecorder>>,
    stop_timeout: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    progress: Mutex<Option<ProgressEvent>>,
    active: Mutex<Option<ActiveRun>>,
}

/// Everything the background run needs.
struct RunContext {
    config: ScrapingConfig,
    total_towns: usize,
    industries: Arc<Vec<String>>,
    workers: Vec<Arc<BrowserWorker>>,
    accumulator: Arc<Mutex<Accumulator>>,
    completed: Arc<AtomicBool>,
    session: Option<Arc<SessionRecorder>>,
    finished: watch::Sender<bool>,
}

/// Handle on a started run.
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<OrchestratorResult<RunOutcome>>,
    accumulator: Arc<Mutex<Accumulator>>,
    logging: Arc<LoggingManager>,
}

impl RunHandle {
    /// Wait for the run to end.
    ///
    /// A run abandoned by `stop()` yields the records accumulated before it
    /// was cut off.
    pub async fn join(self) -> OrchestratorResult<RunOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(RunOutcome {
                records: lock(&self.accumulator).records.clone(),
                summary: self.logging.summary(),
                stopped: true,
            }),
            Err(e) => Err(OrchestratorError::Internal(e.to_string())),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sends log entries to the event sink and the session log until finished.
struct LogForwarder {
    task: JoinHandle<()>,
    done: oneshot::Sender<()>,
}

impl LogForwarder {
    fn spawn(
        mut entries: broadcast::Receiver<LogEntry>,
        sink: Arc<dyn EventSink>,
        session: Option<Arc<SessionRecorder>>,
    ) -> Self {
        let (done, mut done_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = entries.recv() => match received {
                        Ok(entry) => forward_log(&entry, sink.as_ref(), session.as_deref()).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "log forwarder fell behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = &mut done_rx => {
                        while let Ok(entry) = entries.try_recv() {
                            forward_log(&entry, sink.as_ref(), session.as_deref()).await;
                        }
                        break;
                    }
                }
            }
        });
        Self { task, done }
    }

    async fn finish(self) {
        let _ = self.done.send(());
        if let Err(e) = self.task.await {
            debug!("log forwarder ended abnormally: {}", e);
        }
    }
}

async fn forward_log(entry: &LogEntry, sink: &dyn EventSink, session: Option<&SessionRecorder>) {
    sink.on_log(entry);
    if let Some(session) = session {
        session.append_log(entry).await;
    }
}

fn normalize(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.to_lowercase()))
        .collect()
}

async fn worker_loop(
    worker: Arc<BrowserWorker>,
    queue: Arc<Mutex<VecDeque<String>>>,
    industries: Arc<Vec<String>>,
    mut status: watch::Receiver<RunStatus>,
    reports: mpsc::UnboundedSender<TownReport>,
) {
    loop {
        if wait_while_paused(&mut status).await == RunStatus::Stopped {
            debug!(worker = worker.id(), "stop observed, leaving queue");
            break;
        }
        let Some(town) = lock(&queue).pop_front() else {
            break;
        };

        let started = Instant::now();
        let outcome = worker.process_town(&town, &industries).await;
        let report = TownReport {
            worker_id: worker.id(),
            town,
            outcome,
            duration: started.elapsed(),
        };
        if reports.send(report).is_err() {
            break;
        }
    }
    worker.close_browser().await;
}

/// Runs towns across browser workers and resolves providers afterwards.
#[derive(Clone)]
pub struct ScrapingOrchestrator {
    driver: Arc<dyn BrowserDriver>,
    lookup: Arc<dyn ProviderLookup>,
    sink: Arc<dyn EventSink>,
    app: Arc<AppConfig>,
    logging: Arc<LoggingManager>,
    errors: Arc<ErrorLogger>,
    store: Option<Arc<Database>>,
    control: RunControl,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ScrapingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapingOrchestrator")
            .field("status", &self.control.status())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl ScrapingOrchestrator {
    /// Create an orchestrator with default site settings and fresh logs.
    #[must_use]
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        lookup: Arc<dyn ProviderLookup>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            driver,
            lookup,
            sink,
            app: Arc::new(AppConfig::default()),
            logging: Arc::new(LoggingManager::new()),
            errors: Arc::new(ErrorLogger::new()),
            store: None,
            control: RunControl::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Use the site, classifier, browser and log settings of `config`.
    #[must_use]
    pub fn with_app_config(mut self, config: AppConfig) -> Self {
        self.logging = Arc::new(LoggingManager::with_capacity(config.logging.display_capacity));
        self.errors = Arc::new(ErrorLogger::with_capacity(config.logging.max_error_entries));
        self.app = Arc::new(config);
        self
    }

    /// Record sessions, businesses and log lines in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<Database>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_logging(mut self, logging: Arc<LoggingManager>) -> Self {
        self.logging = logging;
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Arc<ErrorLogger>) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.control.status()
    }

    /// The latest progress event of the current or last run.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressEvent> {
        lock(&self.shared.progress).clone()
    }

    #[must_use]
    pub fn logging(&self) -> &Arc<LoggingManager> {
        &self.logging
    }

    #[must_use]
    pub fn errors(&self) -> &Arc<ErrorLogger> {
        &self.errors
    }

    /// Session id of the current or last run, when a store is attached.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        lock(&self.shared.active)
            .as_ref()
            .and_then(|active| active.session.as_ref())
            .map(|session| session.session_id().to_string())
    }

    fn scraper_for(&self, config: &ScrapingConfig) -> OrchestratorResult<PageScraper> {
        PageScraper::new(
            &self.app.site,
            &self.app.classifier,
            config,
            Arc::clone(&self.errors),
        )
        .map_err(|e| {
            self.errors.log_validation_error(
                "Invalid site selectors",
                &e,
                ErrorContext::new().operation("compile_selectors"),
            );
            OrchestratorError::InvalidConfig(e.to_string())
        })
    }

    /// Start scraping `industries` in every one of `towns`.
    ///
    /// Returns once the run is spawned. Blank and repeated names are
    /// ignored.
    pub async fn start(
        &self,
        towns: Vec<String>,
        industries: Vec<String>,
        config: ScrapingConfig,
    ) -> OrchestratorResult<RunHandle> {
        config.validate()?;
        let towns = normalize(towns);
        let industries = normalize(industries);
        if towns.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "at least one town is required".to_string(),
            ));
        }
        if industries.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "at least one industry is required".to_string(),
            ));
        }
        let scraper = Arc::new(self.scraper_for(&config)?);

        if !self.control.begin() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        self.logging.clear();
        *lock(&self.shared.progress) = None;

        // Published before the first await so a stop during setup waits on it
        let accumulator = Arc::new(Mutex::new(Accumulator::default()));
        let completed = Arc::new(AtomicBool::new(false));
        let (finished_tx, finished_rx) = watch::channel(false);
        *lock(&self.shared.active) = Some(ActiveRun {
            workers: Vec::new(),
            tasks: Vec::new(),
            finished: finished_rx,
            accumulator: Arc::clone(&accumulator),
            completed: Arc::clone(&completed),
            session: None,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        });

        let session = match &self.store {
            Some(db) => SessionRecorder::create(
                Arc::clone(db),
                &towns,
                &industries,
                &config,
                Arc::clone(&self.errors),
            )
            .await
            .map(Arc::new),
            None => None,
        };
        let forwarder = LogForwarder::spawn(
            self.logging.subscribe(),
            Arc::clone(&self.sink),
            session.clone(),
        );

        let pool_size = config.simultaneous_towns.min(towns.len());
        self.logging.log_message(&format!(
            "Starting run: {} towns x {} industries with {} workers",
            towns.len(),
            industries.len(),
            pool_size
        ));
        info!(
            towns = towns.len(),
            industries = industries.len(),
            workers = pool_size,
            "run started"
        );

        let launch_options = LaunchOptions::from_config(&self.app.browser, config.browser_headless);
        let retry = RetryStrategy::from_config(&config);
        let workers: Vec<Arc<BrowserWorker>> = (0..pool_size)
            .map(|id| {
                Arc::new(
                    BrowserWorker::new(
                        id,
                        Arc::clone(&self.driver),
                        launch_options.clone(),
                        Arc::clone(&scraper),
                        retry,
                        config.simultaneous_industries,
                        Arc::clone(&self.logging),
                        Arc::clone(&self.errors),
                    )
                    .with_stop_signal(self.control.subscribe()),
                )
            })
            .collect();

        let total_towns = towns.len();
        let queue = Arc::new(Mutex::new(towns.into_iter().collect::<VecDeque<_>>()));
        let industries = Arc::new(industries);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let worker_tasks: Vec<JoinHandle<()>> = workers
            .iter()
            .map(|worker| {
                tokio::spawn(worker_loop(
                    Arc::clone(worker),
                    Arc::clone(&queue),
                    Arc::clone(&industries),
                    self.control.subscribe(),
                    report_tx.clone(),
                ))
            })
            .collect();
        drop(report_tx);

        let mut tasks: Vec<AbortHandle> = worker_tasks.iter().map(JoinHandle::abort_handle).collect();
        tasks.push(forwarder.task.abort_handle());

        let context = RunContext {
            config: config.clone(),
            total_towns,
            industries,
            workers: workers.clone(),
            accumulator: Arc::clone(&accumulator),
            completed,
            session: session.clone(),
            finished: finished_tx,
        };
        let task = tokio::spawn(self.clone().drive(context, report_rx, worker_tasks, forwarder));
        tasks.push(task.abort_handle());

        if let Some(active) = lock(&self.shared.active).as_mut() {
            active.workers = workers;
            active.tasks = tasks;
            active.session = session;
        }

        Ok(RunHandle {
            task,
            accumulator,
            logging: Arc::clone(&self.logging),
        })
    }

    /// `start` and wait for the outcome.
    pub async fn run(
        &self,
        towns: Vec<String>,
        industries: Vec<String>,
        config: ScrapingConfig,
    ) -> OrchestratorResult<RunOutcome> {
        self.start(towns, industries, config).await?.join().await
    }

    async fn drive(
        self,
        run: RunContext,
        mut reports: mpsc::UnboundedReceiver<TownReport>,
        worker_tasks: Vec<JoinHandle<()>>,
        forwarder: LogForwarder,
    ) -> OrchestratorResult<RunOutcome> {
        let mut progress = ProgressState::new(run.total_towns, run.industries.len());
        while let Some(report) = reports.recv().await {
            self.handle_report(&run, &mut progress, report).await;
        }

        let mut fatal = None;
        for (worker_id, task) in worker_tasks.into_iter().enumerate() {
            if let Err(e) = task.await {
                if e.is_panic() && fatal.is_none() {
                    fatal = Some(OrchestratorError::WorkerFailed {
                        worker_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if let Some(error) = fatal {
            return Err(self.fail_run(&run, forwarder, error).await);
        }

        let stopped = self.control.status() == RunStatus::Stopped;
        let mut records = lock(&run.accumulator).records.clone();
        if stopped {
            self.logging.log_warning(&format!(
                "Run stopped with {} businesses, provider lookup skipped",
                records.len()
            ));
        } else {
            self.enrich(&run.config, &mut records).await;
            lock(&run.accumulator).records.clone_from(&records);
        }

        if let Some(session) = &run.session {
            session.store_providers(&records).await;
            let status = if stopped {
                SessionStatus::Stopped
            } else {
                SessionStatus::Completed
            };
            session.set_status(status, None).await;
        }

        self.logging.log_success(&format!(
            "Run finished: {} businesses from {} of {} towns",
            records.len(),
            progress.completed_towns,
            run.total_towns
        ));
        let summary = self.logging.summary();
        self.control.finish();
        forwarder.finish().await;

        let outcome = RunOutcome {
            records,
            summary,
            stopped,
        };
        self.emit_complete(&run.completed, &outcome);
        let _ = run.finished.send(true);
        info!(
            records = outcome.records.len(),
            stopped, "run complete"
        );
        Ok(outcome)
    }

    async fn handle_report(&self, run: &RunContext, progress: &mut ProgressState, report: TownReport) {
        let TownReport {
            worker_id,
            town,
            outcome,
            duration,
        } = report;

        let stopped = self.control.status() == RunStatus::Stopped;
        if stopped || matches!(&outcome, Ok(scrape) if scrape.interrupted) {
            self.logging.log_town_interrupted(&town);
            return;
        }

        match outcome {
            Ok(scrape) => {
                let added = lock(&run.accumulator).extend(scrape.records);
                if !scrape.failed_industries.is_empty() {
                    self.logging.log_warning(&format!(
                        "{town}: {} of {} industries failed",
                        scrape.failed_industries.len(),
                        scrape.industries_processed
                    ));
                }
                self.logging.log_town_complete(&town, added.len(), duration);
                if let Some(session) = &run.session {
                    session.store_businesses(&added).await;
                }
                let total = lock(&run.accumulator).records.len();
                progress.record_town(duration, scrape.industries_processed, total);
            }
            Err(e) => {
                self.logging
                    .log_town_failed(&town, &e.to_string(), duration);
                self.errors.log_browser_error(
                    "Town failed",
                    &e,
                    ErrorContext::new()
                        .town(&town)
                        .worker(worker_id)
                        .operation("process_town"),
                );
                let total = lock(&run.accumulator).records.len();
                progress.record_town(duration, run.industries.len(), total);
            }
        }

        let event = progress.snapshot(self.control.status());
        *lock(&self.shared.progress) = Some(event.clone());
        self.sink.on_progress(&event);
        if let Some(session) = &run.session {
            session
                .record_progress(event.percentage, event.records_scraped)
                .await;
        }
    }

    async fn enrich(&self, config: &ScrapingConfig, records: &mut [BusinessRecord]) {
        let phones: Vec<String> = records
            .iter()
            .filter(|r| r.has_phone())
            .map(|r| r.phone.clone())
            .collect();
        if phones.is_empty() {
            self.logging.log_message("No phone numbers to look up");
            return;
        }

        self.logging.log_message(&format!(
            "Looking up providers for {} phone numbers",
            phones.len()
        ));
        let service = ProviderLookupService::new(
            Arc::clone(&self.lookup),
            config.simultaneous_lookups,
            config.lookup_batch_size,
            Arc::clone(&self.errors),
        );

        match service.lookup_many(&phones).await {
            Ok(providers) => {
                apply_providers(records, &providers);
                self.logging.log_success(&format!(
                    "Resolved providers for {} numbers",
                    providers.len()
                ));
            }
            Err(e) => {
                self.errors.log_lookup_error(
                    "Provider lookup failed, providers set to Unknown",
                    &e,
                    ErrorContext::new().operation("lookup_providers"),
                );
                self.logging
                    .log_warning(&format!("Provider lookup failed: {e}"));
                mark_unknown(records);
            }
        }
        service.close().await;
    }

    async fn fail_run(
        &self,
        run: &RunContext,
        forwarder: LogForwarder,
        error: OrchestratorError,
    ) -> OrchestratorError {
        self.errors.log_critical(
            "Run aborted",
            &error,
            ErrorContext::new().operation("run"),
        );
        self.logging.log_error("run", None, &error.to_string());

        for worker in &run.workers {
            worker.close_browser().await;
        }
        if let Some(session) = &run.session {
            session
                .set_status(SessionStatus::Failed, Some(&error.to_string()))
                .await;
        }

        self.control.reset();
        forwarder.finish().await;
        run.completed.store(true, Ordering::SeqCst);
        self.sink.on_error(&ErrorEvent {
            message: error.to_string(),
        });
        let _ = run.finished.send(true);
        error
    }

    fn emit_complete(&self, completed: &AtomicBool, outcome: &RunOutcome) {
        if !completed.swap(true, Ordering::SeqCst) {
            self.sink.on_complete(&CompleteEvent {
                records: outcome.records.clone(),
                summary: outcome.summary.clone(),
                stopped: outcome.stopped,
            });
        }
    }

    fn active_session(&self) -> Option<Arc<SessionRecorder>> {
        lock(&self.shared.active)
            .as_ref()
            .and_then(|active| active.session.clone())
    }

    /// Hold workers before their next town. False unless running.
    pub async fn pause(&self) -> bool {
        if !self.control.pause() {
            return false;
        }
        self.logging.log_warning("Run paused");
        if let Some(session) = self.active_session() {
            session.set_status(SessionStatus::Paused, None).await;
        }
        true
    }

    /// Release paused workers. False unless paused.
    pub async fn resume(&self) -> bool {
        if !self.control.resume() {
            return false;
        }
        self.logging.log_message("Run resumed");
        if let Some(session) = self.active_session() {
            session.set_status(SessionStatus::Running, None).await;
        }
        true
    }

    /// Stop the run and release its browsers.
    ///
    /// Waits up to `stop_timeout_secs` for in-flight towns; after that the
    /// remaining tasks are aborted and the records gathered so far are
    /// reported as the outcome. False unless running or paused.
    pub async fn stop(&self) -> bool {
        if !self.control.stop() {
            return false;
        }
        self.logging
            .log_warning("Stop requested, finishing towns in progress");

        let Some((mut finished, stop_timeout)) = lock(&self.shared.active)
            .as_ref()
            .map(|active| (active.finished.clone(), active.stop_timeout))
        else {
            return true;
        };
        let settled = matches!(
            tokio::time::timeout(stop_timeout, finished.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        // `start` may still have been spawning workers when the stop landed
        let Some(active) = lock(&self.shared.active).clone() else {
            return true;
        };

        if !settled {
            warn!(
                timeout_secs = stop_timeout.as_secs(),
                "run did not settle after stop, aborting"
            );
            for task in &active.tasks {
                task.abort();
            }
            self.logging.log_warning(&format!(
                "Towns still running after {}s were abandoned",
                stop_timeout.as_secs()
            ));
            let outcome = RunOutcome {
                records: lock(&active.accumulator).records.clone(),
                summary: self.logging.summary(),
                stopped: true,
            };
            if let Some(session) = &active.session {
                session.set_status(SessionStatus::Stopped, None).await;
            }
            self.emit_complete(&active.completed, &outcome);
        }

        for worker in &active.workers {
            worker.close_browser().await;
        }
        if let Err(e) = self.lookup.close().await {
            warn!("closing provider lookup failed: {}", e);
        }
        true
    }

    /// Look up a single business by name or phrase with a dedicated browser.
    pub async fn lookup_business(
        &self,
        query: &str,
        config: &ScrapingConfig,
    ) -> OrchestratorResult<Vec<BusinessRecord>> {
        config.validate()?;
        if query.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "lookup query is empty".to_string(),
            ));
        }
        let scraper = self.scraper_for(config)?;
        let launch_options = LaunchOptions::from_config(&self.app.browser, config.browser_headless);

        let mut browser = self.driver.launch(&launch_options).await.map_err(|e| {
            self.errors.log_browser_error(
                "Browser launch failed",
                &e,
                ErrorContext::new().operation("lookup_business"),
            );
            e
        })?;

        let target = ScrapeTarget::lookup(query);
        let (browser_ref, scraper_ref, target_ref) = (&browser, &scraper, &target);
        let result = RetryStrategy::from_config(config)
            .execute(move || async move {
                let page = browser_ref.new_page().await?;
                let found = scraper_ref.scrape(page.as_ref(), target_ref).await;
                if let Err(e) = page.close().await {
                    debug!("closing lookup page failed: {}", e);
                }
                found
            })
            .await;

        if let Err(e) = browser.close().await {
            warn!("closing lookup browser failed: {}", e);
        }

        match result {
            Ok(records) => {
                self.logging.log_message(&format!(
                    "Lookup \"{}\" found {} businesses",
                    query.trim(),
                    records.len()
                ));
                Ok(records)
            }
            Err(e) => {
                self.errors.log_extraction_error(
                    "Business lookup failed",
                    &e,
                    ErrorContext::new()
                        .operation("lookup_business")
                        .with("query", query.trim()),
                );
                Err(e.into())
            }
        }
    }
}
