//! Phone number to telecom provider resolution.
//!
//! `ProviderLookupService` fans a set of phone numbers out over a
//! `ProviderLookup` backend: numbers are split into fixed batches, a
//! bounded number of batches run at once and each batch resolves its
//! numbers one after another. A number that fails is left out of the
//! result; only a backend that cannot serve anything fails the call.

use crate::error::{LookupError, LookupResult};
use crate::error_log::{mask_phone, ErrorContext, ErrorLogger};
use crate::url_builder::build_lookup_url;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use prospector_browser::{BrowserDriver, BrowserHandle, LaunchOptions, PageHandle};
use prospector_core::{BusinessRecord, LookupConfig, UNKNOWN_PROVIDER};
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A source of provider names.
#[async_trait]
pub trait ProviderLookup: Send + Sync {
    /// Acquire whatever the backend needs before the first lookup.
    async fn prepare(&self) -> LookupResult<()> {
        Ok(())
    }

    /// Provider serving `phone`.
    async fn lookup(&self, phone: &str) -> LookupResult<String>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self) -> LookupResult<()> {
        Ok(())
    }
}

pub struct ProviderLookupService {
    backend: Arc<dyn ProviderLookup>,
    max_concurrent_batches: usize,
    batch_size: usize,
    errors: Arc<ErrorLogger>,
}

impl std::fmt::Debug for ProviderLookupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLookupService")
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

enum KeyOutcome {
    Resolved(String, String),
    Failed { unavailable: bool },
}

impl ProviderLookupService {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ProviderLookup>,
        max_concurrent_batches: usize,
        batch_size: usize,
        errors: Arc<ErrorLogger>,
    ) -> Self {
        Self {
            backend,
            max_concurrent_batches: max_concurrent_batches.max(1),
            batch_size: batch_size.max(1),
            errors,
        }
    }

    /// Resolve every distinct non-empty phone number in `phones`.
    ///
    /// Numbers whose lookup failed are absent from the map. Errors only when
    /// the backend cannot be prepared or every lookup reported it unavailable.
    pub async fn lookup_many<I, S>(&self, phones: I) -> LookupResult<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<String> = phones
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();

        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        if let Err(e) = self.backend.prepare().await {
            self.errors.log_lookup_error(
                "Provider lookup backend could not be prepared",
                &e,
                ErrorContext::new().operation("prepare_lookup"),
            );
            return Err(e);
        }

        info!(
            numbers = keys.len(),
            batch_size = self.batch_size,
            "resolving providers"
        );

        let batches: Vec<_> = keys
            .chunks(self.batch_size)
            .map(|batch| self.run_batch(batch))
            .collect();
        let outcomes: Vec<KeyOutcome> = stream::iter(batches)
            .buffer_unordered(self.max_concurrent_batches)
            .flat_map(stream::iter)
            .collect()
            .await;

        let mut providers = HashMap::new();
        let mut unavailable = 0;
        for outcome in outcomes {
            match outcome {
                KeyOutcome::Resolved(phone, provider) => {
                    providers.insert(phone, provider);
                }
                KeyOutcome::Failed { unavailable: true } => unavailable += 1,
                KeyOutcome::Failed { unavailable: false } => {}
            }
        }

        if unavailable == keys.len() {
            return Err(LookupError::Unavailable(format!(
                "all {unavailable} lookups failed"
            )));
        }

        debug!(
            resolved = providers.len(),
            failed = keys.len() - providers.len(),
            "provider lookup finished"
        );
        Ok(providers)
    }

    async fn run_batch(&self, batch: &[String]) -> Vec<KeyOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for phone in batch {
            let outcome = match self.backend.lookup(phone).await {
                Ok(provider) => KeyOutcome::Resolved(phone.clone(), provider),
                Err(e) => {
                    let unavailable = matches!(e, LookupError::Unavailable(_));
                    self.errors.log_lookup_error(
                        &format!("Provider lookup failed for {}", mask_phone(phone)),
                        &e,
                        ErrorContext::new()
                            .operation("lookup_provider")
                            .with("phone", mask_phone(phone)),
                    );
                    KeyOutcome::Failed { unavailable }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            warn!("closing provider lookup failed: {}", e);
        }
    }
}

/// Set `provider` on every record that has a phone number.
///
/// Numbers missing from `providers` get `"Unknown"`; records without a
/// phone are left as they are.
pub fn apply_providers(records: &mut [BusinessRecord], providers: &HashMap<String, String>) {
    for record in records.iter_mut().filter(|r| r.has_phone()) {
        let provider = providers
            .get(record.phone.trim())
            .map_or(UNKNOWN_PROVIDER, String::as_str);
        record.provider = Some(provider.to_string());
    }
}

/// Mark every phone-bearing record `"Unknown"`.
pub fn mark_unknown(records: &mut [BusinessRecord]) {
    apply_providers(records, &HashMap::new());
}

/// `ProviderLookup` that reads a lookup web page in its own browser.
pub struct BrowserProviderLookup {
    driver: Arc<dyn BrowserDriver>,
    launch_options: LaunchOptions,
    config: LookupConfig,
    browser: Mutex<Option<Box<dyn BrowserHandle>>>,
}

impl std::fmt::Debug for BrowserProviderLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserProviderLookup")
            .field("url_template", &self.config.url_template)
            .finish_non_exhaustive()
    }
}

impl BrowserProviderLookup {
    #[must_use]
    pub fn new(driver: Arc<dyn BrowserDriver>, launch_options: LaunchOptions, config: LookupConfig) -> Self {
        Self {
            driver,
            launch_options,
            config,
            browser: Mutex::new(None),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }
}

#[async_trait]
impl ProviderLookup for BrowserProviderLookup {
    async fn prepare(&self) -> LookupResult<()> {
        let mut slot = self.browser.lock().await;
        if slot.is_none() {
            let browser = self
                .driver
                .launch(&self.launch_options)
                .await
                .map_err(|e| LookupError::Unavailable(e.to_string()))?;
            *slot = Some(browser);
        }
        Ok(())
    }

    async fn lookup(&self, phone: &str) -> LookupResult<String> {
        let page = {
            let slot = self.browser.lock().await;
            let browser = slot
                .as_ref()
                .ok_or_else(|| LookupError::Unavailable("lookup browser not running".to_string()))?;
            browser.new_page().await?
        };

        let result = read_provider(page.as_ref(), &self.config, phone, self.timeout()).await;
        if let Err(e) = page.close().await {
            debug!("closing lookup page failed: {}", e);
        }
        result
    }

    async fn close(&self) -> LookupResult<()> {
        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            browser.close().await?;
        }
        Ok(())
    }
}

async fn read_provider(
    page: &dyn PageHandle,
    config: &LookupConfig,
    phone: &str,
    timeout: Duration,
) -> LookupResult<String> {
    let url = build_lookup_url(&config.url_template, phone);
    page.goto(&url, timeout)
        .await
        .map_err(|e| LookupError::Unavailable(e.to_string()))?;

    if page
        .wait_for_selector(&config.result_selector, timeout)
        .await
        .is_err()
    {
        return Err(LookupError::NotFound(mask_phone(phone)));
    }

    let selector = Selector::parse(&config.result_selector)
        .map_err(|e| LookupError::Unavailable(format!("bad result selector: {e}")))?;
    let html = page.content().await?;
    let document = Html::parse_document(&html);
    let provider = document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|text| !text.is_empty());

    provider.ok_or_else(|| LookupError::NotFound(mask_phone(phone)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_browser::ReplayDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Table-driven backend; numbers not in the table are `NotFound`.
    #[derive(Default)]
    struct TableLookup {
        providers: HashMap<String, String>,
        unavailable: bool,
        fail_prepare: bool,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl TableLookup {
        fn with(entries: &[(&str, &str)]) -> Self {
            Self {
                providers: entries
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProviderLookup for TableLookup {
        async fn prepare(&self) -> LookupResult<()> {
            if self.fail_prepare {
                return Err(LookupError::Unavailable("no route to lookup site".to_string()));
            }
            Ok(())
        }

        async fn lookup(&self, phone: &str) -> LookupResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(LookupError::Unavailable("down".to_string()));
            }
            self.providers
                .get(phone)
                .cloned()
                .ok_or_else(|| LookupError::NotFound(phone.to_string()))
        }

        async fn close(&self) -> LookupResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(backend: Arc<TableLookup>, errors: Arc<ErrorLogger>) -> ProviderLookupService {
        ProviderLookupService::new(backend, 2, 2, errors)
    }

    #[tokio::test]
    async fn test_keys_are_trimmed_and_deduplicated() {
        let backend = Arc::new(TableLookup::with(&[("011 555 0100", "Acme Telco")]));
        let service = service(Arc::clone(&backend), Arc::new(ErrorLogger::new()));

        let map = service
            .lookup_many(["011 555 0100", " 011 555 0100 ", "", "   "])
            .await
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map["011 555 0100"], "Acme Telco");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_keys_are_omitted_and_masked() {
        let backend = Arc::new(TableLookup::with(&[
            ("011 555 0100", "Acme Telco"),
            ("021 444 0000", "Cape Mobile"),
        ]));
        let errors = Arc::new(ErrorLogger::new());
        let service = service(Arc::clone(&backend), Arc::clone(&errors));

        let map = service
            .lookup_many(["011 555 0100", "021 444 0000", "031 222 9999", "041 333 1234", "051 999 8888"])
            .await
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);

        let logged = errors.by_context("operation", "lookup_provider");
        assert_eq!(logged.len(), 3);
        assert!(logged.iter().all(|e| !e.message.contains("031 222 9999")));
        assert!(logged.iter().any(|e| e.message.ends_with("9999")));
    }

    #[tokio::test]
    async fn test_everything_unavailable_is_an_error() {
        let backend = Arc::new(TableLookup {
            unavailable: true,
            ..TableLookup::default()
        });
        let service = service(backend, Arc::new(ErrorLogger::new()));

        let result = service.lookup_many(["011 555 0100", "021 444 0000"]).await;
        assert!(matches!(result, Err(LookupError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_prepare_failure_is_an_error() {
        let backend = Arc::new(TableLookup {
            fail_prepare: true,
            ..TableLookup::default()
        });
        let errors = Arc::new(ErrorLogger::new());
        let service = service(Arc::clone(&backend), Arc::clone(&errors));

        assert!(service.lookup_many(["011 555 0100"]).await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_no_keys_skips_backend() {
        let backend = Arc::new(TableLookup {
            fail_prepare: true,
            ..TableLookup::default()
        });
        let service = service(backend, Arc::new(ErrorLogger::new()));
        let map = service.lookup_many(Vec::<String>::new()).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_close_reaches_backend() {
        let backend = Arc::new(TableLookup::default());
        let service = service(Arc::clone(&backend), Arc::new(ErrorLogger::new()));
        service.close().await;
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_providers() {
        let mut records = vec![
            BusinessRecord::new("A", "u1", "Springs", "plumbers").with_phone("011 555 0100"),
            BusinessRecord::new("B", "u2", "Springs", "plumbers").with_phone("011 555 0100"),
            BusinessRecord::new("C", "u3", "Springs", "plumbers"),
            BusinessRecord::new("D", "u4", "Springs", "plumbers").with_phone("021 444 0000"),
        ];
        let providers =
            HashMap::from([("011 555 0100".to_string(), "Acme Telco".to_string())]);

        apply_providers(&mut records, &providers);

        assert_eq!(records[0].provider.as_deref(), Some("Acme Telco"));
        assert_eq!(records[1].provider.as_deref(), Some("Acme Telco"));
        assert_eq!(records[2].provider, None);
        assert_eq!(records[3].provider.as_deref(), Some(UNKNOWN_PROVIDER));
    }

    #[test]
    fn test_mark_unknown() {
        let mut records = vec![
            BusinessRecord::new("A", "u1", "Springs", "plumbers").with_phone("011 555 0100"),
            BusinessRecord::new("C", "u3", "Springs", "plumbers"),
        ];
        mark_unknown(&mut records);
        assert_eq!(records[0].provider.as_deref(), Some(UNKNOWN_PROVIDER));
        assert_eq!(records[1].provider, None);
    }

    fn lookup_config() -> LookupConfig {
        LookupConfig {
            url_template: "https://lookup.example/?number={phone}".to_string(),
            result_selector: ".provider-name".to_string(),
            timeout_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_browser_lookup_reads_provider() {
        let driver = ReplayDriver::new()
            .route(
                "0115550100",
                vec![r#"<html><body><span class="provider-name"> Acme Telco </span></body></html>"#],
            )
            .route("0214440000", vec!["<html><body><p>No match</p></body></html>"]);
        let stats = driver.stats();
        let lookup = BrowserProviderLookup::new(Arc::new(driver), LaunchOptions::default(), lookup_config());

        lookup.prepare().await.unwrap();
        assert_eq!(lookup.lookup("011 555 0100").await.unwrap(), "Acme Telco");
        assert!(matches!(
            lookup.lookup("021 444 0000").await,
            Err(LookupError::NotFound(_))
        ));
        assert!(matches!(
            lookup.lookup("031 222 9999").await,
            Err(LookupError::Unavailable(_))
        ));
        assert_eq!(stats.open_pages(), 0);

        lookup.close().await.unwrap();
        lookup.close().await.unwrap();
        assert_eq!(stats.open_browsers(), 0);
    }

    #[tokio::test]
    async fn test_browser_lookup_without_prepare() {
        let lookup = BrowserProviderLookup::new(
            Arc::new(ReplayDriver::new()),
            LaunchOptions::default(),
            lookup_config(),
        );
        assert!(matches!(
            lookup.lookup("011 555 0100").await,
            Err(LookupError::Unavailable(_))
        ));
    }
}
