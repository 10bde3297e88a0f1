//! Offline driver that serves recorded HTML snapshots.
//!
//! Each route maps a URL fragment to a sequence of snapshots. `content()`
//! returns the current snapshot and every `evaluate()` call (the scraper's
//! scroll step) advances to the next one, so a recorded results feed can be
//! replayed scroll by scroll. Routes can also be told to fail navigation a
//! number of times, or to block until a semaphore permit is available, and
//! the driver can refuse launches.

use crate::actions::{BrowserDriver, BrowserHandle, LaunchOptions, PageHandle};
use crate::error::{BrowserError, Result};
use scraper::{Html, Selector};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Counters describing what the driver was asked to do.
#[derive(Debug, Default)]
pub struct ReplayStats {
    /// Successful launches
    pub launches: AtomicUsize,
    /// Browsers launched and not yet closed
    pub open_browsers: AtomicUsize,
    /// Pages opened and not yet closed
    pub open_pages: AtomicUsize,
    /// Navigation attempts, including failed ones
    pub navigations: AtomicUsize,
}

impl ReplayStats {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Successful launches so far.
    #[must_use]
    pub fn launches(&self) -> usize {
        Self::get(&self.launches)
    }

    /// Browsers currently open.
    #[must_use]
    pub fn open_browsers(&self) -> usize {
        Self::get(&self.open_browsers)
    }

    /// Pages currently open.
    #[must_use]
    pub fn open_pages(&self) -> usize {
        Self::get(&self.open_pages)
    }

    /// Navigation attempts so far.
    #[must_use]
    pub fn navigations(&self) -> usize {
        Self::get(&self.navigations)
    }
}

#[derive(Debug)]
struct Route {
    pattern: String,
    snapshots: Vec<String>,
    failures_left: AtomicU32,
    gate: Option<Arc<Semaphore>>,
}

/// Browser driver replaying recorded pages.
#[derive(Debug, Default)]
pub struct ReplayDriver {
    routes: Vec<Arc<Route>>,
    launch_failures: AtomicU32,
    stats: Arc<ReplayStats>,
}

impl ReplayDriver {
    /// Create a driver with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `snapshots` for any URL containing `pattern` (decoded form).
    #[must_use]
    pub fn route<S: Into<String>>(mut self, pattern: &str, snapshots: Vec<S>) -> Self {
        self.routes.push(Arc::new(Route {
            pattern: pattern.to_string(),
            snapshots: snapshots.into_iter().map(Into::into).collect(),
            failures_left: AtomicU32::new(0),
            gate: None,
        }));
        self
    }

    /// Fail the first `times` navigations to URLs containing `pattern`.
    #[must_use]
    pub fn fail_navigation(mut self, pattern: &str, times: u32) -> Self {
        self.update_route(pattern, |route| {
            route.failures_left = AtomicU32::new(times);
        });
        self
    }

    /// Block navigation to URLs containing `pattern` until `gate` has a permit.
    #[must_use]
    pub fn gate(mut self, pattern: &str, gate: Arc<Semaphore>) -> Self {
        self.update_route(pattern, |route| route.gate = Some(gate));
        self
    }

    /// Refuse the next `times` launches.
    #[must_use]
    pub fn fail_launches(self, times: u32) -> Self {
        self.launch_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Shared counters for assertions.
    #[must_use]
    pub fn stats(&self) -> Arc<ReplayStats> {
        Arc::clone(&self.stats)
    }

    fn update_route(&mut self, pattern: &str, apply: impl FnOnce(&mut Route)) {
        let existing = self.routes.iter().position(|r| r.pattern == pattern);
        let mut route = match existing {
            Some(idx) => {
                let route = self.routes.remove(idx);
                Arc::try_unwrap(route).unwrap_or_else(|shared| Route {
                    pattern: shared.pattern.clone(),
                    snapshots: shared.snapshots.clone(),
                    failures_left: AtomicU32::new(shared.failures_left.load(Ordering::SeqCst)),
                    gate: shared.gate.clone(),
                })
            }
            None => Route {
                pattern: pattern.to_string(),
                snapshots: Vec::new(),
                failures_left: AtomicU32::new(0),
                gate: None,
            },
        };
        apply(&mut route);
        let idx = existing.unwrap_or(self.routes.len());
        self.routes.insert(idx, Arc::new(route));
    }
}

#[async_trait::async_trait]
impl BrowserDriver for ReplayDriver {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserHandle>> {
        let refused = self
            .launch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrowserError::LaunchFailed("replay launch refused".to_string()));
        }

        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        self.stats.open_browsers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplayBrowser {
            routes: self.routes.clone(),
            stats: Arc::clone(&self.stats),
            open: true,
        }))
    }
}

struct ReplayBrowser {
    routes: Vec<Arc<Route>>,
    stats: Arc<ReplayStats>,
    open: bool,
}

#[async_trait::async_trait]
impl BrowserHandle for ReplayBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        if !self.open {
            return Err(BrowserError::NotRunning);
        }
        self.stats.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplayPage {
            routes: self.routes.clone(),
            stats: Arc::clone(&self.stats),
            state: Mutex::new(PageState::default()),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.stats.open_browsers.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for ReplayBrowser {
    fn drop(&mut self) {
        if self.open {
            self.stats.open_browsers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct PageState {
    route: Option<Arc<Route>>,
    index: usize,
    closed: bool,
}

struct ReplayPage {
    routes: Vec<Arc<Route>>,
    stats: Arc<ReplayStats>,
    state: Mutex<PageState>,
}

impl ReplayPage {
    fn snapshot(&self) -> Option<String> {
        let state = self.state.lock().ok()?;
        let route = state.route.as_ref()?;
        route
            .snapshots
            .get(state.index.min(route.snapshots.len().saturating_sub(1)))
            .cloned()
    }
}

/// Decoded path and query values, so patterns can be written in plain text.
fn match_text(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let values: Vec<String> = parsed.query_pairs().map(|(_, v)| v.into_owned()).collect();
            format!("{} {}", parsed.path(), values.join(" "))
        }
        Err(_) => url.to_string(),
    }
}

#[async_trait::async_trait]
impl PageHandle for ReplayPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        let text = match_text(url);
        let route = self
            .routes
            .iter()
            .find(|r| text.contains(&r.pattern) || url.contains(&r.pattern))
            .cloned()
            .ok_or_else(|| BrowserError::NavigationError(format!("no recorded page for {url}")))?;

        if let Some(gate) = &route.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| BrowserError::NavigationError("replay gate closed".to_string()))?;
        }

        let failing = route
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || route.snapshots.is_empty() {
            return Err(BrowserError::NavigationError(format!(
                "replayed failure for {url}"
            )));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| BrowserError::ChromiumError("replay page state poisoned".to_string()))?;
        state.route = Some(route);
        state.index = 0;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        if self.exists(selector).await? {
            Ok(())
        } else {
            Err(BrowserError::Timeout(format!(
                "{selector} after {}ms",
                timeout.as_millis()
            )))
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let parsed = Selector::parse(selector)
            .map_err(|e| BrowserError::SelectorNotFound(format!("{selector}: {e}")))?;
        Ok(self
            .snapshot()
            .is_some_and(|html| Html::parse_document(&html).select(&parsed).next().is_some()))
    }

    async fn content(&self) -> Result<String> {
        self.snapshot()
            .ok_or_else(|| BrowserError::NavigationError("page has not navigated".to_string()))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BrowserError::ChromiumError("replay page state poisoned".to_string()))?;
        state.index += 1;
        Ok(serde_json::Value::Bool(true))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BrowserError::ChromiumError("replay page state poisoned".to_string()))?;
        if !state.closed {
            state.closed = true;
            self.stats.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
