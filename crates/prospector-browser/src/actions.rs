use crate::error::Result;
use std::time::Duration;

/// Browser engine entry point.
///
/// Implementations must be thread-safe; one driver is shared by every
/// worker, each of which launches its own browser through it.
#[async_trait::async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Launch a new browser instance
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserHandle>>;
}

/// A running browser instance owned by exactly one worker.
#[async_trait::async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a fresh page/tab
    async fn new_page(&self) -> Result<Box<dyn PageHandle>>;

    /// Shut the browser down
    async fn close(&mut self) -> Result<()>;
}

/// One open page. DOM queries run against HTML snapshots from [`PageHandle::content`].
#[async_trait::async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate to a URL and wait for the load to settle
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait for a selector to appear
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Check whether a selector currently matches
    async fn exists(&self, selector: &str) -> Result<bool>;

    /// Serialized HTML of the current document
    async fn content(&self) -> Result<String>;

    /// Evaluate a script in the page
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Close the page
    async fn close(&self) -> Result<()>;
}

/// Options passed to [`BrowserDriver::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub executable: Option<std::path::PathBuf>,
    pub user_agent: Option<String>,
}

impl LaunchOptions {
    /// Build launch options from the browser section and the run's headless flag.
    #[must_use]
    pub fn from_config(browser: &prospector_core::BrowserConfig, headless: bool) -> Self {
        Self {
            headless,
            window_width: browser.window_width,
            window_height: browser.window_height,
            executable: browser.executable.clone(),
            user_agent: browser.user_agent.clone(),
        }
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_config(&prospector_core::BrowserConfig::default(), true)
    }
}

/// Wait until any of `selectors` matches, returning the index of the first hit.
///
/// Returns `Ok(None)` when the timeout elapses without a match.
pub async fn wait_for_any(
    page: &dyn PageHandle,
    selectors: &[&str],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<usize>> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        for (idx, selector) in selectors.iter().enumerate() {
            if page.exists(selector).await? {
                return Ok(Some(idx));
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Script that scrolls the first element matching `selector` to its bottom.
///
/// Evaluates to `true` when the element exists.
#[must_use]
pub fn scroll_to_bottom_script(selector: &str) -> String {
    let selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"body\"".to_string());
    format!(
        "(() => {{ const el = document.querySelector({selector}); \
         if (!el) {{ return false; }} el.scrollTop = el.scrollHeight; return true; }})()"
    )
}
