use crate::actions::{BrowserDriver, BrowserHandle, LaunchOptions, PageHandle};
use crate::error::{BrowserError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Interval between selector probes while waiting.
const SELECTOR_POLL_MS: u64 = 250;

/// Browser driver backed by a local Chrome/Chromium through the DevTools protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumDriver;

impl ChromiumDriver {
    /// Create a new chromium driver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn build_config(options: &LaunchOptions) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(options.window_width, options.window_height);

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(user_agent) = &options.user_agent {
            builder = builder.arg(format!("--user-agent={user_agent}"));
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }
}

#[async_trait::async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserHandle>> {
        let config = Self::build_config(options)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Spawn browser handler
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("chromium handler event error: {}", e);
                }
            }
        });

        tracing::debug!(headless = options.headless, "chromium launched");

        Ok(Box::new(ChromiumBrowser {
            browser: Some(browser),
            handler_task,
        }))
    }
}

/// A launched chromium process.
struct ChromiumBrowser {
    browser: Option<Browser>,
    handler_task: JoinHandle<()>,
}

#[async_trait::async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        let browser = self.browser.as_ref().ok_or(BrowserError::NotRunning)?;
        let page = browser.new_page("about:blank").await?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        let result = browser.close().await;
        if let Err(e) = browser.wait().await {
            tracing::debug!("waiting for chromium exit failed: {}", e);
        }
        self.handler_task.abort();
        result.map(|_| ()).map_err(BrowserError::from)
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait::async_trait]
impl PageHandle for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), BrowserError>(())
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::NavigationError(format!("{url}: {e}"))),
            Err(_) => Err(BrowserError::Timeout(format!(
                "navigation to {url} after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let found = crate::actions::wait_for_any(
            self,
            &[selector],
            timeout,
            Duration::from_millis(SELECTOR_POLL_MS),
        )
        .await?;

        match found {
            Some(_) => Ok(()),
            None => Err(BrowserError::Timeout(format!(
                "{selector} after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        // find_element errors when nothing matches
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
