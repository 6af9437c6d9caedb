//! [`PageDriver`] backed by a local Chrome/Chromium over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::snapshot::{count_script, nudge_script, scroll_script, snapshot_script};
use super::{BrowserLauncher, ItemSnapshot, LaunchOptions, PageDriver, RequestPolicy};
use crate::error::{ScrapeError, ScrapeResult};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Launches Chrome/Chromium through chromiumoxide.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> ScrapeResult<Arc<dyn PageDriver>> {
        let page = ChromiumPage::launch(options).await?;
        Ok(Arc::new(page))
    }
}

/// Aborts a background task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ChromiumPage {
    browser: Mutex<Option<Browser>>,
    page: Page,
    tasks: std::sync::Mutex<Vec<AbortOnDrop>>,
}

impl ChromiumPage {
    pub async fn launch(options: &LaunchOptions) -> ScrapeResult<Self> {
        let chrome_path = match &options.chrome_executable {
            Some(path) => path.clone(),
            None => find_chrome().ok_or_else(|| {
                ScrapeError::session(
                    "Chrome/Chromium not found. Install it or set CHROME_EXECUTABLE.",
                )
            })?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .viewport(Viewport {
                width: options.window_width,
                height: options.window_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(options.window_width, options.window_height)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::session(format!("Failed to configure browser: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::session(format!("Failed to launch browser: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "CDP handler error");
                }
            }
        });
        let mut tasks = vec![AbortOnDrop(handler_task)];

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::session(format!("Failed to open page: {e}")))?;

        page.execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await
            .map_err(|e| ScrapeError::session(format!("Failed to set user agent: {e}")))?;

        tasks.push(enable_request_gate(&page, options.request_policy.clone()).await?);

        tracing::info!(
            headless = options.headless,
            width = options.window_width,
            height = options.window_height,
            "browser launched"
        );

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> ScrapeResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(ScrapeError::browser)?
            .into_value::<T>()
            .map_err(ScrapeError::browser)
    }
}

/// Pause every request at the CDP Fetch layer and let `policy` decide whether
/// it continues or fails as blocked-by-client.
async fn enable_request_gate(page: &Page, policy: RequestPolicy) -> ScrapeResult<AbortOnDrop> {
    let patterns = vec![RequestPattern {
        url_pattern: Some("*".to_string()),
        resource_type: None,
        request_stage: Some(RequestStage::Request),
    }];

    page.execute(fetch::EnableParams {
        patterns: Some(patterns),
        handle_auth_requests: None,
    })
    .await
    .map_err(|e| ScrapeError::session(format!("Failed to enable request gating: {e}")))?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| ScrapeError::session(format!("Failed to listen for requests: {e}")))?;

    let page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let resource_type = event.resource_type.as_ref();
            let result = if policy.allows(resource_type) {
                page.execute(fetch::ContinueRequestParams {
                    request_id: event.request_id.clone(),
                    url: None,
                    method: None,
                    post_data: None,
                    headers: None,
                    intercept_response: None,
                })
                .await
                .map(|_| ())
            } else {
                tracing::trace!(resource_type, url = %event.request.url, "request blocked");
                page.execute(fetch::FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            };
            if let Err(err) = result {
                tracing::debug!(error = %err, "failed to release paused request");
            }
        }
    });

    Ok(AbortOnDrop(task))
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> ScrapeResult<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| ScrapeError::timeout(format!("navigation to {url}"), timeout))?
            .map_err(ScrapeError::browser)?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
        let start = Instant::now();
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ScrapeError::timeout(format!("selector {selector}"), timeout));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn count(&self, selector: &str) -> ScrapeResult<usize> {
        self.eval(count_script(selector)).await
    }

    async fn scroll_through(&self, steps: u32) -> ScrapeResult<()> {
        self.eval::<serde_json::Value>(scroll_script(steps)).await?;
        Ok(())
    }

    async fn nudge(&self, offset_px: u32) -> ScrapeResult<()> {
        self.eval::<serde_json::Value>(nudge_script(offset_px)).await?;
        Ok(())
    }

    async fn snapshot(&self, selector: &str, limit: usize) -> ScrapeResult<Vec<ItemSnapshot>> {
        // Decode row by row so one odd row cannot poison the batch.
        let rows: Vec<serde_json::Value> = self.eval(snapshot_script(selector, limit)).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).unwrap_or_else(|err| {
                    tracing::debug!(error = %err, "unreadable row snapshot");
                    ItemSnapshot::default()
                })
            })
            .collect())
    }

    async fn click_if_present(&self, selector: &str) -> ScrapeResult<bool> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                element.click().await.map_err(ScrapeError::browser)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> ScrapeResult<()> {
        self.wait_for_selector(selector, timeout).await?;
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(ScrapeError::browser)?;
        element
            .click()
            .await
            .map_err(ScrapeError::browser)?
            .type_str(text)
            .await
            .map_err(ScrapeError::browser)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> ScrapeResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(ScrapeError::browser)?;
        element.click().await.map_err(ScrapeError::browser)?;
        Ok(())
    }

    async fn current_url(&self) -> ScrapeResult<String> {
        let url = self.page.url().await.map_err(ScrapeError::browser)?;
        Ok(url.unwrap_or_default())
    }

    async fn close(&self) -> ScrapeResult<()> {
        let browser = self.browser.lock().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(ScrapeError::session)
            }
            None => Ok(()),
        };
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.clear();
        }
        result
    }
}

/// Find a Chrome/Chromium executable.
///
/// `CHROME_EXECUTABLE` wins, then `PATH`, then well-known install locations.
pub fn find_chrome() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_EXECUTABLE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for exe in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
                let candidate = dir.join(exe);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    ];

    candidates
        .iter()
        .map(Path::new)
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
}
