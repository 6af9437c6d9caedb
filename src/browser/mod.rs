//! Browser abstraction used by the scraper.
//!
//! [`PageDriver`] is the thin adapter over one live page: everything the
//! session manager, scroll driver and run controller need, and nothing more.
//! [`BrowserLauncher`] creates one. The real implementation lives in
//! [`chromium`]; tests script a fake.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod snapshot;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScrapeResult;
pub use snapshot::{ChannelSnapshot, ImageSnapshot, ItemSnapshot, RankSnapshot, CHART_ROW_SELECTOR};

/// Desktop Chrome identity presented to the site.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) ",
    "Chrome/124.0.0.0 Safari/537.36"
);

/// One live browser page.
///
/// Implementations must not be used concurrently for navigation; the run
/// controller guarantees a single caller at a time.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load to finish, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> ScrapeResult<()>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> ScrapeResult<()>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> ScrapeResult<usize>;

    /// Scroll through `steps` intermediate positions, then to the bottom.
    async fn scroll_through(&self, steps: u32) -> ScrapeResult<()>;

    /// Scroll up by `offset_px`, then back to the bottom.
    async fn nudge(&self, offset_px: u32) -> ScrapeResult<()>;

    /// Snapshot the first `limit` elements matching `selector`, in DOM order.
    async fn snapshot(&self, selector: &str, limit: usize) -> ScrapeResult<Vec<ItemSnapshot>>;

    /// Click `selector` if it exists. Returns whether a click happened.
    async fn click_if_present(&self, selector: &str) -> ScrapeResult<bool>;

    /// Wait for `selector`, focus it and type `text`.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> ScrapeResult<()>;

    /// Click `selector`, failing if it does not exist.
    async fn click(&self, selector: &str) -> ScrapeResult<()>;

    /// URL of the main frame, empty while none is committed.
    async fn current_url(&self) -> ScrapeResult<String>;

    /// Close the underlying browser.
    async fn close(&self) -> ScrapeResult<()>;
}

/// Starts a browser and hands back its page.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> ScrapeResult<Arc<dyn PageDriver>>;
}

/// Which resource types the page may load.
///
/// Every request passes through this gate. The default allows everything;
/// names are CDP resource types (`Document`, `Script`, `Stylesheet`, `Image`,
/// `Font`, `XHR`, `Fetch`, `Media`, ...) compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPolicy {
    blocked: BTreeSet<String>,
}

impl RequestPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn blocking<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: types
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, resource_type: &str) -> bool {
        !self.blocked.contains(&resource_type.to_ascii_lowercase())
    }

    pub fn is_allow_all(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Explicit browser binary; discovered on the system when unset.
    pub chrome_executable: Option<PathBuf>,
    pub request_policy: RequestPolicy,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_width: 1024,
            window_height: 768,
            chrome_executable: None,
            request_policy: RequestPolicy::allow_all(),
        }
    }
}
