//! The one long-lived browser page and its sign-in state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{check, pause};
use crate::browser::{BrowserLauncher, LaunchOptions, PageDriver};
use crate::credentials::Credentials;
use crate::duration::{deserialize_duration, serialize_duration};
use crate::error::{ScrapeError, ScrapeResult};
use crate::events::{EventSink, ServerEvent};

pub const SIGNIN_URL: &str = "https://playboard.co/account/signin";
pub const CONSENT_BUTTON_SELECTOR: &str = r#"button[aria-label="동의"]"#;
pub const EMAIL_INPUT_SELECTOR: &str = r#"input[name="email"]"#;
pub const PASSWORD_INPUT_SELECTOR: &str = r#"input[name="password"]"#;
pub const SUBMIT_BUTTON_SELECTOR: &str = r#"button[type="submit"]"#;

const REDIRECT_POLL: Duration = Duration::from_millis(250);

/// Upper bounds for browser waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Page loads, including the post-login redirect.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub navigation: Duration,

    /// Form fields on the sign-in page.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub selector: Duration,

    /// First chart row after opening the listing.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub first_row: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(60),
            selector: Duration::from_secs(10),
            first_row: Duration::from_secs(60),
        }
    }
}

/// Owns the browser across runs.
///
/// The page is created lazily on the first run and closed only by
/// [`SessionManager::shutdown`]. Callers serialize access through the run
/// controller's mutex.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    options: LaunchOptions,
    timeouts: Timeouts,
    page: Option<Arc<dyn PageDriver>>,
    authenticated: bool,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        options: LaunchOptions,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            launcher,
            options,
            timeouts,
            page: None,
            authenticated: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.page.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Return the live page, launching the browser if there is none.
    ///
    /// `show_browser` only matters for that first launch.
    pub async fn ensure_session(
        &mut self,
        show_browser: Option<bool>,
    ) -> ScrapeResult<Arc<dyn PageDriver>> {
        if let Some(page) = &self.page {
            return Ok(Arc::clone(page));
        }

        let mut options = self.options.clone();
        if let Some(show) = show_browser {
            options.headless = !show;
        }

        tracing::info!(headless = options.headless, "launching browser session");
        let page = self.launcher.launch(&options).await?;
        self.page = Some(Arc::clone(&page));
        Ok(page)
    }

    /// Sign in once per session.
    ///
    /// Returns `Ok(true)` when the session is (or already was) signed in.
    /// A failed sign-in is reported as a warning and returns `Ok(false)` so
    /// the run can continue anonymously; only cancellation propagates.
    pub async fn ensure_authenticated(
        &mut self,
        page: &dyn PageDriver,
        credentials: &Credentials,
        token: &CancellationToken,
        sink: &dyn EventSink,
    ) -> ScrapeResult<bool> {
        if self.authenticated {
            return Ok(true);
        }

        match self.sign_in(page, credentials, token, sink).await {
            Ok(()) => {
                self.authenticated = true;
                tracing::info!(email = credentials.email(), "signed in");
                sink.emit(ServerEvent::success("Signed in."));
                Ok(true)
            }
            Err(ScrapeError::Cancelled) => Err(ScrapeError::Cancelled),
            Err(err) => {
                let err = match err {
                    ScrapeError::AuthFailure(_) => err,
                    other => ScrapeError::AuthFailure(other.to_string()),
                };
                tracing::warn!(error = %err, "sign-in failed, continuing without login");
                sink.emit(ServerEvent::warning(format!(
                    "Sign-in failed, continuing without login: {err}"
                )));
                Ok(false)
            }
        }
    }

    async fn sign_in(
        &self,
        page: &dyn PageDriver,
        credentials: &Credentials,
        token: &CancellationToken,
        sink: &dyn EventSink,
    ) -> ScrapeResult<()> {
        let timeouts = &self.timeouts;

        sink.emit(ServerEvent::info("Opening the sign-in page..."));
        page.goto(SIGNIN_URL, timeouts.navigation).await?;
        check(token)?;

        match page.click_if_present(CONSENT_BUTTON_SELECTOR).await {
            Ok(true) => tracing::debug!("dismissed consent overlay"),
            Ok(false) => {}
            Err(err) => tracing::debug!(error = %err, "consent overlay click failed"),
        }
        check(token)?;

        sink.emit(ServerEvent::info("Entering credentials..."));
        page.fill(EMAIL_INPUT_SELECTOR, credentials.email(), timeouts.selector).await?;
        check(token)?;
        page.fill(PASSWORD_INPUT_SELECTOR, credentials.expose_password(), timeouts.selector).await?;
        check(token)?;

        page.click(SUBMIT_BUTTON_SELECTOR).await?;
        self.wait_for_redirect(page, token).await
    }

    /// A successful sign-in redirects away from the form; a rejected one
    /// re-renders it in place.
    async fn wait_for_redirect(
        &self,
        page: &dyn PageDriver,
        token: &CancellationToken,
    ) -> ScrapeResult<()> {
        let timeout = self.timeouts.navigation;
        let start = tokio::time::Instant::now();

        loop {
            pause(token, REDIRECT_POLL).await?;

            let url = page.current_url().await?;
            if !url.is_empty() && !url.starts_with(SIGNIN_URL) {
                tracing::debug!(%url, "left the sign-in page");
                return Ok(());
            }

            if start.elapsed() > timeout {
                return Err(ScrapeError::timeout("redirect away from the sign-in page", timeout));
            }
        }
    }

    /// Close the browser and forget the sign-in. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.authenticated = false;
        let Some(page) = self.page.take() else {
            return;
        };
        match page.close().await {
            Ok(()) => tracing::info!("browser session closed"),
            Err(err) => tracing::warn!(error = %err, "failed to close browser cleanly"),
        }
    }
}
