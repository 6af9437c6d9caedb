//! One extraction run at a time, end to end.
//!
//! A run moves `Idle -> Running -> {Completed, Failed, Cancelled} -> Idle`.
//! Admission is a single atomic flag; a second start while running is
//! rejected, never queued. Every accepted run emits exactly one terminal
//! event (`complete`, `error` or `stopped`) and leaves the browser open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::check;
use super::extractor::extract_batch;
use super::scroll::{ScrollDriver, ScrollOutcome, ScrollTuning};
use super::session::{SessionManager, Timeouts};
use crate::browser::{BrowserLauncher, LaunchOptions, CHART_ROW_SELECTOR};
use crate::clock::Clock;
use crate::error::{ScrapeError, ScrapeResult};
use crate::events::{ConfigSnapshot, EventSink, ServerEvent};
use crate::models::{ExtractionRequest, RequestDefaults};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(usize),
    Failed(String),
    Cancelled,
}

/// Fixed inputs shared by every run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub tuning: ScrollTuning,
    pub timeouts: Timeouts,
    pub defaults: RequestDefaults,
    /// Suggested export file name, reported to the control panel.
    pub output_file: String,
}

pub struct RunController {
    session: tokio::sync::Mutex<SessionManager>,
    busy: AtomicBool,
    logged_in: AtomicBool,
    active: Mutex<Option<CancellationToken>>,
    headless: bool,
    settings: RunSettings,
    clock: Arc<dyn Clock>,
}

/// Releases the busy flag when a run ends, however it ends.
struct RunGuard {
    controller: Arc<RunController>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.controller.active_token().take();
        self.controller.busy.store(false, Ordering::Release);
    }
}

impl RunController {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        launch_options: LaunchOptions,
        settings: RunSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let headless = launch_options.headless;
        Self {
            session: tokio::sync::Mutex::new(SessionManager::new(
                launcher,
                launch_options,
                settings.timeouts.clone(),
            )),
            busy: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            active: Mutex::new(None),
            headless,
            settings,
            clock,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn request_defaults(&self) -> &RequestDefaults {
        &self.settings.defaults
    }

    /// Defaults and session state for the `config` event.
    pub fn config_snapshot(&self) -> ConfigSnapshot {
        let defaults = &self.settings.defaults;
        ConfigSnapshot {
            email: defaults.credentials.as_ref().map(|c| c.email().to_string()),
            has_password: defaults.credentials.is_some(),
            content_type: defaults.content_category.clone(),
            country: defaults.region.clone(),
            period: defaults.period.clone(),
            max_rank: defaults.target_count,
            output_file: self.settings.output_file.clone(),
            show_browser: !self.headless,
            is_logged_in: self.logged_in.load(Ordering::Acquire),
        }
    }

    fn active_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run in the background.
    ///
    /// Fails with [`ScrapeError::Busy`] (after emitting a warning) if a run
    /// is already in progress; nothing else happens in that case.
    pub fn start(
        self: &Arc<Self>,
        request: ExtractionRequest,
        sink: Arc<dyn EventSink>,
    ) -> Result<JoinHandle<RunOutcome>, ScrapeError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("start rejected, crawl already running");
            sink.emit(ServerEvent::warning("A crawl is already in progress."));
            return Err(ScrapeError::Busy);
        }

        let guard = RunGuard {
            controller: Arc::clone(self),
        };
        let token = CancellationToken::new();
        *self.active_token() = Some(token.clone());

        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            let chart = request.chart.url();
            tracing::info!(%chart, target = request.target_count, "crawl started");

            let outcome = match controller.execute(&request, &token, sink.as_ref()).await {
                Ok(count) => {
                    tracing::info!(count, "crawl complete");
                    sink.emit(ServerEvent::Complete { count });
                    RunOutcome::Completed(count)
                }
                Err(ScrapeError::Cancelled) => {
                    tracing::info!("crawl stopped");
                    sink.emit(ServerEvent::Stopped);
                    RunOutcome::Cancelled
                }
                Err(err) => {
                    tracing::error!(error = %err, "crawl failed");
                    let message = err.to_string();
                    sink.emit(ServerEvent::error(message.clone()));
                    RunOutcome::Failed(message)
                }
            };

            sink.emit(ServerEvent::info("Browser session kept open for the next crawl."));
            outcome
        }))
    }

    async fn execute(
        &self,
        request: &ExtractionRequest,
        token: &CancellationToken,
        sink: &dyn EventSink,
    ) -> ScrapeResult<usize> {
        let settings = &self.settings;

        let mut session = tokio::select! {
            _ = token.cancelled() => return Err(ScrapeError::Cancelled),
            session = self.session.lock() => session,
        };

        sink.emit(ServerEvent::info(if session.is_active() {
            "Reusing the open browser session."
        } else {
            "Starting browser..."
        }));
        let page = session.ensure_session(request.show_browser).await?;
        check(token)?;

        if let Some(credentials) = request.auth.credentials() {
            if session.is_authenticated() {
                sink.emit(ServerEvent::info("Already signed in."));
            } else {
                let signed_in = session
                    .ensure_authenticated(page.as_ref(), credentials, token, sink)
                    .await?;
                self.logged_in.store(signed_in, Ordering::Release);
            }
        }
        check(token)?;

        let url = request.chart.url();
        sink.emit(ServerEvent::info(format!("Opening chart {url}")));
        page.goto(&url, settings.timeouts.navigation).await?;
        check(token)?;

        page.wait_for_selector(CHART_ROW_SELECTOR, settings.timeouts.first_row).await?;
        check(token)?;

        let target = request.target_count as usize;
        sink.emit(ServerEvent::info(format!("Loading up to {target} chart entries...")));
        let driver = ScrollDriver::new(settings.tuning.clone());
        let report = driver.run(page.as_ref(), target, token, sink).await?;
        tracing::info!(
            outcome = ?report.outcome,
            materialized = report.materialized,
            iterations = report.iterations,
            "scrolling finished"
        );
        if report.outcome == ScrollOutcome::IterationCap {
            sink.emit(ServerEvent::warning(format!(
                "Stopped scrolling after {} attempts with {} items loaded.",
                report.iterations, report.materialized
            )));
        }
        check(token)?;

        sink.emit(ServerEvent::info("Extracting entries..."));
        let snapshots = page
            .snapshot(CHART_ROW_SELECTOR, driver.tuning().goal(target))
            .await?;
        let batch = extract_batch(&snapshots, target, self.clock.as_ref());
        if batch.discarded > 0 {
            tracing::info!(discarded = batch.discarded, "skipped malformed rows");
        }
        self.commit(token)?;

        let count = batch.records.len();
        for record in batch.records {
            sink.emit(ServerEvent::Record(record));
        }
        Ok(count)
    }

    /// Last cancellation point. Past it the run can no longer be stopped, so
    /// a later `stop` reports that nothing is running.
    fn commit(&self, token: &CancellationToken) -> ScrapeResult<()> {
        let mut active = self.active_token();
        check(token)?;
        active.take();
        Ok(())
    }

    /// Cancel the active run, if any. Returns whether there was one.
    pub fn stop(&self, sink: &dyn EventSink) -> bool {
        let active = self.active_token();
        match active.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                tracing::info!("stop requested");
                sink.emit(ServerEvent::warning("Stopping the crawl..."));
                true
            }
            _ => false,
        }
    }

    /// Cancel any run, wait for it to release the browser, then close it.
    pub async fn shutdown(&self) {
        let active = self.active_token().clone();
        if let Some(token) = active {
            token.cancel();
        }
        let mut session = self.session.lock().await;
        session.shutdown().await;
        self.logged_in.store(false, Ordering::Release);
    }
}
