#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chartscroll::browser::{
    BrowserLauncher, ChannelSnapshot, ImageSnapshot, ItemSnapshot, LaunchOptions, PageDriver,
    RankSnapshot,
};
use chartscroll::clock::FixedClock;
use chartscroll::credentials::Credentials;
use chartscroll::error::{ScrapeError, ScrapeResult};
use chartscroll::events::{EventSink, ServerEvent};
use chartscroll::models::{ChartQuery, ExtractionRequest, Record, RequestDefaults};
use chartscroll::scrape::{RunController, RunSettings, ScrollTuning, Timeouts};
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

/// Where a [`FakePage`] pauses until the test releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The n-th `goto` call (1-based).
    Goto(usize),
    /// The n-th `count` call (1-based).
    Count(usize),
    /// The n-th `scroll_through` call (1-based).
    Scroll(usize),
}

#[derive(Clone)]
pub struct Gate {
    pub stage: Stage,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    pub fn at(stage: Stage) -> Self {
        Self {
            stage,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

/// Scripted page: the row count grows by popping `growth` on each scroll.
///
/// Once `growth` is empty the count stays put, which is how tests model a
/// list that stopped loading.
#[derive(Default)]
pub struct FakePage {
    current: Mutex<usize>,
    growth: Mutex<VecDeque<usize>>,
    rows: Vec<ItemSnapshot>,
    gate: Option<Gate>,
    fail_fill: bool,
    reject_login: bool,
    url: Mutex<String>,
    fail_goto_containing: Option<String>,

    pub gotos: Mutex<Vec<String>>,
    pub filled: Mutex<Vec<String>>,
    pub count_calls: AtomicUsize,
    pub scrolls: AtomicUsize,
    pub nudges: AtomicUsize,
    pub snapshots: AtomicUsize,
    pub submits: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page with `rows` available and `initial` of them rendered.
    pub fn with_rows(mut self, rows: Vec<ItemSnapshot>, initial: usize) -> Self {
        self.rows = rows;
        *self.current.get_mut().unwrap() = initial;
        self
    }

    /// Counts reported after each successive scroll.
    pub fn with_growth(mut self, counts: impl IntoIterator<Item = usize>) -> Self {
        *self.growth.get_mut().unwrap() = counts.into_iter().collect();
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_login(mut self) -> Self {
        self.fail_fill = true;
        self
    }

    /// Submitting the sign-in form leaves the page where it is.
    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub fn failing_goto(mut self, url_fragment: impl Into<String>) -> Self {
        self.fail_goto_containing = Some(url_fragment.into());
        self
    }

    pub fn goto_count(&self) -> usize {
        self.gotos.lock().unwrap().len()
    }

    pub fn visited(&self, fragment: &str) -> usize {
        self.gotos
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains(fragment))
            .count()
    }

    async fn pass(&self, stage: Stage) {
        if let Some(gate) = &self.gate {
            if gate.stage == stage {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, timeout: Duration) -> ScrapeResult<()> {
        let n = {
            let mut gotos = self.gotos.lock().unwrap();
            gotos.push(url.to_string());
            gotos.len()
        };
        *self.url.lock().unwrap() = url.to_string();
        self.pass(Stage::Goto(n)).await;
        if let Some(fragment) = &self.fail_goto_containing {
            if url.contains(fragment.as_str()) {
                return Err(ScrapeError::timeout(format!("navigation to {url}"), timeout));
            }
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
        if *self.current.lock().unwrap() == 0 {
            return Err(ScrapeError::timeout(format!("selector {selector}"), timeout));
        }
        Ok(())
    }

    async fn count(&self, _selector: &str) -> ScrapeResult<usize> {
        let n = self.count_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pass(Stage::Count(n)).await;
        Ok(*self.current.lock().unwrap())
    }

    async fn scroll_through(&self, _steps: u32) -> ScrapeResult<()> {
        let n = self.scrolls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pass(Stage::Scroll(n)).await;
        if let Some(next) = self.growth.lock().unwrap().pop_front() {
            *self.current.lock().unwrap() = next;
        }
        Ok(())
    }

    async fn nudge(&self, _offset_px: u32) -> ScrapeResult<()> {
        self.nudges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn snapshot(&self, _selector: &str, limit: usize) -> ScrapeResult<Vec<ItemSnapshot>> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let rendered = *self.current.lock().unwrap();
        Ok(self.rows.iter().take(rendered.min(limit)).cloned().collect())
    }

    async fn click_if_present(&self, _selector: &str) -> ScrapeResult<bool> {
        Ok(false)
    }

    async fn fill(&self, selector: &str, _text: &str, timeout: Duration) -> ScrapeResult<()> {
        if self.fail_fill {
            return Err(ScrapeError::timeout(format!("selector {selector}"), timeout));
        }
        self.filled.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn click(&self, _selector: &str) -> ScrapeResult<()> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if !self.reject_login {
            *self.url.lock().unwrap() = "https://playboard.co/".to_string();
        }
        Ok(())
    }

    async fn current_url(&self) -> ScrapeResult<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn close(&self) -> ScrapeResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same [`FakePage`] on every launch and counts launches.
pub struct FakeLauncher {
    pub page: Arc<FakePage>,
    pub launches: AtomicUsize,
    pub last_headless: Mutex<Option<bool>>,
}

impl FakeLauncher {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page,
            launches: AtomicUsize::new(0),
            last_headless: Mutex::new(None),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> ScrapeResult<Arc<dyn PageDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_headless.lock().unwrap() = Some(options.headless);
        let page: Arc<dyn PageDriver> = self.page.clone();
        Ok(page)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ServerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Record(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn terminal(&self) -> Vec<ServerEvent> {
        self.events()
            .into_iter()
            .filter(ServerEvent::is_terminal)
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Status {
                    message,
                    severity: chartscroll::events::Severity::Warning,
                } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Progress { current, total } => Some((current, total)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ServerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A complete, valid chart row.
pub fn chart_row(n: usize) -> ItemSnapshot {
    ItemSnapshot {
        rank: Some(RankSnapshot {
            new_text: None,
            fluc_classes: Some(vec!["fluc".to_string(), "up".to_string()]),
            fluc_num: Some("2".to_string()),
        }),
        thumbnail: Some(ImageSnapshot {
            tag: "IMG".to_string(),
            src: Some(format!("http://i.ytimg.com/vi/vid{n}/mqdefault.jpg")),
            background_image: None,
            data_background_image: None,
        }),
        title_text: Some(format!("Video {n}")),
        title_href: Some(format!("https://playboard.co/en/video/vid{n}")),
        tags: vec!["#shorts".to_string()],
        date_text: Some("2 days ago".to_string()),
        views_text: Some(format!("{n}K")),
        channel: Some(ChannelSnapshot {
            name: Some(format!("Channel {n}")),
            href: Some(format!("https://playboard.co/en/channel/UC{n}")),
            img_src: Some(format!("https://yt3.ggpht.com/ch{n}")),
            profile_image: None,
            subscribers: Some("1.2M".to_string()),
        }),
    }
}

/// A row with no title link, which the extractor must drop.
pub fn broken_row() -> ItemSnapshot {
    ItemSnapshot {
        title_text: Some("Ad".to_string()),
        ..Default::default()
    }
}

pub fn chart_rows(count: usize) -> Vec<ItemSnapshot> {
    (1..=count).map(chart_row).collect()
}

pub fn chart() -> ChartQuery {
    ChartQuery::new("short", "south-korea", "daily").unwrap()
}

pub fn anonymous_request(target: u32) -> ExtractionRequest {
    ExtractionRequest::anonymous(chart(), target)
}

pub fn login_request(target: u32) -> ExtractionRequest {
    anonymous_request(target).with_credentials(credentials())
}

pub fn credentials() -> Credentials {
    Credentials::new("me@example.com", "hunter2").unwrap()
}

pub fn settings(tuning: ScrollTuning) -> RunSettings {
    RunSettings {
        tuning,
        timeouts: Timeouts::default(),
        defaults: RequestDefaults {
            content_category: "short".to_string(),
            region: "south-korea".to_string(),
            period: "daily".to_string(),
            target_count: 200,
            max_target_count: 1000,
            credentials: None,
        },
        output_file: "playboard_rankings.json".to_string(),
    }
}

pub fn controller(launcher: Arc<FakeLauncher>) -> Arc<RunController> {
    controller_with(launcher, ScrollTuning::immediate())
}

pub fn controller_with(launcher: Arc<FakeLauncher>, tuning: ScrollTuning) -> Arc<RunController> {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    Arc::new(RunController::new(
        launcher,
        LaunchOptions::default(),
        settings(tuning),
        Arc::new(clock),
    ))
}
