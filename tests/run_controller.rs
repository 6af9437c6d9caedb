mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use chartscroll::error::ScrapeError;
use chartscroll::events::{EventSink, ServerEvent};
use chartscroll::models::RankChange;
use chartscroll::scrape::session::SIGNIN_URL;
use chartscroll::scrape::{RunController, RunOutcome};
use support::{
    anonymous_request, broken_row, chart_rows, controller, login_request, FakeLauncher, FakePage,
    Gate, RecordingSink, Stage,
};

fn sink_of(sink: &Arc<RecordingSink>) -> Arc<dyn EventSink> {
    sink.clone()
}

/// Calls `stop` from inside `emit` the first time `trigger` matches, the way
/// a client's stop command can land while events are still streaming out.
struct StoppingSink {
    inner: Arc<RecordingSink>,
    controller: OnceLock<Arc<RunController>>,
    trigger: fn(&ServerEvent) -> bool,
    stop_results: Mutex<Vec<bool>>,
}

impl StoppingSink {
    fn new(inner: Arc<RecordingSink>, trigger: fn(&ServerEvent) -> bool) -> Arc<Self> {
        Arc::new(Self {
            inner,
            controller: OnceLock::new(),
            trigger,
            stop_results: Mutex::new(Vec::new()),
        })
    }

    fn stop_results(&self) -> Vec<bool> {
        self.stop_results.lock().unwrap().clone()
    }
}

fn is_record(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::Record(_))
}

fn is_progress(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::Progress { .. })
}

impl EventSink for StoppingSink {
    fn emit(&self, event: ServerEvent) {
        let fire = (self.trigger)(&event);
        self.inner.emit(event);
        if !fire {
            return;
        }
        let mut results = self.stop_results.lock().unwrap();
        if results.is_empty() {
            if let Some(controller) = self.controller.get() {
                results.push(controller.stop(self.inner.as_ref()));
            }
        }
    }
}

#[tokio::test]
async fn fifty_five_rows_yield_exactly_fifty_records() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(55), 55),
    )));
    let controller = controller(launcher.clone());
    let sink = RecordingSink::new();

    let outcome = controller.start(anonymous_request(50), sink_of(&sink))?.await?;

    assert_eq!(outcome, RunOutcome::Completed(50));
    let records = sink.records();
    assert_eq!(records.len(), 50);
    assert_eq!(
        records.iter().map(|r| r.rank).collect::<Vec<_>>(),
        (1..=50).collect::<Vec<u32>>()
    );
    assert_eq!(sink.terminal(), vec![ServerEvent::Complete { count: 50 }]);
    assert_eq!(launcher.page.scrolls.load(Ordering::SeqCst), 0);

    let first = &records[0];
    assert_eq!(first.title, "Video 1");
    assert_eq!(first.rank_change, RankChange::Up("2".to_string()));
    assert_eq!(first.video_url, "https://www.youtube.com/watch?v=vid1");
    assert_eq!(first.thumbnail_url, "https://i.ytimg.com/vi/vid1/hqdefault.jpg");
    assert_eq!(first.channel_url, "https://www.youtube.com/channel/UC1");

    // Terminal event comes after every record, then the session note.
    let events = sink.events();
    let complete_at = events
        .iter()
        .position(ServerEvent::is_terminal)
        .expect("terminal event");
    assert!(events[..complete_at]
        .iter()
        .filter(|e| matches!(e, ServerEvent::Record(_)))
        .count()
        == 50);
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Status { message, .. }) if message.contains("kept open")
    ));
    assert!(!controller.is_busy());
    Ok(())
}

#[tokio::test]
async fn malformed_rows_are_backfilled_by_the_margin() -> Result<()> {
    let mut rows = chart_rows(12);
    rows.insert(2, broken_row());
    rows.insert(5, broken_row());
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(rows, 14),
    )));
    let controller = controller(launcher);
    let sink = RecordingSink::new();

    let outcome = controller.start(anonymous_request(9), sink_of(&sink))?.await?;

    assert_eq!(outcome, RunOutcome::Completed(9));
    let records = sink.records();
    assert!(records.iter().all(|r| !r.title.is_empty() && !r.video_url.is_empty()));
    assert_eq!(
        records.iter().map(|r| r.rank).collect::<Vec<_>>(),
        (1..=9).collect::<Vec<u32>>()
    );
    assert_eq!(records[2].title, "Video 3");
    Ok(())
}

#[tokio::test]
async fn stalled_list_completes_with_what_loaded() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(30), 20).with_growth([30]),
    )));
    let controller = controller(launcher);
    let sink = RecordingSink::new();

    let outcome = controller.start(anonymous_request(50), sink_of(&sink))?.await?;

    assert_eq!(outcome, RunOutcome::Completed(30));
    assert_eq!(sink.terminal(), vec![ServerEvent::Complete { count: 30 }]);
    assert!(!sink.warnings().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_start_is_rejected_while_running() -> Result<()> {
    let gate = Gate::at(Stage::Goto(1));
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new()
            .with_rows(chart_rows(20), 20)
            .with_gate(gate.clone()),
    )));
    let controller = controller(launcher.clone());
    let first_sink = RecordingSink::new();
    let second_sink = RecordingSink::new();

    let first = controller.start(anonymous_request(10), sink_of(&first_sink))?;
    gate.entered.notified().await;

    let second = controller.start(anonymous_request(10), sink_of(&second_sink));
    assert!(matches!(second, Err(ScrapeError::Busy)));
    assert_eq!(second_sink.warnings().len(), 1);
    assert!(second_sink.terminal().is_empty());
    assert_eq!(launcher.page.goto_count(), 1);

    gate.release.notify_one();
    assert_eq!(first.await?, RunOutcome::Completed(10));
    assert_eq!(launcher.page.goto_count(), 1);
    assert!(!controller.is_busy());
    Ok(())
}

#[tokio::test]
async fn stop_during_scrolling_emits_stopped() -> Result<()> {
    let gate = Gate::at(Stage::Scroll(2));
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new()
            .with_rows(chart_rows(100), 10)
            .with_growth([20, 30, 40])
            .with_gate(gate.clone()),
    )));
    let controller = controller(launcher.clone());
    let sink = RecordingSink::new();

    let run = controller.start(anonymous_request(50), sink_of(&sink))?;
    gate.entered.notified().await;
    assert!(controller.stop(sink.as_ref()));
    gate.release.notify_one();

    assert_eq!(run.await?, RunOutcome::Cancelled);
    assert_eq!(sink.terminal(), vec![ServerEvent::Stopped]);
    assert!(sink.records().is_empty());
    assert_eq!(launcher.page.snapshots.load(Ordering::SeqCst), 0);
    assert!(!controller.is_busy());
    Ok(())
}

#[tokio::test]
async fn stop_after_rows_loaded_still_cancels() -> Result<()> {
    // The only count call happens once every row is already on the page.
    let gate = Gate::at(Stage::Count(1));
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new()
            .with_rows(chart_rows(60), 60)
            .with_gate(gate.clone()),
    )));
    let controller = controller(launcher.clone());
    let sink = RecordingSink::new();

    let run = controller.start(anonymous_request(50), sink_of(&sink))?;
    gate.entered.notified().await;
    controller.stop(sink.as_ref());
    gate.release.notify_one();

    assert_eq!(run.await?, RunOutcome::Cancelled);
    assert_eq!(sink.terminal(), vec![ServerEvent::Stopped]);
    assert!(sink.records().is_empty());
    assert_eq!(launcher.page.snapshots.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn stop_while_records_stream_is_refused() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(55), 55),
    )));
    let controller = controller(launcher);
    let recorded = RecordingSink::new();
    let sink = StoppingSink::new(recorded.clone(), is_record);
    let _ = sink.controller.set(controller.clone());

    let outcome = controller.start(anonymous_request(50), sink.clone())?.await?;

    // Too late to cancel: the stop is refused and reports nothing.
    assert_eq!(sink.stop_results(), vec![false]);
    assert_eq!(outcome, RunOutcome::Completed(50));
    assert_eq!(recorded.records().len(), 50);
    assert_eq!(recorded.terminal(), vec![ServerEvent::Complete { count: 50 }]);
    assert!(recorded.warnings().is_empty());
    assert!(!controller.is_busy());
    Ok(())
}

#[tokio::test]
async fn stop_from_a_progress_event_cancels_before_records() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(55), 55),
    )));
    let controller = controller(launcher.clone());
    let recorded = RecordingSink::new();
    let sink = StoppingSink::new(recorded.clone(), is_progress);
    let _ = sink.controller.set(controller.clone());

    let outcome = controller.start(anonymous_request(50), sink.clone())?.await?;

    assert_eq!(sink.stop_results(), vec![true]);
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(recorded.records().is_empty());
    assert_eq!(recorded.terminal(), vec![ServerEvent::Stopped]);
    assert_eq!(recorded.warnings().len(), 1);
    assert_eq!(launcher.page.snapshots.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn stop_without_run_does_nothing() {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(FakePage::new())));
    let controller = controller(launcher);
    let sink = RecordingSink::new();

    assert!(!controller.stop(sink.as_ref()));
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn navigation_timeout_fails_run_but_keeps_session() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new()
            .with_rows(chart_rows(20), 20)
            .failing_goto("most-viewed"),
    )));
    let controller = controller(launcher.clone());
    let sink = RecordingSink::new();

    let outcome = controller.start(anonymous_request(10), sink_of(&sink))?.await?;

    assert!(matches!(outcome, RunOutcome::Failed(ref message) if message.contains("timed out")));
    let terminal = sink.terminal();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0], ServerEvent::Error { .. }));
    assert!(!controller.is_busy());
    assert_eq!(launcher.page.closes.load(Ordering::SeqCst), 0);

    // The guard is free and the browser is reused.
    let again = RecordingSink::new();
    controller.start(anonymous_request(10), sink_of(&again))?.await?;
    assert_eq!(launcher.launch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_chart_fails_waiting_for_first_row() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(FakePage::new())));
    let controller = controller(launcher);
    let sink = RecordingSink::new();

    let outcome = controller.start(anonymous_request(10), sink_of(&sink))?.await?;

    assert!(matches!(outcome, RunOutcome::Failed(_)));
    assert!(sink.records().is_empty());
    Ok(())
}

#[tokio::test]
async fn session_and_login_survive_across_runs() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(20), 20),
    )));
    let controller = controller(launcher.clone());

    for _ in 0..3 {
        let sink = RecordingSink::new();
        let outcome = controller.start(login_request(10), sink_of(&sink))?.await?;
        assert_eq!(outcome, RunOutcome::Completed(10));
    }

    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(launcher.page.visited(SIGNIN_URL), 1);
    assert!(controller.config_snapshot().is_logged_in);
    Ok(())
}

#[tokio::test]
async fn failed_login_still_scrapes_anonymously() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(20), 20).failing_login(),
    )));
    let controller = controller(launcher);
    let sink = RecordingSink::new();

    let outcome = controller.start(login_request(10), sink_of(&sink))?.await?;

    assert_eq!(outcome, RunOutcome::Completed(10));
    assert_eq!(sink.warnings().len(), 1);
    assert!(!controller.config_snapshot().is_logged_in);
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_browser_and_next_run_relaunches() -> Result<()> {
    let launcher = Arc::new(FakeLauncher::new(Arc::new(
        FakePage::new().with_rows(chart_rows(20), 20),
    )));
    let controller = controller(launcher.clone());

    controller
        .start(login_request(10), sink_of(&RecordingSink::new()))?
        .await?;
    controller.shutdown().await;

    assert_eq!(launcher.page.closes.load(Ordering::SeqCst), 1);
    assert!(!controller.config_snapshot().is_logged_in);

    controller
        .start(anonymous_request(10), sink_of(&RecordingSink::new()))?
        .await?;
    assert_eq!(launcher.launch_count(), 2);
    Ok(())
}
