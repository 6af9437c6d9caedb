//! Grows a lazily loaded list toward a target size.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{check, pause};
use crate::browser::{PageDriver, CHART_ROW_SELECTOR};
use crate::duration::{deserialize_duration, serialize_duration};
use crate::error::ScrapeResult;
use crate::events::{EventSink, ServerEvent};

/// Knobs for [`ScrollDriver`]. Loaded from the `[scroll]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollTuning {
    /// Intermediate positions visited per iteration before jumping to the bottom.
    pub scroll_steps: u32,

    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub settle_delay: Duration,

    /// Consecutive non-growing iterations that end the loop. A nudge is tried
    /// one iteration earlier.
    pub stall_threshold: u32,

    pub nudge_offset_px: u32,

    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub nudge_delay: Duration,

    /// Growth (in items) above which the page gets extra time to render.
    pub large_jump: usize,

    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub large_jump_delay: Duration,

    pub max_iterations: u32,

    /// Extra items materialized beyond the target to backfill discarded rows.
    pub margin: usize,
}

impl Default for ScrollTuning {
    fn default() -> Self {
        Self {
            scroll_steps: 5,
            settle_delay: Duration::from_millis(800),
            stall_threshold: 3,
            nudge_offset_px: 500,
            nudge_delay: Duration::from_secs(1),
            large_jump: 20,
            large_jump_delay: Duration::from_millis(500),
            max_iterations: 50,
            margin: 5,
        }
    }
}

impl ScrollTuning {
    /// Default thresholds with every wait set to zero.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            nudge_delay: Duration::ZERO,
            large_jump_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Number of rows the loop tries to materialize for `target` records.
    pub fn goal(&self, target: usize) -> usize {
        target.saturating_add(self.margin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    TargetReached,
    Stalled,
    IterationCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollReport {
    pub outcome: ScrollOutcome,
    /// Rows present when the loop ended.
    pub materialized: usize,
    pub iterations: u32,
}

pub struct ScrollDriver {
    tuning: ScrollTuning,
}

impl ScrollDriver {
    pub fn new(tuning: ScrollTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &ScrollTuning {
        &self.tuning
    }

    /// Scroll until `target + margin` rows exist, growth stalls, or the
    /// iteration cap is hit.
    ///
    /// Stalling and the cap are normal outcomes; only cancellation and
    /// browser failures are errors.
    pub async fn run(
        &self,
        page: &dyn PageDriver,
        target: usize,
        token: &CancellationToken,
        sink: &dyn EventSink,
    ) -> ScrapeResult<ScrollReport> {
        let tuning = &self.tuning;
        let goal = tuning.goal(target);

        let mut last_count = page.count(CHART_ROW_SELECTOR).await?;
        emit_progress(sink, last_count, target);

        let mut stall_count = 0u32;
        let mut iterations = 0u32;

        let outcome = loop {
            if last_count >= goal {
                break ScrollOutcome::TargetReached;
            }
            if iterations >= tuning.max_iterations {
                tracing::warn!(
                    iterations,
                    materialized = last_count,
                    goal,
                    "scroll iteration cap reached"
                );
                break ScrollOutcome::IterationCap;
            }
            check(token)?;

            iterations += 1;
            page.scroll_through(tuning.scroll_steps).await?;
            pause(token, tuning.settle_delay).await?;

            let count = page.count(CHART_ROW_SELECTOR).await?;
            emit_progress(sink, count, target);

            if count > last_count {
                let grown = count - last_count;
                tracing::debug!(iteration = iterations, count, grown, "list grew");
                stall_count = 0;
                last_count = count;
                if grown > tuning.large_jump {
                    pause(token, tuning.large_jump_delay).await?;
                }
                continue;
            }

            stall_count += 1;
            tracing::debug!(iteration = iterations, count, stall_count, "list did not grow");

            if stall_count >= tuning.stall_threshold {
                tracing::warn!(
                    materialized = last_count,
                    goal,
                    stall_count,
                    "no new rows loaded, stopping scroll"
                );
                sink.emit(ServerEvent::warning(format!(
                    "No more items are loading. Continuing with {last_count} items."
                )));
                break ScrollOutcome::Stalled;
            }

            if stall_count + 1 == tuning.stall_threshold {
                tracing::debug!(offset_px = tuning.nudge_offset_px, "nudging scroll position");
                page.nudge(tuning.nudge_offset_px).await?;
                pause(token, tuning.nudge_delay).await?;
            }
        };

        Ok(ScrollReport {
            outcome,
            materialized: last_count,
            iterations,
        })
    }
}

fn emit_progress(sink: &dyn EventSink, count: usize, target: usize) {
    sink.emit(ServerEvent::Progress {
        current: count.min(target),
        total: target,
    });
}
