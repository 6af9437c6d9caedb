//! Scroll-driven chart extraction.
//!
//! [`controller::RunController`] owns a [`session::SessionManager`] and runs
//! one extraction at a time: navigate, optionally sign in, grow the list with
//! [`scroll::ScrollDriver`], then map snapshots with [`extractor`].

pub mod controller;
pub mod extractor;
pub mod scroll;
pub mod session;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ScrapeError, ScrapeResult};

pub use controller::{RunController, RunOutcome, RunSettings};
pub use extractor::{extract_batch, extract_record, Discard, ExtractedBatch};
pub use scroll::{ScrollDriver, ScrollOutcome, ScrollReport, ScrollTuning};
pub use session::{SessionManager, Timeouts};

/// Fail with [`ScrapeError::Cancelled`] if `token` has fired.
pub(crate) fn check(token: &CancellationToken) -> ScrapeResult<()> {
    if token.is_cancelled() {
        Err(ScrapeError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep for `delay` unless `token` fires first.
pub(crate) async fn pause(token: &CancellationToken, delay: Duration) -> ScrapeResult<()> {
    if delay.is_zero() {
        return check(token);
    }
    tokio::select! {
        _ = token.cancelled() => Err(ScrapeError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
