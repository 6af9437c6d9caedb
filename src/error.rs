use std::time::Duration;

/// Run-level failure taxonomy.
///
/// Only some of these end a run: `AuthFailure` is downgraded to a warning by
/// the session manager, and per-item problems never reach this type at all
/// (see [`crate::scrape::Discard`]).
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("a crawl is already in progress")]
    Busy,

    #[error("sign-in failed: {0}")]
    AuthFailure(String),

    #[error("timed out after {timeout:?} waiting for {what}")]
    NavigationTimeout { what: String, timeout: Duration },

    #[error("cancelled by user")]
    Cancelled,

    #[error("browser session error: {0}")]
    Session(String),

    #[error("browser command failed: {0}")]
    Browser(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ScrapeError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    pub fn session(err: impl std::fmt::Display) -> Self {
        Self::Session(err.to_string())
    }

    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::NavigationTimeout {
            what: what.into(),
            timeout,
        }
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
