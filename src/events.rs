//! Message contract between the scraper and the control panel.
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::models::{Record, StartRequest};

/// Commands sent by the control panel.
#[derive(Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    GetConfig,
    StartCrawling(StartRequest),
    StopCrawling,
    #[serde(alias = "exitProgram")]
    Shutdown,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::GetConfig => "getConfig",
            ClientCommand::StartCrawling(_) => "startCrawling",
            ClientCommand::StopCrawling => "stopCrawling",
            ClientCommand::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Success,
}

/// Defaults and session state shown by the control panel on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub email: Option<String>,
    pub has_password: bool,
    pub content_type: String,
    pub country: String,
    pub period: String,
    pub max_rank: u32,
    pub output_file: String,
    pub show_browser: bool,
    pub is_logged_in: bool,
}

/// Events pushed to the control panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Config(ConfigSnapshot),
    Status {
        message: String,
        #[serde(rename = "type")]
        severity: Severity,
    },
    Progress {
        current: usize,
        total: usize,
    },
    #[serde(rename = "result")]
    Record(Record),
    Complete {
        count: usize,
    },
    Stopped,
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `complete`, `stopped` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::Complete { .. } | ServerEvent::Stopped | ServerEvent::Error { .. }
        )
    }
}

/// Destination for events produced while handling commands and runs.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ServerEvent);
}

/// A connection's outbound queue; a closed connection silently drops events.
impl EventSink for UnboundedSender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        let _ = self.send(event);
    }
}
