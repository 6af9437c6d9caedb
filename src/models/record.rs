use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Movement of an entry relative to the previous chart period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RankChange {
    New,
    Up(String),
    Down(String),
    Same,
    #[default]
    Unknown,
}

/// One normalized chart entry.
///
/// Labels (`views_label`, `published_label`, `subscriber_label`) are kept as
/// the site renders them; they are not parsed into numbers or dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// 1-based position in emission order.
    pub rank: u32,
    pub rank_change: RankChange,
    pub title: String,
    pub tags: Vec<String>,
    pub published_label: String,
    pub views_label: String,
    pub channel_name: String,
    pub subscriber_label: String,
    pub thumbnail_url: String,
    /// Canonical YouTube watch URL when the video id could be resolved.
    pub video_url: String,
    pub video_id: String,
    pub channel_url: String,
    pub channel_id: String,
    pub channel_thumbnail_url: String,
    pub captured_at: DateTime<Utc>,
}
