//! Snapshot → [`Record`] mapping.
//!
//! Each field has its own resolver that degrades to an empty value when the
//! markup is missing, so a malformed row can only ever cost itself.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

use crate::browser::{ChannelSnapshot, ImageSnapshot, ItemSnapshot, RankSnapshot};
use crate::clock::Clock;
use crate::models::{RankChange, Record};

/// Hosts serving YouTube video thumbnails.
pub const THUMBNAIL_CDN_HOSTS: &[&str] = &["img.youtube.com", "i.ytimg.com"];

const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const YOUTUBE_CHANNEL_URL: &str = "https://www.youtube.com/channel/";

static CSS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\(\s*['"]?(.*?)['"]?\s*\)"#).expect("valid regex"));
static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/video/([^?/#]+)").expect("valid regex"));
static CHANNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/channel/([^?/#]+)").expect("valid regex"));

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Discard {
    #[error("row has no title")]
    MissingTitle,
    #[error("row has no video link")]
    MissingVideoUrl,
}

/// Map one row snapshot to a record, or say why it is unusable.
pub fn extract_record(
    item: &ItemSnapshot,
    rank: u32,
    captured_at: DateTime<Utc>,
) -> Result<Record, Discard> {
    let title = clean(item.title_text.as_deref());
    if title.is_empty() {
        return Err(Discard::MissingTitle);
    }

    let (video_url, video_id) = resolve_video(item.title_href.as_deref());
    if video_url.is_empty() {
        return Err(Discard::MissingVideoUrl);
    }

    let channel = item.channel.as_ref();
    let (channel_url, channel_id) = resolve_channel(channel.and_then(|c| c.href.as_deref()));

    Ok(Record {
        rank,
        rank_change: resolve_rank_change(item.rank.as_ref()),
        title,
        tags: item
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        published_label: clean(item.date_text.as_deref()),
        views_label: clean(item.views_text.as_deref()),
        channel_name: clean(channel.and_then(|c| c.name.as_deref())),
        subscriber_label: clean(channel.and_then(|c| c.subscribers.as_deref())),
        thumbnail_url: item
            .thumbnail
            .as_ref()
            .and_then(resolve_thumbnail)
            .unwrap_or_default(),
        video_url,
        video_id,
        channel_url,
        channel_id,
        channel_thumbnail_url: channel
            .and_then(resolve_channel_thumbnail)
            .unwrap_or_default(),
        captured_at,
    })
}

/// Result of extracting a whole page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBatch {
    pub records: Vec<Record>,
    pub discarded: usize,
}

/// Extract up to `limit` valid records from `items`, in order.
///
/// Ranks are handed out only to rows that survive, so they always run
/// 1, 2, 3, ... with no holes left by discarded rows.
pub fn extract_batch(items: &[ItemSnapshot], limit: usize, clock: &dyn Clock) -> ExtractedBatch {
    let captured_at = clock.now();
    let mut batch = ExtractedBatch::default();

    for (position, item) in items.iter().enumerate() {
        if batch.records.len() >= limit {
            break;
        }
        let rank = batch.records.len() as u32 + 1;
        match extract_record(item, rank, captured_at) {
            Ok(record) => batch.records.push(record),
            Err(reason) => {
                tracing::debug!(position, %reason, "discarding chart row");
                batch.discarded += 1;
            }
        }
    }

    batch
}

fn clean(text: Option<&str>) -> String {
    text.map(str::trim).unwrap_or_default().to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// "NEW" beats any fluctuation marker; unrecognized markup is `Unknown`.
pub fn resolve_rank_change(rank: Option<&RankSnapshot>) -> RankChange {
    let Some(rank) = rank else {
        return RankChange::Unknown;
    };

    if rank
        .new_text
        .as_deref()
        .is_some_and(|t| t.to_ascii_uppercase().contains("NEW"))
    {
        return RankChange::New;
    }

    let Some(classes) = rank.fluc_classes.as_ref() else {
        return RankChange::Unknown;
    };
    let has = |name: &str| classes.iter().any(|c| c == name);
    let magnitude = || clean(rank.fluc_num.as_deref());

    if has("up") {
        RankChange::Up(magnitude())
    } else if has("down") {
        RankChange::Down(magnitude())
    } else if has("same") {
        RankChange::Same
    } else {
        RankChange::Unknown
    }
}

/// `<img src>`, then inline `background-image`, then `data-background-image`.
pub fn resolve_thumbnail(image: &ImageSnapshot) -> Option<String> {
    let from_src = if image.tag.eq_ignore_ascii_case("img") {
        non_empty(image.src.as_deref()).map(str::to_string)
    } else {
        None
    };

    from_src
        .or_else(|| image.background_image.as_deref().and_then(unwrap_css_url))
        .or_else(|| non_empty(image.data_background_image.as_deref()).map(str::to_string))
        .map(|url| normalize_thumbnail_url(&url))
}

/// Channel avatar: `img src`, then the profile container's image, then its
/// background style.
pub fn resolve_channel_thumbnail(channel: &ChannelSnapshot) -> Option<String> {
    if let Some(src) = non_empty(channel.img_src.as_deref()) {
        return Some(src.to_string());
    }
    let profile = channel.profile_image.as_ref()?;
    non_empty(profile.src.as_deref())
        .map(str::to_string)
        .or_else(|| profile.background_image.as_deref().and_then(unwrap_css_url))
}

/// Extract the target of a CSS `url(...)` value, quoted or not.
pub fn unwrap_css_url(value: &str) -> Option<String> {
    let captured = CSS_URL_RE.captures(value)?.get(1)?.as_str().trim();
    (!captured.is_empty()).then(|| captured.to_string())
}

/// Force https and the high-quality variant for YouTube thumbnail CDN URLs.
/// Anything else is returned unchanged.
pub fn normalize_thumbnail_url(raw: &str) -> String {
    let candidate = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };

    let Ok(mut url) = Url::parse(&candidate) else {
        return raw.to_string();
    };
    let on_cdn = url
        .host_str()
        .is_some_and(|host| THUMBNAIL_CDN_HOSTS.contains(&host));
    if !on_cdn {
        return raw.to_string();
    }

    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        return raw.to_string();
    }

    let upgraded = url.path_segments().and_then(|segments| {
        let segments: Vec<&str> = segments.collect();
        let (last, dirs) = segments.split_last()?;
        let rest = last.strip_prefix("mqdefault")?;
        Some(
            dirs.iter()
                .map(|s| s.to_string())
                .chain(std::iter::once(format!("hqdefault{rest}")))
                .collect::<Vec<_>>()
                .join("/"),
        )
    });
    if let Some(path) = upgraded {
        url.set_path(&path);
    }

    url.to_string()
}

/// Turn a listing link into the canonical watch URL and video id.
///
/// Links without a `/video/{id}` segment are kept as-is with an empty id.
pub fn resolve_video(href: Option<&str>) -> (String, String) {
    let Some(href) = non_empty(href) else {
        return (String::new(), String::new());
    };
    match VIDEO_ID_RE.captures(href).and_then(|c| c.get(1)) {
        Some(id) => (
            format!("{YOUTUBE_WATCH_URL}{}", id.as_str()),
            id.as_str().to_string(),
        ),
        None => (href.to_string(), String::new()),
    }
}

/// Same as [`resolve_video`] for `/channel/{id}` links.
pub fn resolve_channel(href: Option<&str>) -> (String, String) {
    let Some(href) = non_empty(href) else {
        return (String::new(), String::new());
    };
    match CHANNEL_ID_RE.captures(href).and_then(|c| c.get(1)) {
        Some(id) => (
            format!("{YOUTUBE_CHANNEL_URL}{}", id.as_str()),
            id.as_str().to_string(),
        ),
        None => (href.to_string(), String::new()),
    }
}
