//! Raw per-item DOM snapshots and the in-page scripts that produce them.
//!
//! The scripts only read the DOM; every interpretation (URL rewriting,
//! fallbacks, validity) happens in Rust in [`crate::scrape::extractor`].

use serde::{Deserialize, Serialize};

/// CSS selector for one materialized chart entry.
pub const CHART_ROW_SELECTOR: &str = ".chart__row";

/// What the page exposes about one `.chart__row`. Every field is optional
/// because the markup varies between rows and between site revisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemSnapshot {
    pub rank: Option<RankSnapshot>,
    pub thumbnail: Option<ImageSnapshot>,
    pub title_text: Option<String>,
    pub title_href: Option<String>,
    pub tags: Vec<String>,
    pub date_text: Option<String>,
    pub views_text: Option<String>,
    pub channel: Option<ChannelSnapshot>,
}

/// Contents of the `.rank` cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankSnapshot {
    /// Text of the `.new` marker, if present.
    pub new_text: Option<String>,
    /// Class list of the `.fluc` marker, if present.
    pub fluc_classes: Option<Vec<String>>,
    /// Text of `.fluc .num`.
    pub fluc_num: Option<String>,
}

/// An element that may carry an image as `src`, inline `background-image`,
/// or `data-background-image`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSnapshot {
    /// Upper-case tag name, e.g. `IMG` or `DIV`.
    pub tag: String,
    pub src: Option<String>,
    pub background_image: Option<String>,
    pub data_background_image: Option<String>,
}

/// Contents of the `.channel__wrapper` link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSnapshot {
    pub name: Option<String>,
    pub href: Option<String>,
    pub img_src: Option<String>,
    pub profile_image: Option<ImageSnapshot>,
    pub subscribers: Option<String>,
}

/// Counts materialized rows.
pub fn count_script(selector: &str) -> String {
    format!(
        "document.querySelectorAll({}).length",
        js_string(selector)
    )
}

/// Scrolls through `steps` evenly spaced positions, then to the very bottom.
pub fn scroll_script(steps: u32) -> String {
    format!(
        r#"(() => {{
    const steps = {steps};
    const scrollHeight = document.body.scrollHeight;
    const viewportHeight = window.innerHeight;
    for (let i = 1; i <= steps; i++) {{
        window.scrollTo(0, (scrollHeight - viewportHeight) * (i / steps));
    }}
    window.scrollTo(0, document.body.scrollHeight);
    return document.body.scrollHeight;
}})()"#
    )
}

/// Scrolls up by `offset_px`, then back to the bottom shortly after.
pub fn nudge_script(offset_px: u32) -> String {
    format!(
        r#"(() => {{
    window.scrollTo(0, Math.max(0, window.scrollY - {offset_px}));
    setTimeout(() => window.scrollTo(0, document.body.scrollHeight), 100);
    return true;
}})()"#
    )
}

/// Serializes the first `limit` rows matching `selector` into `ItemSnapshot` JSON.
pub fn snapshot_script(selector: &str, limit: usize) -> String {
    format!(
        r#"(() => {{
    const text = (el) => el ? (el.textContent || '').trim() : null;
    const image = (el) => {{
        if (!el) return null;
        return {{
            tag: el.tagName || '',
            src: el.tagName === 'IMG' ? (el.src || null) : (el.getAttribute('src') || null),
            backgroundImage: (el.style && el.style.backgroundImage) || null,
            dataBackgroundImage: el.getAttribute('data-background-image'),
        }};
    }};
    const rows = Array.from(document.querySelectorAll({selector})).slice(0, {limit});
    return rows.map((row) => {{
        const rankEl = row.querySelector('.rank');
        const fluc = rankEl ? rankEl.querySelector('.fluc') : null;
        const titleLink = row.querySelector('.title__label');
        const channelEl = row.querySelector('.channel__wrapper');
        const channelImg = channelEl ? channelEl.querySelector('img') : null;
        const profile = channelEl ? channelEl.querySelector('.profile-image') : null;
        const profileImg = profile ? profile.querySelector('img[src]') : null;
        return {{
            rank: rankEl ? {{
                newText: text(rankEl.querySelector('.new')),
                flucClasses: fluc ? Array.from(fluc.classList) : null,
                flucNum: fluc ? text(fluc.querySelector('.num')) : null,
            }} : null,
            thumbnail: image(row.querySelector('.thumb-wrapper img, .thumb')),
            titleText: text(row.querySelector('.title__label h3')),
            titleHref: titleLink ? (titleLink.href || null) : null,
            tags: Array.from(row.querySelectorAll('.ttags__item a')).map((a) => text(a)),
            dateText: text(row.querySelector('.title__date')),
            viewsText: text(row.querySelector('.score .fluc-label')),
            channel: channelEl ? {{
                name: text(channelEl.querySelector('.name')),
                href: channelEl.href || null,
                imgSrc: channelImg ? (channelImg.src || null) : null,
                profileImage: profile ? {{
                    tag: profile.tagName || '',
                    src: profileImg ? (profileImg.src || null) : null,
                    backgroundImage: (profile.style && profile.style.backgroundImage) || null,
                    dataBackgroundImage: profile.getAttribute('data-background-image'),
                }} : null,
                subscribers: text(channelEl.querySelector('.subs__count')),
            }} : null,
        }};
    }});
}})()"#,
        selector = js_string(selector),
        limit = limit,
    )
}

/// Quote a Rust string as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
