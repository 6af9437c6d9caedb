//! Duration parsing for scroll delays and browser timeouts ("800ms", "60s", "2m").

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Parse a duration string like "800ms", "60s", "2m" or "1h".
///
/// Supported units:
/// - `ms` - milliseconds
/// - `s` - seconds
/// - `m` - minutes
/// - `h` - hours
///
/// The input is case-insensitive and whitespace is trimmed.
///
/// # Examples
///
/// ```
/// use chartscroll::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("800ms").unwrap(), Duration::from_millis(800));
/// assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    // "ms" must be checked before "m" and "s".
    let (num, millis_per_unit): (&str, u64) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60 * 1_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60 * 1_000)
    } else {
        anyhow::bail!("Duration must end with ms, s, m, or h");
    };

    let num: u64 = num
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in duration {s:?}"))?;

    let millis = num
        .checked_mul(millis_per_unit)
        .context("Duration is too large")?;

    Ok(Duration::from_millis(millis))
}

/// Format a duration using the largest unit that divides it evenly.
///
/// ```
/// use chartscroll::duration::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(800)), "800ms");
/// assert_eq!(format_duration(Duration::from_secs(60)), "1m");
/// assert_eq!(format_duration(Duration::from_secs(90)), "90s");
/// ```
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();

    const MS_PER_HOUR: u128 = 60 * 60 * 1_000;
    const MS_PER_MINUTE: u128 = 60 * 1_000;
    const MS_PER_SECOND: u128 = 1_000;

    if millis >= MS_PER_HOUR && millis % MS_PER_HOUR == 0 {
        format!("{}h", millis / MS_PER_HOUR)
    } else if millis >= MS_PER_MINUTE && millis % MS_PER_MINUTE == 0 {
        format!("{}m", millis / MS_PER_MINUTE)
    } else if millis >= MS_PER_SECOND && millis % MS_PER_SECOND == 0 {
        format!("{}s", millis / MS_PER_SECOND)
    } else {
        format!("{millis}ms")
    }
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}

/// Serde serializer matching [`deserialize_duration`].
pub fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}
