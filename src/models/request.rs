use serde::Deserialize;

use crate::credentials::Credentials;
use crate::error::ScrapeError;

/// Base of every chart listing URL.
pub const CHART_BASE_URL: &str = "https://playboard.co/chart";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid {field} {value:?}: chart parameters must be lowercase letters, digits or '-'")]
pub struct SlugError {
    field: &'static str,
    value: String,
}

/// Which chart to scrape. Each part becomes a URL path fragment, so all three
/// are restricted to URL-safe slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartQuery {
    content_category: String,
    region: String,
    period: String,
}

impl ChartQuery {
    pub fn new(
        content_category: impl Into<String>,
        region: impl Into<String>,
        period: impl Into<String>,
    ) -> Result<Self, SlugError> {
        Ok(Self {
            content_category: checked_slug("content category", content_category.into())?,
            region: checked_slug("region", region.into())?,
            period: checked_slug("period", period.into())?,
        })
    }

    pub fn content_category(&self) -> &str {
        &self.content_category
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    /// Listing URL, e.g.
    /// `https://playboard.co/chart/short/most-viewed-all-videos-in-south-korea-daily`.
    pub fn url(&self) -> String {
        format!(
            "{CHART_BASE_URL}/{}/most-viewed-all-videos-in-{}-{}",
            self.content_category, self.region, self.period
        )
    }
}

fn checked_slug(field: &'static str, value: String) -> Result<String, SlugError> {
    let value = value.trim().to_string();
    let valid = !value.is_empty()
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(value)
    } else {
        Err(SlugError { field, value })
    }
}

#[derive(Debug, Clone)]
pub enum AuthMode {
    Anonymous,
    Authenticated(Credentials),
}

impl AuthMode {
    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            AuthMode::Anonymous => None,
            AuthMode::Authenticated(creds) => Some(creds),
        }
    }
}

/// A fully validated request for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub chart: ChartQuery,
    pub target_count: u32,
    pub auth: AuthMode,
    /// Only honored when the browser is first launched.
    pub show_browser: Option<bool>,
}

impl ExtractionRequest {
    pub fn anonymous(chart: ChartQuery, target_count: u32) -> Self {
        Self {
            chart,
            target_count,
            auth: AuthMode::Anonymous,
            show_browser: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.auth = AuthMode::Authenticated(credentials);
        self
    }
}

/// Values used when the control panel leaves a field out.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub content_category: String,
    pub region: String,
    pub period: String,
    pub target_count: u32,
    pub max_target_count: u32,
    pub credentials: Option<Credentials>,
}

/// `startCrawling` payload as sent by the control panel.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub max_rank: Option<u32>,
    #[serde(default)]
    pub show_browser: Option<bool>,
}

impl StartRequest {
    /// Validate the payload and fill gaps from `defaults`.
    pub fn resolve(self, defaults: &RequestDefaults) -> Result<ExtractionRequest, ScrapeError> {
        let chart = ChartQuery::new(
            non_blank(self.content_type).unwrap_or_else(|| defaults.content_category.clone()),
            non_blank(self.country).unwrap_or_else(|| defaults.region.clone()),
            non_blank(self.period).unwrap_or_else(|| defaults.period.clone()),
        )
        .map_err(|e| ScrapeError::InvalidRequest(e.to_string()))?;

        let target_count = self.max_rank.unwrap_or(defaults.target_count);
        if target_count == 0 || target_count > defaults.max_target_count {
            return Err(ScrapeError::InvalidRequest(format!(
                "maxRank must be between 1 and {}, got {target_count}",
                defaults.max_target_count
            )));
        }

        let auth = match self.mode.as_deref() {
            None | Some("no-login") | Some("anonymous") => AuthMode::Anonymous,
            Some("login") => {
                let supplied = Credentials::new(
                    self.email.unwrap_or_default(),
                    self.password.unwrap_or_default(),
                );
                match supplied.or_else(|| defaults.credentials.clone()) {
                    Some(creds) => AuthMode::Authenticated(creds),
                    None => {
                        return Err(ScrapeError::InvalidRequest(
                            "login mode requires an email and password".to_string(),
                        ))
                    }
                }
            }
            Some(other) => {
                return Err(ScrapeError::InvalidRequest(format!(
                    "unknown mode {other:?}"
                )))
            }
        };

        Ok(ExtractionRequest {
            chart,
            target_count,
            auth,
            show_browser: self.show_browser,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
