use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::browser::{LaunchOptions, RequestPolicy, DEFAULT_USER_AGENT};
use crate::credentials::Credentials;
use crate::models::RequestDefaults;
use crate::scrape::{RunSettings, ScrollTuning, Timeouts};

/// Event channel listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// How the browser is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,

    /// Explicit Chrome/Chromium binary. Discovered automatically when unset.
    pub chrome_executable: Option<PathBuf>,

    /// CDP resource types that are never loaded (e.g. `["Media", "Font"]`).
    pub blocked_resource_types: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        let launch = LaunchOptions::default();
        Self {
            headless: launch.headless,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_width: launch.window_width,
            window_height: launch.window_height,
            chrome_executable: None,
            blocked_resource_types: Vec::new(),
        }
    }
}

/// Chart used when the control panel leaves a field out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartDefaults {
    pub content_type: String,
    pub country: String,
    pub period: String,
    pub max_rank: u32,

    /// Largest `maxRank` a request may ask for.
    pub max_rank_limit: u32,

    /// Suggested file name for exported results.
    pub output_file: String,
}

impl Default for ChartDefaults {
    fn default() -> Self {
        Self {
            content_type: "short".to_string(),
            country: "south-korea".to_string(),
            period: "daily".to_string(),
            max_rank: 200,
            max_rank_limit: 1000,
            output_file: "playboard_rankings.json".to_string(),
        }
    }
}

/// Default sign-in, used when a login-mode request carries no credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub email: Option<String>,

    /// Prefer `PLAYBOARD_PASSWORD` over writing this into a file.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl LoginConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::new(
            self.email.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub browser: BrowserSettings,
    pub chart: ChartDefaults,
    pub login: LoginConfig,
    pub scroll: ScrollTuning,
    pub timeouts: Timeouts,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`.
    ///
    /// Recognized keys: `PORT`, `MAX_RANK`, `OUTPUT_FILE`, `HEADLESS`,
    /// `PLAYBOARD_EMAIL`, `PLAYBOARD_PASSWORD`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT {port:?}"))?;
        }
        if let Some(max_rank) = get("MAX_RANK") {
            self.chart.max_rank = max_rank
                .trim()
                .parse()
                .with_context(|| format!("Invalid MAX_RANK {max_rank:?}"))?;
        }
        if let Some(output_file) = get("OUTPUT_FILE") {
            self.chart.output_file = output_file;
        }
        if let Some(headless) = get("HEADLESS") {
            self.browser.headless = parse_flag(&headless)
                .with_context(|| format!("Invalid HEADLESS {headless:?}"))?;
        }
        if let Some(email) = get("PLAYBOARD_EMAIL") {
            self.login.email = Some(email);
        }
        if let Some(password) = get("PLAYBOARD_PASSWORD") {
            self.login.password = Some(password);
        }
        Ok(())
    }

    /// Sanity checks that cannot be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        if self.chart.max_rank_limit == 0 {
            anyhow::bail!("chart.max_rank_limit must be at least 1");
        }
        if self.chart.max_rank == 0 || self.chart.max_rank > self.chart.max_rank_limit {
            anyhow::bail!(
                "chart.max_rank must be between 1 and {}, got {}",
                self.chart.max_rank_limit,
                self.chart.max_rank
            );
        }
        if self.scroll.stall_threshold == 0 {
            anyhow::bail!("scroll.stall_threshold must be at least 1");
        }
        if self.scroll.scroll_steps == 0 {
            anyhow::bail!("scroll.scroll_steps must be at least 1");
        }
        Ok(())
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.browser.headless,
            user_agent: self.browser.user_agent.clone(),
            window_width: self.browser.window_width,
            window_height: self.browser.window_height,
            chrome_executable: self.browser.chrome_executable.clone(),
            request_policy: RequestPolicy::blocking(&self.browser.blocked_resource_types),
        }
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            content_category: self.chart.content_type.clone(),
            region: self.chart.country.clone(),
            period: self.chart.period.clone(),
            target_count: self.chart.max_rank,
            max_target_count: self.chart.max_rank_limit,
            credentials: self.login.credentials(),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            tuning: self.scroll.clone(),
            timeouts: self.timeouts.clone(),
            defaults: self.request_defaults(),
            output_file: self.chart.output_file.clone(),
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected true or false, got {other:?}"),
    }
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./chartscroll.toml` if it exists in current directory
/// 2. `~/.config/chartscroll/chartscroll.toml` (XDG config directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("chartscroll.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("chartscroll").join("chartscroll.toml");
    }

    local_config
}
