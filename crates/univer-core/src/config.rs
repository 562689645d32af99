//! Client configuration.
//!
//! This module holds the settings the API client needs: the backend base URL,
//! the interface language sent with every request, and the login timing knobs.
//!
//! Values come from the environment (`UNIVER_*` variables) with development
//! defaults. The plain credential profile lives under `~/.config/univer/`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for config directory paths
const APP_NAME: &str = "univer";

/// Backend address used during development
const DEFAULT_API_URL: &str = "http://localhost:7435";

/// Delay before a login request is sent.
/// Bursts of re-login triggers within this window collapse into one attempt.
const DEFAULT_LOGIN_SETTLE_MS: u64 = 1000;

/// How long a settled login stays joinable before a new one may start.
const DEFAULT_LOGIN_GRACE_MS: u64 = 1000;

const ENV_API_URL: &str = "UNIVER_API_URL";
const ENV_LANG: &str = "UNIVER_LANG";
const ENV_LOGIN_SETTLE_MS: &str = "UNIVER_LOGIN_SETTLE_MS";
const ENV_LOGIN_GRACE_MS: &str = "UNIVER_LOGIN_GRACE_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "UNIVER_REQUEST_TIMEOUT_SECS";

/// Interface language passed to the backend as the `lang` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Kk,
    #[default]
    Ru,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Kk => "kk",
            Language::Ru => "ru",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kk" | "kz" => Ok(Language::Kk),
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            other => Err(anyhow::anyhow!("Unsupported language: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Url,
    pub language: Language,
    pub login_settle_delay: Duration,
    pub login_grace_period: Duration,
    /// Per-request timeout. `None` leaves requests unbounded; the retry
    /// budget is then the only limit on an authenticated fetch.
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            language: Language::default(),
            login_settle_delay: Duration::from_millis(DEFAULT_LOGIN_SETTLE_MS),
            login_grace_period: Duration::from_millis(DEFAULT_LOGIN_GRACE_MS),
            request_timeout: None,
        }
    }
}

impl Config {
    /// Build a config pointing at the given backend, other settings default.
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url =
            Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        Ok(Self {
            api_url,
            ..Self::default()
        })
    }

    /// Load configuration from `UNIVER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(ENV_API_URL) {
            config.api_url =
                Url::parse(&url).with_context(|| format!("Invalid {}: {}", ENV_API_URL, url))?;
        }
        if let Ok(lang) = std::env::var(ENV_LANG) {
            config.language = lang.parse()?;
        }
        if let Some(ms) = env_u64(ENV_LOGIN_SETTLE_MS)? {
            config.login_settle_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64(ENV_LOGIN_GRACE_MS)? {
            config.login_grace_period = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64(ENV_REQUEST_TIMEOUT_SECS)? {
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_login_timing(mut self, settle: Duration, grace: Duration) -> Self {
        self.login_settle_delay = settle;
        self.login_grace_period = grace;
        self
    }

    /// Append a backend path (e.g. `/api/schedule`) to the base URL. A path
    /// prefix on the base URL is kept.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.api_url.as_str().trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        Url::parse(&joined).with_context(|| format!("Invalid endpoint path: {}", path))
    }

    /// Directory holding the plain credential profile.
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: {}", name, value)),
        Err(_) => Ok(None),
    }
}
