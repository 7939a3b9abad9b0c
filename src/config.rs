use serde::Deserialize;
use std::time::Duration;

pub const ENV_BASE_URL: &str = "IGNITIA_BASE_URL";
pub const ENV_USERNAME: &str = "IGNITIA_USERNAME";
pub const ENV_PASSWORD: &str = "IGNITIA_PASSWORD";
pub const ENV_STORE: &str = "PROGRESSD_STORE";
pub const ENV_LOG_BODIES: &str = "PROGRESSD_LOG_BODIES";

/// Flat per-request timeout. A timeout fails the session like any other
/// transport error.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows requested per assignments page; the portal caps a course well below this.
pub const PAGE_SIZE: u32 = 1000;

pub fn user_agent() -> String {
    format!("progressd/{}", env!("CARGO_PKG_VERSION"))
}

/// Where to collect from and how to log it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Log JSON response bodies at debug level, not only error bodies.
    #[serde(default)]
    pub log_bodies: bool,
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            base_url: get(ENV_BASE_URL).unwrap_or_default(),
            username: get(ENV_USERNAME).unwrap_or_default(),
            password: get(ENV_PASSWORD).unwrap_or_default(),
            log_bodies: get(ENV_LOG_BODIES).map(|v| truthy(&v)).unwrap_or(false),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn is_configured(&self) -> bool {
        !self.base().is_empty()
    }

    /// Overlay the non-empty fields of `patch`.
    pub fn merge(&mut self, patch: PortalConfig) {
        if !patch.base_url.is_empty() {
            self.base_url = patch.base_url;
        }
        if !patch.username.is_empty() {
            self.username = patch.username;
        }
        if !patch.password.is_empty() {
            self.password = patch.password;
        }
        self.log_bodies = patch.log_bodies;
    }
}

/// Startup configuration for the sidecar.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub portal: PortalConfig,
    pub store: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            portal: PortalConfig::from_env(),
            store: std::env::var(ENV_STORE).ok().filter(|s| !s.trim().is_empty()),
        }
    }
}

/// `0`, `false`, `no`, `off` and empty are false; anything else is true.
pub fn truthy(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    !matches!(
        s.to_ascii_lowercase().as_str(),
        "0" | "false" | "f" | "no" | "n" | "off"
    )
}
