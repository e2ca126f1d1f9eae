use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub update: UpdateConfig,
    /// Network proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Overrides where the update store and bundles live
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

pub const DEFAULT_CHECK_PATH: &str = "/downloaddata/resourcesdownload";
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Update endpoint and timing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateConfig {
    /// Backend base URL, e.g. `https://api.example.com`
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Path of the "latest bundle" descriptor below `api_url`
    #[serde(default = "default_check_path")]
    pub check_path: String,
    /// URL used by the reachability probe; defaults to `api_url`
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Pause between install and relaunch
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Cancel a download that reports nothing for this long (0 disables)
    #[serde(default)]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub install_after_download: bool,
    /// Run the pending-update recovery and check on startup
    #[serde(default = "default_true")]
    pub check_on_launch: bool,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_check_path() -> String {
    DEFAULT_CHECK_PATH.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_true() -> bool {
    true
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            check_path: default_check_path(),
            probe_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            stall_timeout_secs: 0,
            install_after_download: true,
            check_on_launch: true,
        }
    }
}

impl UpdateConfig {
    /// Full URL of the "latest bundle" descriptor
    pub fn check_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            self.check_path.trim_start_matches('/')
        )
    }

    pub fn probe_url(&self) -> String {
        self.probe_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.api_url.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

/// Network proxy configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Enable proxy
    #[serde(default)]
    pub enabled: bool,
    /// Proxy type: http, https, socks5
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    /// Proxy host
    #[serde(default)]
    pub host: String,
    /// Proxy port
    #[serde(default)]
    pub port: u16,
    /// Username for proxy authentication
    #[serde(default)]
    pub username: String,
    /// Password for proxy authentication
    #[serde(default)]
    pub password: String,
}

fn default_proxy_type() -> String {
    "http".to_string()
}

impl ProxyConfig {
    /// Proxy URL for the HTTP clients, `None` when disabled
    pub fn to_proxy_url(&self) -> Option<String> {
        if !self.enabled || self.host.is_empty() {
            return None;
        }

        let auth = if !self.username.is_empty() {
            format!("{}:{}@", self.username, self.password)
        } else {
            String::new()
        };

        Some(format!(
            "{}://{}{}:{}",
            self.proxy_type, auth, self.host, self.port
        ))
    }
}
