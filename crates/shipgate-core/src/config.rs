use crate::error::{Result, ShipgateError};
use crate::poll::PollPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory when no path is given.
pub const CONFIG_FILE: &str = "shipgate.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PollConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    15_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            timeout_secs: default_timeout_secs(),
            max_attempts: None,
        }
    }
}

impl PollConfig {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the story/analysis service.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_api_base() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll: PollConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load from an explicit path. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShipgateError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise `shipgate.yaml` in `dir` if present,
    /// otherwise defaults.
    pub fn resolve(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let fallback = Self::default_path(dir);
                if fallback.exists() {
                    Self::load(&fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll.to_policy()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Report values that load fine but make no sense. Errors make the
    /// service unusable; warnings only degrade it.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !is_http_url(&self.api_base) {
            warnings.push(ConfigWarning::error(format!(
                "api_base '{}' is not an http(s) URL",
                self.api_base
            )));
        }
        if self.request_timeout_secs == 0 {
            warnings.push(ConfigWarning::error("request_timeout_secs must be > 0"));
        }
        if self.connect_timeout_secs == 0 {
            warnings.push(ConfigWarning::error("connect_timeout_secs must be > 0"));
        }

        let poll = &self.poll;
        if poll.initial_interval_ms == 0 {
            warnings.push(ConfigWarning::error("poll.initial_interval_ms must be > 0"));
        }
        if poll.max_interval_ms < poll.initial_interval_ms {
            warnings.push(ConfigWarning::warning(format!(
                "poll.max_interval_ms ({}) is below poll.initial_interval_ms ({}); \
                 the initial interval will be used throughout",
                poll.max_interval_ms, poll.initial_interval_ms
            )));
        }
        if !poll.multiplier.is_finite() || poll.multiplier < 1.0 {
            warnings.push(ConfigWarning::warning(format!(
                "poll.multiplier {} is below 1.0; polling will use a fixed interval",
                poll.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&poll.jitter) {
            warnings.push(ConfigWarning::warning(format!(
                "poll.jitter {} is outside [0, 1] and will be clamped",
                poll.jitter
            )));
        }
        if poll.timeout_secs == 0 {
            warnings.push(ConfigWarning::error(
                "poll.timeout_secs is 0; every run would time out immediately",
            ));
        }
        if poll.max_attempts == Some(0) {
            warnings.push(ConfigWarning::error(
                "poll.max_attempts is 0; every run would time out immediately",
            ));
        }
        if self.server.port == 0 {
            warnings.push(ConfigWarning::warning(
                "server.port is 0; an ephemeral port will be chosen",
            ));
        }

        warnings
    }
}

fn is_http_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.starts_with('/'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
