//! Service configuration
//!
//! Loaded from an optional JSON file, then overridden by `FLIZO_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://track.flizo.app";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {name}")]
    InvalidVar { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// Base URL of the remote tracking API
    pub api_url: String,
    pub bind: SocketAddr,
    pub poll_interval_secs: u64,
    /// Wall-clock length of a full playback at 1x
    pub playback_duration_secs: u64,
    /// Serve the synthetic fleet instead of talking to `api_url`
    pub demo: bool,
    /// Where remembered sessions are kept; platform data dir when unset
    pub session_file: Option<PathBuf>,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 9100)),
            poll_interval_secs: 10,
            playback_duration_secs: 60,
            demo: false,
            session_file: None,
        }
    }
}

impl CopilotConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("flizo-copilot").join("config.json"))
    }

    /// File named by `FLIZO_CONFIG` (or the default path, if present), then env
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("FLIZO_CONFIG").map(PathBuf::from);
        let mut config = match explicit.or_else(Self::default_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FLIZO_*` overrides looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = var("FLIZO_API_URL") {
            self.api_url = url;
        }
        if let Some(bind) = var("FLIZO_BIND") {
            self.bind = parse_var("FLIZO_BIND", &bind)?;
        }
        if let Some(secs) = var("FLIZO_POLL_SECS") {
            self.poll_interval_secs = parse_positive("FLIZO_POLL_SECS", &secs)?;
        }
        if let Some(secs) = var("FLIZO_PLAYBACK_SECS") {
            self.playback_duration_secs = parse_positive("FLIZO_PLAYBACK_SECS", &secs)?;
        }
        if let Some(flag) = var("FLIZO_DEMO") {
            self.demo = match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "FLIZO_DEMO",
                        value: flag,
                    })
                }
            };
        }
        if let Some(path) = var("FLIZO_SESSION_FILE") {
            self.session_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn playback_duration(&self) -> Duration {
        Duration::from_secs(self.playback_duration_secs.max(1))
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name,
        value: value.to_string(),
    })
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse_var::<u64>(name, value)? {
        0 => Err(ConfigError::InvalidVar {
            name,
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}
