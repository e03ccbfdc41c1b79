//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.sage/config.json`) and environment.
//! The saged endpoint itself comes from the project descriptor; `SAGE_ENDPOINT` overrides it.

use crate::project::Project;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PROJECT_FILE: &str = "project.json";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the project descriptor. Relative paths are resolved against the config
    /// file's parent. Default: `project.json` next to the config file.
    #[serde(default)]
    pub project: Option<PathBuf>,

    /// Connection behaviour of the remote control.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Reconnect and handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Fixed delay before reconnecting after a disconnect (default 1000). No backoff.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// How long one-shot commands wait for the connection to open (default 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a closing connection waits for saged's close reply (default 2000).
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_close_timeout_ms() -> u64 {
    2000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SAGE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".sage").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or SAGE_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the project descriptor path: `config.project` if set (relative paths resolved
/// against the config file's parent), otherwise `project.json` in the config directory.
pub fn resolve_project_path(config: &Config, config_path: &Path) -> PathBuf {
    let dir = config_dir(config_path);
    match &config.project {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                dir.join(p)
            }
        }
        _ => dir.join(DEFAULT_PROJECT_FILE),
    }
}

/// Resolve the saged endpoint: env SAGE_ENDPOINT overrides the project's `saged`.
pub fn resolve_endpoint(project: &Project) -> String {
    endpoint_or_override(std::env::var("SAGE_ENDPOINT").ok(), &project.saged)
}

fn endpoint_or_override(env: Option<String>, project_endpoint: &str) -> String {
    env.and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
    .unwrap_or_else(|| project_endpoint.trim().to_string())
}
