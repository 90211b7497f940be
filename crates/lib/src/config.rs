//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.agentchat/config.json`) and environment.
//! A missing file means defaults: the agent service on localhost:8888.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{ConnectionConfig, ReconnectPolicy};

/// Top-level application config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Agent service endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect backoff for the agent WebSocket.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Status line behaviour.
    #[serde(default)]
    pub ui: UiConfig,
}

/// WebSocket and HTTP endpoints of the agent service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Agent WebSocket URL (default "ws://localhost:8888/ws/agent"). Overridden by AGENTCHAT_SERVER_URL.
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Base URL of the HTTP API (default "http://localhost:8888/api"). Overridden by AGENTCHAT_API_URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_server_url() -> String {
    "ws://localhost:8888/ws/agent".to_string()
}

fn default_api_base_url() -> String {
    crate::api::DEFAULT_API_BASE_URL.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// Backoff: delay = min(baseDelayMs * 2^(attempt-1), maxDelayMs); give up at maxAttempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    15
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    /// How long "Connected" stays visible after the socket opens (default 3000).
    #[serde(default = "default_connected_banner_ms")]
    pub connected_banner_ms: u64,
}

fn default_connected_banner_ms() -> u64 {
    3000
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            connected_banner_ms: default_connected_banner_ms(),
        }
    }
}

impl UiConfig {
    pub fn connected_banner(&self) -> Duration {
        Duration::from_millis(self.connected_banner_ms)
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the agent WebSocket URL: env AGENTCHAT_SERVER_URL overrides config.
pub fn resolve_server_url(config: &Config) -> String {
    env_override("AGENTCHAT_SERVER_URL").unwrap_or_else(|| config.server.url.trim().to_string())
}

/// Resolve the HTTP API base URL: env AGENTCHAT_API_URL overrides config.
pub fn resolve_api_base_url(config: &Config) -> String {
    env_override("AGENTCHAT_API_URL")
        .unwrap_or_else(|| config.server.api_base_url.trim().to_string())
}

/// Connection manager settings for this config (env overrides applied).
pub fn connection_config(config: &Config) -> ConnectionConfig {
    ConnectionConfig::new(resolve_server_url(config)).with_policy(config.reconnect.policy())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("AGENTCHAT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".agentchat").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or AGENTCHAT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
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
