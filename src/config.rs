//! Configuration loaded from `config.toml`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Environment variable that overrides `telegram.bot_token`
pub const BOT_TOKEN_ENV: &str = "PANEBRIDGE_BOT_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub hook: HookConfig,
    pub bridge: BridgeConfig,
    /// Per-agent process pattern overrides, keyed by agent name
    pub agents: HashMap<String, AgentPatternConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Only updates from this user are served
    pub owner_id: i64,
    /// Chat to talk to before anyone sends `/start`
    pub chat_id: Option<i64>,
    pub api_base: String,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_id: 0,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub bind: SocketAddr,
    /// Shared secret expected in the `x-panebridge-secret` header. Empty disables the check.
    pub secret: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7373)),
            secret: String::new(),
        }
    }
}

/// Tunables for the bridge core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub scan_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub pending_ttl_secs: u64,
    pub max_pending: usize,
    pub identity_cache_size: usize,
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
    pub key_delay_ms: u64,
    pub submit_gap_ms: u64,
    pub send_retries: u32,
    pub retry_delay_ms: u64,
    pub max_message_len: usize,
    pub question_advance_ms: u64,
    /// Regex over captured pane text that marks an agent menu as ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_pattern: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
            sweep_interval_secs: 30,
            pending_ttl_secs: 600,
            max_pending: 50,
            identity_cache_size: 100,
            ready_timeout_ms: 5000,
            ready_poll_ms: 150,
            key_delay_ms: 30,
            submit_gap_ms: 150,
            send_retries: 2,
            retry_delay_ms: 300,
            max_message_len: 10_000,
            question_advance_ms: 500,
            ready_pattern: None,
        }
    }
}

impl BridgeConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    pub fn submit_gap(&self) -> Duration {
        Duration::from_millis(self.submit_gap_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn question_advance(&self) -> Duration {
        Duration::from_millis(self.question_advance_ms)
    }
}

/// Overrides for how an agent process is recognized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPatternConfig {
    pub process_pattern: Option<String>,
    pub idle_exclude_pattern: Option<String>,
}

impl Config {
    /// Default location: `<config_dir>/panebridge/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("panebridge")
            .join("config.toml")
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };

        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.is_empty() {
                config.telegram.bot_token = token;
            }
        }

        Ok(config)
    }

    /// Fail early on settings the bridge cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(BridgeError::Config(format!(
                "telegram.bot_token is not set (or export {BOT_TOKEN_ENV})"
            )));
        }
        if self.telegram.owner_id == 0 {
            return Err(BridgeError::Config("telegram.owner_id is not set".to_string()));
        }
        if self.bridge.max_pending == 0 {
            return Err(BridgeError::Config("bridge.max_pending must be positive".to_string()));
        }
        if let Some(pattern) = &self.bridge.ready_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                BridgeError::Config(format!("bridge.ready_pattern is not a valid regex: {e}"))
            })?;
        }
        Ok(())
    }
}
