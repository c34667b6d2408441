use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::message::Platform;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Platform names to listen on (e.g. "telegram", "discord")
    #[serde(default = "default_enabled_platforms")]
    pub enabled_platforms: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled_platforms: default_enabled_platforms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Chat ids to listen to; empty means every chat the bot is in
    #[serde(default)]
    pub channel_ids: Vec<i64>,
    /// Sender ids to listen to; empty means everyone
    #[serde(default)]
    pub author_ids: Vec<u64>,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
}

impl ProxyConfig {
    /// Proxy url to use, if the proxy is switched on.
    pub fn url(&self) -> Option<&str> {
        if self.enabled {
            self.url.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_data_dir")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Directory for daily-rolling log files; stdout only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub download: DownloadStrategyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadStrategyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Author ids whose links are forwarded; empty trusts everyone
    #[serde(default)]
    pub trusted_author_ids: Vec<String>,
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,
}

impl Default for DownloadStrategyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trusted_author_ids: Vec::new(),
            queue_file: default_queue_file(),
        }
    }
}

fn default_enabled_platforms() -> Vec<String> {
    vec!["telegram".to_string()]
}

fn default_poll_timeout() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    5
}

fn default_multiplier() -> u32 {
    2
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_filter() -> String {
    "info,chatwatch=debug".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("data/downloads.jsonl")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                config
                    .telegram
                    .get_or_insert_with(TelegramConfig::default)
                    .bot_token = token;
            }
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        if self.reconnect.multiplier == 0 {
            anyhow::bail!("reconnect.multiplier must be at least 1");
        }
        if self.proxy.enabled && self.proxy.url.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("proxy.enabled is set but proxy.url is missing");
        }
        Ok(())
    }

    /// Enabled platforms in configured order. Unknown names are returned
    /// separately so the caller can report them.
    pub fn enabled_platforms(&self) -> (Vec<Platform>, Vec<String>) {
        let mut platforms = Vec::new();
        let mut unknown = Vec::new();
        for name in &self.general.enabled_platforms {
            match name.parse::<Platform>() {
                Ok(p) if !platforms.contains(&p) => platforms.push(p),
                Ok(_) => {}
                Err(_) => unknown.push(name.clone()),
            }
        }
        (platforms, unknown)
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_ids: Vec::new(),
            author_ids: Vec::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}
