use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::Endpoint;
use crate::services::directory::ResolutionStrategy;
use crate::stream::config::StreamingSettings;
use crate::stream::range_fetcher::StreamAddressing;
use crate::stream::retry::RetryPolicy;

/// Environment variable holding a comma separated server list
pub const SERVERS_ENV: &str = "RANGEPLAY_SERVERS";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Candidate servers in preference order
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Cheap endpoint probed with HEAD for liveness
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub strategy: ResolutionStrategy,

    /// Port used for streamer nodes that only report an IP
    #[serde(default = "default_streamer_port")]
    pub streamer_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingConfig {
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: u32,

    /// Remaining buffered seconds below which the next chunk is prefetched
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark_secs: f64,

    #[serde(default)]
    pub addressing: StreamAddressing,

    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    /// Bitrate assumed when the catalog does not report a duration
    #[serde(default = "default_bitrate_kbps")]
    pub fallback_bitrate_kbps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_servers() -> Vec<String> {
    vec![
        "http://127.0.0.1:8000".to_string(),
        "http://127.0.0.1:8080".to_string(),
    ]
}

fn default_probe_path() -> String {
    "/api/songs/".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_streamer_port() -> u16 {
    8000
}

fn default_chunk_size_kb() -> u32 {
    512
}

fn default_low_water_mark() -> f64 {
    5.0
}

fn default_mime_type() -> String {
    "audio/mpeg".to_string()
}

fn default_bitrate_kbps() -> u32 {
    128
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            probe_path: default_probe_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            streamer_port: default_streamer_port(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: default_chunk_size_kb(),
            low_water_mark_secs: default_low_water_mark(),
            addressing: StreamAddressing::default(),
            mime_type: default_mime_type(),
            fallback_bitrate_kbps: default_bitrate_kbps(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the compiled-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded from {:?}", config_path);
            Ok(config)
        } else {
            info!("No config file at {:?}, using defaults", config_path);
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("rangeplay").join("config.toml"))
    }

    /// Replace the server list with `RANGEPLAY_SERVERS` when it is set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(SERVERS_ENV) {
            self.apply_server_override(&value);
        }
    }

    fn apply_server_override(&mut self, value: &str) {
        let servers: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if !servers.is_empty() {
            info!("Using {} servers from {}", servers.len(), SERVERS_ENV);
            self.network.servers = servers;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.servers.is_empty() {
            return Err(anyhow!("network.servers must list at least one server"));
        }

        for server in &self.network.servers {
            Endpoint::parse(server)?;
        }

        if self.network.probe_timeout_ms == 0 {
            return Err(anyhow!("network.probe_timeout_ms must be greater than 0"));
        }

        if !self.network.probe_path.starts_with('/') {
            return Err(anyhow!("network.probe_path must start with '/'"));
        }

        if self.streaming.chunk_size_kb == 0 {
            return Err(anyhow!("streaming.chunk_size_kb must be greater than 0"));
        }

        if !(self.streaming.low_water_mark_secs > 0.0) {
            return Err(anyhow!(
                "streaming.low_water_mark_secs must be greater than 0"
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!(
                "retry.base_delay_ms must not exceed retry.max_delay_ms"
            ));
        }

        Ok(())
    }

    /// Parsed candidate list, in preference order
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.network
            .servers
            .iter()
            .map(|s| Endpoint::parse(s).map_err(Into::into))
            .collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.network.probe_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
        )
    }

    pub fn streaming_settings(&self) -> StreamingSettings {
        StreamingSettings {
            chunk_size: u64::from(self.streaming.chunk_size_kb) * 1024,
            low_water_mark_secs: self.streaming.low_water_mark_secs,
            mime_type: self.streaming.mime_type.clone(),
            addressing: self.streaming.addressing,
            fallback_bitrate_kbps: self.streaming.fallback_bitrate_kbps,
            retry: self.retry_policy(),
        }
    }
}
