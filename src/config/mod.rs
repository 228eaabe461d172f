use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::parse_default;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "IPTV_RELAY_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Same-origin path that rewritten playlists point back at
    #[serde(default = "default_relay_path")]
    pub relay_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Hex-encoded 32 byte key for user tokens. Generated per process when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_key: Option<String>,
}

/// Settings for one class of upstream request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(with = "duration_serde::duration")]
    pub connect_timeout: Duration,
    /// Total budget for the request including the body
    #[serde(with = "duration_serde::duration")]
    pub timeout: Duration,
    pub max_redirects: usize,
    pub verify_tls: bool,
    pub user_agent: String,
    /// Transparently decode compressed responses
    pub decompress: bool,
    /// Size of the chunks handed to sinks
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgConfig {
    #[serde(default = "default_epg_fetch")]
    pub fetch: FetchConfig,
    #[serde(default = "default_epg_cache_max_age", with = "duration_serde::duration")]
    pub cache_max_age: Duration,
    #[serde(default = "default_generator_name")]
    pub generator_name: String,
    /// Directory for spilled guide documents; the system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_dir: Option<PathBuf>,
    /// Merged fragments buffered ahead of a slow client
    #[serde(default = "default_epg_output_buffer")]
    pub output_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_fetch")]
    pub fetch: FetchConfig,
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,
    /// Exact hosts the relay may contact. Empty permits any public host.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_max_playlist_bytes")]
    pub max_playlist_bytes: usize,
    /// Chunks buffered between the upstream reader and the client
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_page_size")]
    pub page_size: u64,
    /// Scan inactive streams as well
    #[serde(default)]
    pub check_all: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_relay_path() -> String {
    DEFAULT_RELAY_PATH.to_string()
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_true() -> bool {
    true
}

fn default_epg_fetch() -> FetchConfig {
    FetchConfig {
        connect_timeout: parse_default(DEFAULT_EPG_CONNECT_TIMEOUT),
        timeout: parse_default(DEFAULT_EPG_TIMEOUT),
        max_redirects: DEFAULT_MAX_REDIRECTS,
        verify_tls: DEFAULT_VERIFY_TLS,
        user_agent: DEFAULT_EPG_USER_AGENT.to_string(),
        decompress: true,
        chunk_size: DEFAULT_EPG_CHUNK_SIZE,
    }
}

fn default_epg_cache_max_age() -> Duration {
    parse_default(DEFAULT_EPG_CACHE_MAX_AGE)
}

fn default_generator_name() -> String {
    DEFAULT_GENERATOR_NAME.to_string()
}

fn default_epg_output_buffer() -> usize {
    DEFAULT_EPG_OUTPUT_BUFFER
}

fn default_relay_fetch() -> FetchConfig {
    FetchConfig {
        connect_timeout: parse_default(DEFAULT_RELAY_CONNECT_TIMEOUT),
        timeout: parse_default(DEFAULT_RELAY_TIMEOUT),
        max_redirects: DEFAULT_MAX_REDIRECTS,
        verify_tls: DEFAULT_VERIFY_TLS,
        user_agent: DEFAULT_RELAY_USER_AGENT.to_string(),
        decompress: false,
        chunk_size: DEFAULT_RELAY_CHUNK_SIZE,
    }
}

fn default_max_url_length() -> usize {
    DEFAULT_MAX_URL_LENGTH
}

fn default_max_playlist_bytes() -> usize {
    DEFAULT_MAX_PLAYLIST_BYTES
}

fn default_client_buffer() -> usize {
    DEFAULT_CLIENT_BUFFER
}

fn default_sync_page_size() -> u64 {
    DEFAULT_SYNC_PAGE_SIZE
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            relay_path: default_relay_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            auto_migrate: true,
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            fetch: default_epg_fetch(),
            cache_max_age: default_epg_cache_max_age(),
            generator_name: default_generator_name(),
            spill_dir: None,
            output_buffer: default_epg_output_buffer(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            fetch: default_relay_fetch(),
            max_url_length: default_max_url_length(),
            allowed_domains: Vec::new(),
            max_playlist_bytes: default_max_playlist_bytes(),
            client_buffer: default_client_buffer(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_sync_page_size(),
            check_all: false,
        }
    }
}

impl Config {
    /// Load configuration layered as defaults, then `config_file`, then `IPTV_RELAY_*`
    /// environment variables. A default file is written when `config_file` is missing.
    pub fn load_from_file(config_file: impl AsRef<Path>) -> Result<Self> {
        let config_file = config_file.as_ref();
        if !config_file.exists() {
            let contents = toml::to_string_pretty(&Self::default())
                .context("Failed to render default configuration")?;
            std::fs::write(config_file, contents).with_context(|| {
                format!("Failed to write default config file {}", config_file.display())
            })?;
            info!("Created default config file: {}", config_file.display());
        }

        Self::figment(config_file)
            .extract()
            .with_context(|| format!("Invalid configuration in {}", config_file.display()))
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
