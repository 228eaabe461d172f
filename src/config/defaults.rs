/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RELAY_PATH: &str = "/proxy/stream";

// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./iptv-relay.db?mode=rwc";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// EPG aggregation defaults
pub const DEFAULT_EPG_CONNECT_TIMEOUT: &str = "10s";
pub const DEFAULT_EPG_TIMEOUT: &str = "120s";
pub const DEFAULT_EPG_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_EPG_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_EPG_CACHE_MAX_AGE: &str = "1h";
pub const DEFAULT_GENERATOR_NAME: &str = "IPTV Relay";
pub const DEFAULT_EPG_OUTPUT_BUFFER: usize = 64;

// Live relay defaults
pub const DEFAULT_RELAY_CONNECT_TIMEOUT: &str = "5s";
pub const DEFAULT_RELAY_TIMEOUT: &str = "12s";
pub const DEFAULT_RELAY_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const DEFAULT_RELAY_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_MAX_URL_LENGTH: usize = 2048;
pub const DEFAULT_MAX_PLAYLIST_BYTES: usize = 5 * 1024 * 1024; // 5MB
pub const DEFAULT_CLIENT_BUFFER: usize = 32;

// Shared fetch defaults
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
pub const DEFAULT_VERIFY_TLS: bool = true;

// Missing-stream sync defaults
pub const DEFAULT_SYNC_PAGE_SIZE: u64 = 2000;
