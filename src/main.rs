use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_relay::{
    auth::UserTokenCodec,
    config::{Config, SecurityConfig},
    database::Database,
    models::{ProviderStream, UserId},
    sync::MissingStreamChecker,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "iptv-relay")]
#[command(version)]
#[command(about = "Streaming EPG aggregation and live media relay for IPTV providers")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print an EPG user token for a user id
    Token {
        user_id: i64,
    },
    /// Record stored streams that no longer appear in a provider's catalog
    CheckMissing {
        user_id: i64,
        provider_id: i64,
        /// JSON array of `{"name": .., "uri": ..}` objects, the provider's current streams
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(cli: &Cli) {
    let log_filter = if cli.log_level == "trace" {
        format!("iptv_relay={},tower_http=trace", cli.log_level)
    } else {
        format!("iptv_relay={}", cli.log_level)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn token_codec(security: &SecurityConfig) -> Result<UserTokenCodec> {
    match &security.token_key {
        Some(key) => UserTokenCodec::from_hex(key).context("Invalid security.token_key"),
        None => {
            warn!("No security.token_key configured; using an ephemeral key, user tokens will not survive a restart");
            Ok(UserTokenCodec::ephemeral())
        }
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    let database = Database::new(&config.database).await?;
    if config.database.auto_migrate {
        database.migrate().await?;
    }
    info!("Database ready ({})", database.database_type());
    Ok(database)
}

async fn check_missing(config: &Config, user_id: i64, provider_id: i64, catalog: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(catalog)
        .await
        .with_context(|| format!("Failed to read catalog {}", catalog.display()))?;
    let streams: Vec<ProviderStream> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid catalog JSON in {}", catalog.display()))?;

    let database = open_database(config).await?;
    let checker = MissingStreamChecker::new(Arc::new(database.catalog_store()), &config.sync);
    let report = checker
        .check_provider(UserId(user_id), provider_id, &streams)
        .await?;

    println!(
        "scanned {} streams, {} missing, {} newly recorded",
        report.scanned,
        report.missing.len(),
        report.recorded
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    match cli.command {
        Some(Command::Token { user_id }) => {
            if config.security.token_key.is_none() {
                anyhow::bail!("security.token_key must be set to issue tokens that the server accepts");
            }
            let codec = token_codec(&config.security)?;
            println!("{}", codec.encode(UserId(user_id))?);
            return Ok(());
        }
        Some(Command::CheckMissing {
            user_id,
            provider_id,
            catalog,
        }) => return check_missing(&config, user_id, provider_id, &catalog).await,
        None => {}
    }

    info!("Starting IPTV Relay v{}", env!("CARGO_PKG_VERSION"));

    let database = open_database(&config).await?;
    let tokens = token_codec(&config.security)?;
    let state = AppState::new(config, database, tokens)?;
    let server = WebServer::new(state)?;
    server.serve().await.context("Web server failed")?;

    info!("Shut down cleanly");
    Ok(())
}
