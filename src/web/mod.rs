//! Web layer
//!
//! Thin axum handlers over the guide service and the stream relay. Errors are
//! mapped to HTTP responses in one place (`responses`), and every request goes
//! through the logging middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::{any, get},
};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use crate::auth::UserTokenCodec;
use crate::config::Config;
use crate::database::Database;
use crate::epg::GuideService;
use crate::errors::{AppError, AppResult};
use crate::proxy::StreamRelay;

pub mod handlers;
pub mod middleware;
pub mod responses;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Database,
    pub tokens: UserTokenCodec,
    pub guides: GuideService,
    pub relay: Arc<StreamRelay>,
}

impl AppState {
    /// Wire the services for `config` on top of an open database
    pub fn new(config: Config, database: Database, tokens: UserTokenCodec) -> AppResult<Self> {
        let store = Arc::new(database.catalog_store());
        let guides = GuideService::new(store, &config.epg)?;
        let relay = StreamRelay::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            database,
            tokens,
            guides,
            relay: Arc::new(relay),
        })
    }
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> AppResult<Self> {
        let addr: SocketAddr = format!("{}:{}", state.config.web.host, state.config.web.port)
            .parse()
            .map_err(|e| AppError::configuration(format!("Invalid listen address: {e}")))?;
        Ok(Self {
            app: Self::create_router(state),
            addr,
        })
    }

    /// Router with all routes and middleware
    pub fn create_router(state: AppState) -> Router {
        let relay_path = state.config.web.relay_path.clone();
        Router::new()
            .route("/health", get(handlers::health::health_check))
            .route("/epg/{user}", get(handlers::epg::all_providers_epg))
            .route("/epg/{user}/{provider}", get(handlers::epg::single_provider_epg))
            .route("/xmltv.php", get(handlers::epg::xmltv_epg))
            // Method gate lives in the relay so OPTIONS and 405 get its headers
            .route(&relay_path, any(handlers::stream::relay_stream))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ))
            .layer(axum::middleware::from_fn(middleware::request_logging_middleware))
            .with_state(state)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until Ctrl-C or SIGTERM, letting in-flight requests finish
    pub async fn serve(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
