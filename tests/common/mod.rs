//! Shared fixtures for the endpoint tests: an in-memory catalog, mock
//! upstream servers and application state wired for local targets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tokio::net::TcpListener;

use iptv_relay::{
    auth::UserTokenCodec,
    config::{Config, DatabaseConfig},
    database::Database,
    entities::{stream_providers, streams},
    models::UserId,
    proxy::{
        HostResolver, StreamRelay, TargetValidator, UpstreamClient,
        upstream::TimeoutScope,
    },
    web::{AppState, WebServer},
};

/// Address the mock hostnames resolve to during target validation
pub const PUBLIC_ADDR: &str = "93.184.216.34";

/// Host name that resolves to loopback, standing in for an internal service
pub const INTERNAL_HOST: &str = "intranet.test";

pub const TOKEN_KEY: [u8; 32] = [7; 32];

pub async fn test_database() -> Database {
    let database = Database::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        auto_migrate: true,
    })
    .await
    .expect("Failed to create test database");
    database.migrate().await.expect("Failed to run migrations");
    database
}

pub async fn add_provider(database: &Database, user: i64, domain: &str) -> i64 {
    stream_providers::ActiveModel {
        u_id: Set(user),
        sp_name: Set(format!("Provider {domain}")),
        sp_domain: Set(domain.to_string()),
        sp_username: Set("user".to_string()),
        sp_password: Set("pass".to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*database.connection())
    .await
    .expect("Failed to insert provider")
    .id
}

pub async fn add_stream(database: &Database, user: i64, provider: i64, tvg_id: &str, name: &str) -> i64 {
    streams::ActiveModel {
        u_id: Set(user),
        p_id: Set(provider),
        s_tvg_id: Set(Some(tvg_id.to_string())),
        s_name: Set(Some(name.to_string())),
        s_orig_name: Set(Some(name.to_string())),
        s_stream_uri: Set(format!("http://provider.example/live/{tvg_id}.ts")),
        s_active: Set(true),
        ..Default::default()
    }
    .insert(&*database.connection())
    .await
    .expect("Failed to insert stream")
    .id
}

/// Serve `router` on an ephemeral local port
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Resolver answering from a fixed table
pub struct StaticResolver(pub HashMap<String, Vec<IpAddr>>);

impl StaticResolver {
    pub fn public(hosts: &[&str]) -> Arc<Self> {
        let addr: IpAddr = PUBLIC_ADDR.parse().unwrap();
        Arc::new(Self(
            hosts
                .iter()
                .map(|host| (host.to_string(), vec![addr]))
                .collect(),
        ))
    }
}

impl StaticResolver {
    /// `hosts` resolve publicly and [`INTERNAL_HOST`] to loopback
    pub fn with_internal(hosts: &[&str]) -> Arc<Self> {
        let mut table = Self::public(hosts).0.clone();
        table.insert(INTERNAL_HOST.to_string(), vec![IpAddr::from([127, 0, 0, 1])]);
        Arc::new(Self(table))
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        self.0
            .get(host)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"))
    }
}

pub fn token_codec() -> UserTokenCodec {
    UserTokenCodec::new(&TOKEN_KEY).unwrap()
}

pub fn user_token(user: i64) -> String {
    token_codec().encode(UserId(user)).unwrap()
}

pub fn app_state(config: Config, database: Database) -> AppState {
    AppState::new(config, database, token_codec()).expect("Failed to create app state")
}

/// State whose relay treats `host` as public and connects it to `upstream`
///
/// Any other name, [`INTERNAL_HOST`] included, goes through the same public
/// address check the production relay applies.
pub fn relay_state(config: Config, database: Database, host: &str, upstream: SocketAddr) -> AppState {
    let resolver = StaticResolver::with_internal(&[host]);
    let validator = TargetValidator::new(&config.relay).with_resolver(resolver.clone());
    let client = UpstreamClient::builder(&config.relay.fetch)
        .timeout_scope(TimeoutScope::Idle)
        .public_only(resolver)
        .pin_host(host, upstream)
        .build()
        .unwrap();
    let relay = StreamRelay::from_parts(validator, client, &config);

    let mut state = app_state(config, database);
    state.relay = Arc::new(relay);
    state
}

pub fn test_server(state: AppState) -> TestServer {
    TestServer::new(WebServer::create_router(state)).unwrap()
}
