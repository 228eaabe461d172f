//! SeaORM-based database access
//!
//! Provides the connection manager and the storage collaborator used by the
//! guide service and the missing-stream checker. SQLite, PostgreSQL and MySQL
//! URLs are accepted.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};

pub mod migrations;
pub mod repositories;

pub use repositories::{CatalogStore, SeaOrmCatalogStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    SQLite,
    PostgreSQL,
    MySQL,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "SQLite",
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Database connection manager
#[derive(Clone)]
pub struct Database {
    connection: Arc<DatabaseConnection>,
    database_type: DatabaseType,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> AppResult<Self> {
        let database_type = Self::detect_database_type(&config.url)?;
        info!("Connecting to {} database", database_type.as_str());

        let connection_url = match database_type {
            DatabaseType::SQLite => Self::ensure_sqlite_auto_creation(&config.url)?,
            _ => config.url.clone(),
        };

        let mut connect_options = ConnectOptions::new(connection_url);
        connect_options
            .max_connections(config.max_connections.max(1))
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .sqlx_logging(false);

        let connection = match SeaOrmDatabase::connect(connect_options).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Database connection failed: {:?}", e);
                let mut source = e.source();
                let mut level = 0;
                while let Some(err) = source {
                    error!("  Level {}: {}", level, err);
                    source = err.source();
                    level += 1;
                }
                return Err(e.into());
            }
        };

        debug!("Database connection established");
        Ok(Self {
            connection: Arc::new(connection),
            database_type,
        })
    }

    fn detect_database_type(url: &str) -> AppResult<DatabaseType> {
        if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("mysql:") {
            Ok(DatabaseType::MySQL)
        } else {
            Err(AppError::configuration(format!(
                "Unsupported database URL format: {url}"
            )))
        }
    }

    /// Add `mode=rwc` to file-backed SQLite URLs whose file does not exist yet
    fn ensure_sqlite_auto_creation(url: &str) -> AppResult<String> {
        if url.contains("mode=") || url.contains(":memory:") {
            return Ok(url.to_string());
        }

        let file_path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| AppError::configuration(format!("Invalid SQLite URL format: {url}")))?;
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        let path = std::path::Path::new(file_path);
        if path.exists() {
            return Ok(url.to_string());
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::configuration(format!(
                    "Failed to create directory for SQLite database {}: {e}",
                    parent.display()
                ))
            })?;
            info!("Created directory for SQLite database: {}", parent.display());
        }

        let separator = if url.contains('?') { '&' } else { '?' };
        Ok(format!("{url}{separator}mode=rwc"))
    }

    pub async fn migrate(&self) -> AppResult<()> {
        info!("Running database migrations for {}", self.database_type);
        migrations::Migrator::up(&*self.connection, None).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Round-trip a trivial statement, used by the health endpoint
    pub async fn ping(&self) -> AppResult<()> {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.connection.clone()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Storage collaborator backed by this connection
    pub fn catalog_store(&self) -> SeaOrmCatalogStore {
        SeaOrmCatalogStore::new(self.connection.clone())
    }
}
