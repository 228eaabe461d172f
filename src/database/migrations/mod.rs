//! SeaORM migrations for the stream catalog
//!
//! The schema is database-agnostic and runs on SQLite, PostgreSQL and MySQL.

use sea_orm_migration::prelude::*;

pub mod m20251019_000001_initial_schema;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20251019_000001_initial_schema::Migration)]
    }
}
