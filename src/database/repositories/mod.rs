//! Repository implementations backed by SeaORM

pub mod catalog;

pub use catalog::{CatalogStore, SeaOrmCatalogStore};
