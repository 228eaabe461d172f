//! Batch reconciliation of stored streams against provider catalogs

pub mod missing_checker;

pub use missing_checker::{MissingReport, MissingStreamChecker, ProviderCatalog, normalize_name, normalize_uri};
