//! Small shared helpers

pub mod url;

pub use url::UrlUtils;
