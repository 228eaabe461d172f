//! Centralized error handling for the IPTV relay
//!
//! Every layer reports failures through a typed error; the web layer maps
//! [`AppError`] onto HTTP status codes in one place.
//!
//! # Error Categories
//!
//! - **Upstream Errors**: transport failures talking to a provider or media host
//! - **Target Rejections**: relay targets refused by the SSRF guard
//! - **Token Errors**: opaque user tokens that cannot be decoded
//! - **Database Errors**: storage collaborator failures
//!
//! # Usage
//!
//! ```rust
//! use iptv_relay::errors::{AppError, AppResult};
//!
//! fn provider_id(raw: &str) -> AppResult<i64> {
//!     raw.parse().map_err(|_| AppError::unauthorized("provider id is not numeric"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for upstream fetch results
pub type UpstreamResult<T> = Result<T, UpstreamError>;
