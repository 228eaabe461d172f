//! Error type definitions for the IPTV relay
//!
//! A small hierarchy: subsystem errors ([`UpstreamError`], [`TargetRejection`],
//! [`TokenError`]) convert into the top-level [`AppError`], which carries the
//! client-visible classification.

use thiserror::Error;

use crate::utils::url::UrlUtils;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid user/provider identifier
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// No matching provider/user record
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Every upstream fetch failed, or the single upstream did
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// A relayed upstream failed; `message` is shown to the client
    #[error("Bad gateway: {message}")]
    BadGateway { message: String },

    /// Malformed request; `message` is shown to the client
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Request target exceeds the configured length
    #[error("URI too long: {length} characters (max: {max})")]
    UriTooLong { length: usize, max: usize },

    /// Target is refused by policy; `message` is shown to the client
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Target rejected: {0}")]
    Target(#[from] TargetRejection),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// Transport-level failures of a single upstream request
///
/// These never terminate the process; callers decide which status the client sees.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    #[error("Connection failed: {url} - {message}")]
    Connect { url: String, message: String },

    /// Redirect loop, disallowed redirect target, or other request failure
    #[error("Request failed: {url} - {message}")]
    Request { url: String, message: String },

    /// Reading the body failed part way through
    #[error("Body read failed: {url} - {message}")]
    Body { url: String, message: String },

    /// The sink could not accept bytes (spill file write, buffer limit)
    #[error("Sink error: {message}")]
    Sink { message: String },

    #[error("Client setup failed: {0}")]
    Client(String),
}

/// Reasons the target validator refuses a relay URL, in check order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetRejection {
    #[error("No URL provided")]
    Missing,

    #[error("URL too long")]
    TooLong { length: usize, max: usize },

    #[error("Invalid URL")]
    Invalid,

    #[error("Unsupported URL scheme")]
    UnsupportedScheme { scheme: String },

    #[error("Credentials in URL are not allowed")]
    EmbeddedCredentials,

    #[error("Blocked target host")]
    BlockedHost { host: String },

    #[error("Domain not allowed")]
    DomainNotAllowed { host: String },
}

/// Failures reading one spilled guide document
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Unexpected end of document inside <{element}>")]
    Truncated { element: String },

    #[error("Undefined entity reference: {0}")]
    UndefinedEntity(String),
}

/// Opaque user token decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,

    #[error("token is too short")]
    Truncated,

    #[error("unsupported token version {0}")]
    Version(u8),

    #[error("token failed authentication")]
    Authentication,

    #[error("token payload is not a user id")]
    Payload,

    #[error("invalid token key: {0}")]
    Key(String),
}

/// Convenience methods for creating common error types
impl AppError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn upstream_unavailable<S: Into<String>>(message: S) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn bad_gateway<S: Into<String>>(message: S) -> Self {
        Self::BadGateway {
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn method_not_allowed<S: Into<String>>(method: S) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl UpstreamError {
    /// Classify a reqwest failure for `url`
    /// Classify a reqwest failure; `url` must already be safe to log
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        // reqwest renders the raw request URL into its messages
        let message = || UrlUtils::obfuscate_credentials(&err.to_string());
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            Self::Connect {
                url: url.to_string(),
                message: message(),
            }
        } else if err.is_body() || err.is_decode() {
            Self::Body {
                url: url.to_string(),
                message: message(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                message: message(),
            }
        }
    }

    pub fn sink<S: Into<String>>(message: S) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        Self::sink(err.to_string())
    }
}

impl TargetRejection {
    /// Client-visible classification of this rejection
    pub fn into_app_error(self) -> AppError {
        match self {
            Self::TooLong { length, max } => AppError::UriTooLong { length, max },
            Self::BlockedHost { .. } | Self::DomainNotAllowed { .. } => {
                AppError::forbidden(self.to_string())
            }
            _ => AppError::bad_request(self.to_string()),
        }
    }
}
