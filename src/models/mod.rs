//! Typed records shared between storage, the guide pipeline and the sync job.
//!
//! Rows are converted into these at the storage boundary so nothing above it
//! deals with loosely-typed columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::url::UrlUtils;

/// Numeric user identifier carried (encrypted) in EPG URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials and base URL of one upstream provider
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub id: i64,
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl ProviderEndpoint {
    /// Xtream-style guide document URL for this provider
    pub fn guide_url(&self) -> String {
        UrlUtils::build_xmltv_url(&self.domain, &self.username, &self.password)
    }
}

impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Identifying fields of an active stream, used to build the allow-set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCatalogEntry {
    pub tvg_id: Option<String>,
    pub name: Option<String>,
    pub orig_name: Option<String>,
}

/// Stored stream row as seen by the missing-stream checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: i64,
    pub name: String,
    pub uri: String,
}

/// A stream offered by a provider right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStream {
    pub name: String,
    pub uri: String,
}

/// A stored stream that no longer appears in its provider's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingStream {
    pub user_id: UserId,
    pub provider_id: i64,
    pub stream_id: i64,
    pub other_id: i64,
    pub created_at: DateTime<Utc>,
}
