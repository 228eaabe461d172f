//! Missing-stream detection
//!
//! A stored stream is missing when neither its URI nor its original name shows
//! up in the provider's current catalog. URIs are compared after normalization
//! so rotating tokens and signatures in the query string do not count as a
//! change.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use quick_xml::escape::unescape;
use tracing::{debug, info, warn};
use url::{Url, form_urlencoded};

use crate::config::SyncConfig;
use crate::database::CatalogStore;
use crate::errors::AppResult;
use crate::models::{MissingStream, ProviderStream, StreamRecord, UserId};

/// Query keys that change between catalog refreshes without the stream changing
const VOLATILE_QUERY_KEYS: [&str; 10] = [
    "token",
    "auth",
    "auth_token",
    "expires",
    "expiry",
    "exp",
    "signature",
    "sig",
    "hash",
    "key",
];

/// Collapse whitespace runs, trim and lowercase
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonical form of a stream URI for catalog comparison
///
/// Unparseable input comes back entity-decoded and trimmed but otherwise as-is.
pub fn normalize_uri(raw: &str) -> String {
    let raw = raw.trim();
    let decoded = match unescape(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    };
    let decoded = decoded.trim();
    if decoded.is_empty() {
        return String::new();
    }

    let url = match Url::parse(decoded) {
        Ok(url) if !url.cannot_be_a_base() => url,
        _ => return decoded.to_string(),
    };

    let mut out = format!("{}://", url.scheme().to_lowercase());
    if !url.username().is_empty() {
        out.push_str(url.username());
        if let Some(password) = url.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_lowercase());
    }
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    out.push('/');
    out.push_str(&segments.join("/"));

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !VOLATILE_QUERY_KEYS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Lookup sets built from a provider's current streams
#[derive(Debug, Default)]
pub struct ProviderCatalog {
    uris: HashSet<String>,
    names: HashSet<String>,
}

impl ProviderCatalog {
    pub fn from_streams(streams: &[ProviderStream]) -> Self {
        let mut catalog = Self::default();
        for stream in streams {
            if !stream.uri.is_empty() {
                catalog.uris.insert(stream.uri.clone());
                let normalized = normalize_uri(&stream.uri);
                if !normalized.is_empty() {
                    catalog.uris.insert(normalized);
                }
            }
            let name = normalize_name(&stream.name);
            if !name.is_empty() {
                catalog.names.insert(name);
            }
        }
        catalog
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty() && self.names.is_empty()
    }

    /// Whether a stored stream still exists, by exact URI, normalized URI or name
    pub fn contains(&self, stream: &StreamRecord) -> bool {
        if !stream.uri.is_empty() {
            if self.uris.contains(&stream.uri) {
                return true;
            }
            let normalized = normalize_uri(&stream.uri);
            if !normalized.is_empty() && self.uris.contains(&normalized) {
                return true;
            }
        }
        let name = normalize_name(&stream.name);
        !name.is_empty() && self.names.contains(&name)
    }
}

/// Result of checking one provider
#[derive(Debug, Default)]
pub struct MissingReport {
    pub scanned: usize,
    pub missing: Vec<StreamRecord>,
    /// Rows newly written; duplicates of earlier runs are not counted
    pub recorded: u64,
}

pub struct MissingStreamChecker {
    store: Arc<dyn CatalogStore>,
    page_size: u64,
    check_all: bool,
}

impl MissingStreamChecker {
    pub fn new(store: Arc<dyn CatalogStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            page_size: config.page_size.max(1),
            check_all: config.check_all,
        }
    }

    /// Compare the stored streams of one provider with its current catalog
    /// and record the ones that disappeared
    pub async fn check_provider(
        &self,
        user: UserId,
        provider_id: i64,
        current: &[ProviderStream],
    ) -> AppResult<MissingReport> {
        let catalog = ProviderCatalog::from_streams(current);
        if catalog.is_empty() {
            warn!(
                user_id = %user,
                provider_id,
                "Provider catalog is empty, skipping missing-stream check"
            );
            return Ok(MissingReport::default());
        }

        let mut report = MissingReport::default();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .stream_page(user, provider_id, !self.check_all, self.page_size, offset)
                .await?;
            let page_len = page.len();
            report.scanned += page_len;
            report
                .missing
                .extend(page.into_iter().filter(|stream| !catalog.contains(stream)));

            debug!(provider_id, offset, rows = page_len, "Scanned stream page");
            if (page_len as u64) < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        if !report.missing.is_empty() {
            let created_at = Utc::now();
            let records: Vec<MissingStream> = report
                .missing
                .iter()
                .map(|stream| MissingStream {
                    user_id: user,
                    provider_id,
                    stream_id: stream.id,
                    other_id: 0,
                    created_at,
                })
                .collect();
            report.recorded = self.store.record_missing(&records).await?;
        }

        info!(
            user_id = %user,
            provider_id,
            scanned = report.scanned,
            missing = report.missing.len(),
            recorded = report.recorded,
            "Missing-stream check complete"
        );
        Ok(report)
    }
}
