//! HLS playlist rewriting
//!
//! Every media or variant reference becomes a same-origin relay URL so that
//! follow-up fetches come back through the proxy. Directives, comments and blank
//! lines pass through, and the output always has one line per input line.

use url::Url;

#[derive(Debug, Clone)]
pub struct PlaylistRewriter {
    relay_path: String,
}

impl PlaylistRewriter {
    /// `relay_path` is the path rewritten references point at, e.g. `/proxy/stream`
    pub fn new(relay_path: impl Into<String>) -> Self {
        Self {
            relay_path: relay_path.into(),
        }
    }

    pub fn rewrite(&self, playlist: &str, origin: &Url) -> String {
        playlist
            .split('\n')
            .map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    line.to_string()
                } else {
                    self.relay_reference(&resolve_reference(line, origin))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Relay URL carrying `absolute` as its `url` parameter
    pub fn relay_reference(&self, absolute: &str) -> String {
        format!("{}?url={}", self.relay_path, urlencoding::encode(absolute))
    }
}

/// Resolve a playlist reference against the playlist's own URL
///
/// `//host/x` takes the playlist's scheme, `/x` its scheme and authority, and a
/// bare `x` its directory. Absolute URLs are returned unchanged.
pub fn resolve_reference(reference: &str, origin: &Url) -> String {
    if let Ok(absolute) = Url::parse(reference)
        && absolute.has_host()
    {
        return reference.to_string();
    }
    match origin.join(reference) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => {
            let path = origin.path();
            let directory = &path[..path.rfind('/').map_or(0, |i| i + 1)];
            format!("{}{}{}", origin.origin().ascii_serialization(), directory, reference)
        }
    }
}
