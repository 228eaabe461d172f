//! Live media relay
//!
//! Validates the target, then either fetches and rewrites an HLS playlist or
//! pipes the upstream body to the client in bounded chunks. The fetch runs on
//! its own task; dropping the response body closes the channel, which the
//! fetch loop sees as cancellation before the next chunk.

use std::sync::{Arc, OnceLock};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, response::Builder},
    response::Response,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{AppError, AppResult, UpstreamResult};
use crate::proxy::playlist::PlaylistRewriter;
use crate::proxy::sink::{BufferSink, ClientSink};
use crate::proxy::target_validator::{HostResolver, ParsedTarget, SystemResolver, TargetKind, TargetValidator};
use crate::proxy::upstream::{FetchOutcome, FetchRequest, TimeoutScope, UpstreamClient};
use crate::utils::url::UrlUtils;

pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";
const ALLOW_HEADERS: &str = "Range, Origin, Content-Type";
const PREFLIGHT_ALLOW_HEADERS: &str = "Range, Origin, Content-Type, Accept";
const EXPOSE_HEADERS: &str = "Content-Length, Content-Range";
const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const TRANSPORT_STREAM_CONTENT_TYPE: &str = "video/mp2t";
const PLAYLIST_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegURL, */*";

/// A `Range` header this relay will forward: `bytes=<start>-<end>(,<start>-<end>)*`
pub fn is_valid_range(value: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^bytes=\d*-\d*(,\d*-\d*)*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// The client's `Range` header, trimmed, when it is one this relay forwards
fn forwarded_range(headers: &HeaderMap) -> Option<HeaderValue> {
    let text = headers.get(header::RANGE)?.to_str().ok()?.trim();
    if !is_valid_range(text) {
        return None;
    }
    HeaderValue::from_str(text).ok()
}

pub struct StreamRelay {
    validator: TargetValidator,
    client: UpstreamClient,
    rewriter: PlaylistRewriter,
    max_playlist_bytes: usize,
    client_buffer: usize,
}

impl StreamRelay {
    pub fn new(config: &Config) -> UpstreamResult<Self> {
        let resolver: Arc<dyn HostResolver> = Arc::new(SystemResolver);
        let client = UpstreamClient::builder(&config.relay.fetch)
            .timeout_scope(TimeoutScope::Idle)
            .public_only(Arc::clone(&resolver))
            .build()?;
        Ok(Self::from_parts(
            TargetValidator::new(&config.relay).with_resolver(resolver),
            client,
            config,
        ))
    }

    /// Assemble a relay from an explicit validator and client
    pub fn from_parts(validator: TargetValidator, client: UpstreamClient, config: &Config) -> Self {
        Self {
            validator,
            client,
            rewriter: PlaylistRewriter::new(config.web.relay_path.clone()),
            max_playlist_bytes: config.relay.max_playlist_bytes,
            client_buffer: config.relay.client_buffer,
        }
    }

    /// Handle one relay request
    pub async fn handle(
        &self,
        method: &Method,
        raw_url: Option<&str>,
        request_headers: &HeaderMap,
    ) -> AppResult<Response> {
        let head_only = match *method {
            Method::OPTIONS => return Ok(preflight_response()),
            Method::GET => false,
            Method::HEAD => true,
            _ => return Err(AppError::method_not_allowed(method.as_str())),
        };

        let target = self
            .validator
            .validate(raw_url)
            .await
            .map_err(|rejection| {
                debug!(reason = ?rejection, "Relay target rejected");
                rejection.into_app_error()
            })?;

        match target.kind() {
            TargetKind::Playlist => self.relay_playlist(&target, head_only).await,
            TargetKind::TransportStream => {
                self.relay_stream(&target, head_only, request_headers, Some(TRANSPORT_STREAM_CONTENT_TYPE))
                    .await
            }
            TargetKind::Other => self.relay_stream(&target, head_only, request_headers, None).await,
        }
    }

    async fn relay_playlist(&self, target: &ParsedTarget, head_only: bool) -> AppResult<Response> {
        let display_url = UrlUtils::obfuscate_credentials(target.url.as_str());
        let request = if head_only {
            FetchRequest::head(target.url.as_str())
        } else {
            FetchRequest::get(target.url.as_str())
        }
        .with_header(header::ACCEPT, HeaderValue::from_static(PLAYLIST_ACCEPT));

        let mut sink = BufferSink::new(self.max_playlist_bytes);
        let outcome = self.client.fetch_into(request, &mut sink).await.map_err(|e| {
            warn!(url = %display_url, error = %e, "Playlist fetch failed");
            AppError::bad_gateway("Failed to fetch playlist")
        })?;

        if !outcome.is_success() {
            warn!(url = %display_url, status = outcome.summary().status.as_u16(), "Playlist upstream returned error status");
            return Err(AppError::bad_gateway("Failed to fetch playlist"));
        }
        if sink.overflowed() {
            warn!(url = %display_url, limit = self.max_playlist_bytes, "Playlist exceeds size limit");
            return Err(AppError::bad_gateway("Playlist too large"));
        }

        let builder = live_headers(Response::builder().status(StatusCode::OK))
            .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE);
        if head_only {
            return finish(builder, Body::empty());
        }

        let text = String::from_utf8_lossy(&sink.into_body()).into_owned();
        let rewritten = self.rewriter.rewrite(&text, &target.url);
        finish(builder, Body::from(rewritten))
    }

    async fn relay_stream(
        &self,
        target: &ParsedTarget,
        head_only: bool,
        request_headers: &HeaderMap,
        forced_content_type: Option<&'static str>,
    ) -> AppResult<Response> {
        let display_url = UrlUtils::obfuscate_credentials(target.url.as_str());
        let mut request = if head_only {
            FetchRequest::head(target.url.as_str())
        } else {
            FetchRequest::get(target.url.as_str())
        };
        if let Some(range) = forwarded_range(request_headers) {
            request = request.with_header(header::RANGE, range);
        }

        let (mut sink, stream) = ClientSink::channel(self.client_buffer, !head_only);
        let client = self.client.clone();
        let task_url = display_url.clone();
        tokio::spawn(async move {
            match client.fetch_into(request, &mut sink).await {
                Ok(FetchOutcome::Completed(summary)) => {
                    debug!(url = %task_url, bytes = summary.bytes, "Relay completed");
                }
                Ok(FetchOutcome::Aborted(summary)) => {
                    debug!(url = %task_url, bytes = summary.bytes, "Relay stopped early");
                }
                Err(e) => {
                    warn!(url = %task_url, error = %e, "Relay upstream failed");
                    sink.fail(e).await;
                }
            }
        });

        let head = match stream.head.await {
            Ok(Ok(head)) => head,
            Ok(Err(_)) => return Err(AppError::bad_gateway("Upstream error")),
            Err(_) => return Err(AppError::internal("relay task ended before a response head")),
        };

        let mut builder = live_headers(Response::builder().status(head.status));
        for (name, value) in &head.headers {
            if forced_content_type.is_some() && name == header::CONTENT_TYPE {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(content_type) = forced_content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        let body = if head_only {
            Body::empty()
        } else {
            Body::from_stream(stream.body)
        };
        finish(builder, body)
    }
}

/// CORS preflight answer for the relay endpoint
pub fn preflight_response() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, PREFLIGHT_ALLOW_HEADERS)
        .header(header::ACCESS_CONTROL_MAX_AGE, "86400")
        .header(header::CONTENT_LENGTH, "0")
        .body(Body::empty())
        .unwrap_or_default()
}

/// Permissive CORS plus no-cache directives for live content
fn live_headers(builder: Builder) -> Builder {
    builder
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS)
        .header(header::ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSE_HEADERS)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
}

fn finish(builder: Builder, body: Body) -> AppResult<Response> {
    builder
        .body(body)
        .map_err(|e| AppError::internal(format!("failed to build relay response: {e}")))
}
