//! Streaming upstream HTTP client
//!
//! One request per call. The response is never buffered here: status and the
//! allow-listed headers go to the sink first, then the body in chunks of at most
//! `chunk_size` bytes. The caller turns failures into client-visible statuses.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::errors::{UpstreamError, UpstreamResult};
use crate::proxy::sink::{ResponseSink, SinkControl};
use crate::proxy::target_validator::{HostResolver, PublicAddressResolver, is_blocked_literal_host};
use crate::utils::url::UrlUtils;

/// Upstream response headers that may reach a client
pub static PASSTHROUGH_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::ETAG,
    header::LAST_MODIFIED,
];

pub fn is_passthrough_header(name: &HeaderName) -> bool {
    PASSTHROUGH_HEADERS.contains(name)
}

/// 2xx and 3xx count as success; anything else is an upstream failure
pub fn is_success_status(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: FetchMethod,
    /// Forwarded request headers, e.g. `Range`
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: FetchMethod::Get,
            headers: HeaderMap::new(),
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: FetchMethod::Head,
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub status: StatusCode,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The whole body reached the sink
    Completed(FetchSummary),
    /// The sink stopped the transfer or the client disconnected
    Aborted(FetchSummary),
}

impl FetchOutcome {
    pub fn summary(&self) -> FetchSummary {
        match self {
            Self::Completed(summary) | Self::Aborted(summary) => *summary,
        }
    }

    pub fn is_success(&self) -> bool {
        is_success_status(self.summary().status)
    }
}

/// What the configured timeout bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// The whole exchange including the body
    Total,
    /// Waiting for the response head, then each body chunk separately
    Idle,
}

/// A lazy, finite, non-restartable sequence of body chunks
pub struct UpstreamBody {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    pending: Bytes,
    chunk_size: usize,
    idle_timeout: Option<Duration>,
    url: String,
}

impl UpstreamBody {
    fn new(response: reqwest::Response, chunk_size: usize, idle_timeout: Option<Duration>, url: String) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            pending: Bytes::new(),
            chunk_size: chunk_size.max(1),
            idle_timeout,
            url,
        }
    }

    /// Next chunk of at most `chunk_size` bytes, `None` at end of body
    pub async fn next_chunk(&mut self) -> UpstreamResult<Option<Bytes>> {
        loop {
            if !self.pending.is_empty() {
                let take = self.pending.len().min(self.chunk_size);
                return Ok(Some(self.pending.split_to(take)));
            }

            let next = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, self.stream.next())
                    .await
                    .map_err(|_| UpstreamError::Timeout {
                        url: self.url.clone(),
                    })?,
                None => self.stream.next().await,
            };

            match next {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => return Err(UpstreamError::from_reqwest(&self.url, &e)),
                None => return Ok(None),
            }
        }
    }
}

pub struct UpstreamClientBuilder {
    config: FetchConfig,
    timeout_scope: TimeoutScope,
    address_guard: Option<Arc<dyn HostResolver>>,
    pinned_hosts: Vec<(String, SocketAddr)>,
}

impl UpstreamClientBuilder {
    pub fn timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.timeout_scope = scope;
        self
    }

    /// Only ever connect to public addresses
    ///
    /// Host names are looked up through `resolver` at connection time and
    /// refused when any record is private; redirects to literal private
    /// addresses or `localhost` are refused before they are followed. System
    /// proxies are ignored, since a proxy would resolve names itself.
    pub fn public_only(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.address_guard = Some(resolver);
        self
    }

    /// Connect to `addr` whenever `host` is requested, bypassing DNS and the
    /// public address check
    pub fn pin_host(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.pinned_hosts.push((host.into(), addr));
        self
    }

    pub fn build(self) -> UpstreamResult<UpstreamClient> {
        let max_redirects = self.config.max_redirects;
        let guard_redirects = self.address_guard.is_some();
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.error("too many redirects")
            } else if !matches!(attempt.url().scheme(), "http" | "https") {
                attempt.error("redirect to unsupported scheme")
            } else if guard_redirects && is_blocked_literal_host(attempt.url()) {
                attempt.error("redirect to blocked host")
            } else {
                attempt.follow()
            }
        });

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .redirect(policy)
            .user_agent(self.config.user_agent.clone())
            .danger_accept_invalid_certs(!self.config.verify_tls)
            .gzip(self.config.decompress);

        if self.timeout_scope == TimeoutScope::Total {
            builder = builder.timeout(self.config.timeout);
        }
        if let Some(resolver) = &self.address_guard {
            builder = builder
                .no_proxy()
                .dns_resolver(Arc::new(PublicAddressResolver::new(Arc::clone(resolver))));
        }
        for (host, addr) in &self.pinned_hosts {
            builder = builder.resolve(host, *addr);
        }

        let client = builder
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(UpstreamClient {
            client,
            chunk_size: self.config.chunk_size,
            timeout: self.config.timeout,
            timeout_scope: self.timeout_scope,
        })
    }
}

/// Streaming HTTP client shared by the guide fetchers and the relay
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    chunk_size: usize,
    timeout: Duration,
    timeout_scope: TimeoutScope,
}

impl UpstreamClient {
    pub fn builder(config: &FetchConfig) -> UpstreamClientBuilder {
        UpstreamClientBuilder {
            config: config.clone(),
            timeout_scope: TimeoutScope::Total,
            address_guard: None,
            pinned_hosts: Vec::new(),
        }
    }

    pub fn new(config: &FetchConfig) -> UpstreamResult<Self> {
        Self::builder(config).build()
    }

    /// Send `request` and return the head plus an unread body
    pub async fn open(&self, request: FetchRequest) -> UpstreamResult<(UpstreamResponseHead, UpstreamBody)> {
        let display_url = UrlUtils::obfuscate_credentials(&request.url);
        let target = Url::parse(&request.url).map_err(|e| UpstreamError::Request {
            url: display_url.clone(),
            message: e.to_string(),
        })?;

        let builder = match request.method {
            FetchMethod::Get => self.client.get(target),
            FetchMethod::Head => self.client.head(target),
        }
        .headers(request.headers);

        debug!(url = %display_url, method = ?request.method, "Opening upstream request");

        let response = match self.timeout_scope {
            TimeoutScope::Total => builder.send().await,
            TimeoutScope::Idle => tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| UpstreamError::Timeout {
                    url: display_url.clone(),
                })?,
        }
        .map_err(|e| UpstreamError::from_reqwest(&display_url, &e))?;

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if is_passthrough_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        let head = UpstreamResponseHead {
            status: response.status(),
            headers,
        };

        let idle_timeout = match self.timeout_scope {
            TimeoutScope::Total => None,
            TimeoutScope::Idle => Some(self.timeout),
        };
        let body = UpstreamBody::new(response, self.chunk_size, idle_timeout, display_url);
        Ok((head, body))
    }

    /// Perform `request`, pushing the response into `sink`
    ///
    /// Transport errors are returned, never panicked on; an upstream error status
    /// is a successful fetch whose summary carries that status.
    pub async fn fetch_into<S>(&self, request: FetchRequest, sink: &mut S) -> UpstreamResult<FetchOutcome>
    where
        S: ResponseSink + ?Sized,
    {
        let (head, mut body) = self.open(request).await?;

        sink.on_status(head.status);
        for (name, value) in &head.headers {
            sink.on_header(name, value);
        }

        let mut summary = FetchSummary {
            status: head.status,
            bytes: 0,
        };
        if sink.on_head_complete().await == SinkControl::Abort {
            return Ok(FetchOutcome::Aborted(summary));
        }

        loop {
            if sink.is_cancelled() {
                debug!(bytes = summary.bytes, "Sink cancelled, abandoning upstream body");
                return Ok(FetchOutcome::Aborted(summary));
            }
            let Some(chunk) = body.next_chunk().await? else {
                break;
            };
            summary.bytes += chunk.len() as u64;
            if sink.write_chunk(chunk).await? == SinkControl::Abort {
                return Ok(FetchOutcome::Aborted(summary));
            }
        }

        sink.finish().await?;
        Ok(FetchOutcome::Completed(summary))
    }
}

/// Status and allow-listed headers of an opened response
#[derive(Debug, Clone)]
pub struct UpstreamResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}
