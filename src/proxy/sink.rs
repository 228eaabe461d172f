//! Write sinks for upstream responses
//!
//! The fetch client pushes status, allow-listed headers and body chunks into a
//! [`ResponseSink`]. A sink decides after every step whether the transfer should
//! continue, and is polled for cancellation before each chunk.

use std::io;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::errors::UpstreamError;

/// Flow control answer from a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Abort,
}

#[async_trait]
pub trait ResponseSink: Send {
    fn on_status(&mut self, _status: StatusCode) {}

    /// Receives only allow-listed upstream headers
    fn on_header(&mut self, _name: &HeaderName, _value: &HeaderValue) {}

    /// Status and headers are complete. `Abort` leaves the body unread.
    async fn on_head_complete(&mut self) -> SinkControl {
        SinkControl::Continue
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<SinkControl, UpstreamError>;

    /// Polled before every chunk; `true` stops reading upstream immediately
    fn is_cancelled(&self) -> bool {
        false
    }

    async fn finish(&mut self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// Status and headers of an upstream response
#[derive(Debug, Clone)]
pub struct UpstreamHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

pub type BodyChunk = Result<Bytes, io::Error>;

/// Receiving half of a [`ClientSink`]
pub struct ClientStream {
    pub head: oneshot::Receiver<Result<UpstreamHead, UpstreamError>>,
    pub body: ReceiverStream<BodyChunk>,
}

/// Forwards an upstream response to an HTTP client through bounded channels
///
/// The body channel closing (the client went away and the response body was
/// dropped) is the cancellation signal.
pub struct ClientSink {
    head: UpstreamHead,
    head_tx: Option<oneshot::Sender<Result<UpstreamHead, UpstreamError>>>,
    body_tx: mpsc::Sender<BodyChunk>,
    send_body: bool,
}

impl ClientSink {
    /// `buffer` bounds the chunks in flight; with `send_body = false` the body is never read
    pub fn channel(buffer: usize, send_body: bool) -> (Self, ClientStream) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(buffer.max(1));
        let sink = Self {
            head: UpstreamHead {
                status: StatusCode::BAD_GATEWAY,
                headers: HeaderMap::new(),
            },
            head_tx: Some(head_tx),
            body_tx,
            send_body,
        };
        let stream = ClientStream {
            head: head_rx,
            body: ReceiverStream::new(body_rx),
        };
        (sink, stream)
    }

    /// Report a failed fetch: before the head it becomes the head result,
    /// afterwards it terminates the body stream with an error.
    pub async fn fail(mut self, err: UpstreamError) {
        match self.head_tx.take() {
            Some(head_tx) => {
                let _ = head_tx.send(Err(err));
            }
            None => {
                let _ = self.body_tx.send(Err(io::Error::other(err.to_string()))).await;
            }
        }
    }
}

#[async_trait]
impl ResponseSink for ClientSink {
    fn on_status(&mut self, status: StatusCode) {
        self.head.status = status;
    }

    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.head.headers.append(name.clone(), value.clone());
    }

    async fn on_head_complete(&mut self) -> SinkControl {
        let Some(head_tx) = self.head_tx.take() else {
            return SinkControl::Abort;
        };
        if head_tx.send(Ok(self.head.clone())).is_err() {
            debug!("Client went away before upstream headers arrived");
            return SinkControl::Abort;
        }
        if self.send_body {
            SinkControl::Continue
        } else {
            SinkControl::Abort
        }
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<SinkControl, UpstreamError> {
        match self.body_tx.send(Ok(chunk)).await {
            Ok(()) => Ok(SinkControl::Continue),
            Err(_) => Ok(SinkControl::Abort),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.body_tx.is_closed()
    }
}

/// Collects a whole response in memory up to `limit` bytes
pub struct BufferSink {
    limit: usize,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    overflowed: bool,
}

impl BufferSink {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            overflowed: false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body exceeded the limit and was truncated
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }
}

#[async_trait]
impl ResponseSink for BufferSink {
    fn on_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers.append(name.clone(), value.clone());
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<SinkControl, UpstreamError> {
        if self.body.len() + chunk.len() > self.limit {
            self.overflowed = true;
            return Ok(SinkControl::Abort);
        }
        self.body.extend_from_slice(&chunk);
        Ok(SinkControl::Continue)
    }
}
