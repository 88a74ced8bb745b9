//! Socket-style request/response pair.
//!
//! This is the shape a callback-style server hands to its request handler: the
//! request carries a raw path and connection facts, the response is a mutable
//! sink that takes a head once and then body chunks. [`SocketResponse::channel`]
//! connects such a sink to an [`http::Response`] so hyper can serve it.
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::oneshot;

use crate::core::stream::{self, ByteStream, ChunkSink, PushSender, StreamError};

/// Inbound half of the socket-style pair.
pub struct SocketRequest {
    pub method: Method,
    /// Raw request target, path plus query (`/a/b?c=d`).
    pub path: String,
    pub headers: HeaderMap,
    /// True when the connection itself is TLS.
    pub encrypted: bool,
    pub remote_addr: Option<SocketAddr>,
    pub body: ByteStream,
}

impl std::fmt::Debug for SocketRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("encrypted", &self.encrypted)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Status line and headers written before any body chunk.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Outbound half of the socket-style pair.
///
/// The head is written exactly once; body chunks follow through [`ChunkSink`].
#[derive(Debug)]
pub struct SocketResponse {
    head: Option<oneshot::Sender<ResponseHead>>,
    body: PushSender,
}

/// Receiving end of a [`SocketResponse`].
pub struct NativeReply {
    head: oneshot::Receiver<ResponseHead>,
    body: ByteStream,
}

impl std::fmt::Debug for NativeReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeReply").finish_non_exhaustive()
    }
}

impl SocketResponse {
    /// Create a response sink and the reply that observes it. `capacity`
    /// bounds the chunks in flight.
    pub fn channel(capacity: usize) -> (SocketResponse, NativeReply) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body, stream) = stream::push_channel(capacity);
        (
            SocketResponse {
                head: Some(head_tx),
                body,
            },
            NativeReply {
                head: head_rx,
                body: stream,
            },
        )
    }

    /// Send the status and headers. Fails when called twice or when the peer
    /// is gone.
    pub fn write_head(&mut self, head: ResponseHead) -> Result<(), StreamError> {
        let sender = self.head.take().ok_or(StreamError::SinkClosed)?;
        sender.send(head).map_err(|_| StreamError::SinkClosed)
    }

    pub fn head_written(&self) -> bool {
        self.head.is_none()
    }
}

#[async_trait]
impl ChunkSink for SocketResponse {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StreamError> {
        if !self.head_written() {
            return Err(StreamError::Io("body written before head".to_string()));
        }
        self.body.write(chunk).await
    }

    async fn abort(&mut self, err: &StreamError) {
        self.body.abort(err).await;
    }
}

impl NativeReply {
    /// Wait for the head and build the hyper response. The body keeps
    /// streaming as the sink is written.
    ///
    /// If the sink is dropped without a head the reply is a bare 500.
    pub async fn into_response(self) -> http::Response<AxumBody> {
        let head = match self.head.await {
            Ok(head) => head,
            Err(_) => {
                tracing::error!("Response sink dropped before the head was written");
                ResponseHead {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    headers: HeaderMap::new(),
                }
            }
        };
        let mut response = http::Response::new(stream::into_body(self.body));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
