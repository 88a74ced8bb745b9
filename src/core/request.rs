//! Unified, read-only view of an inbound request.
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http::{HeaderMap, Method, header};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::core::{
    body::{self, DecodeError, DecodedBody},
    session::ReadSession,
    stream::{self, ByteStream, StreamError},
};

/// Default cap on buffered request bodies (2 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Failure reading or decoding the request body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// An inbound request, independent of the server model it arrived through.
///
/// Everything except the route params is fixed at construction. The body stream
/// is consumed at most once; [`Request::bytes`] and [`Request::body`] cache
/// their results.
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
    session: Arc<ReadSession>,
    remote_addr: Option<SocketAddr>,
    request_id: String,
    body_limit: usize,
    source: Mutex<Option<ByteStream>>,
    raw: OnceCell<Result<Bytes, StreamError>>,
    decoded: OnceCell<Result<DecodedBody, DecodeError>>,
}

impl Request {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: ByteStream) -> Self {
        let query = url.query_pairs().into_owned().collect();
        let session = Arc::new(ReadSession::from_headers(&headers));
        let request_id = headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            method,
            url,
            headers,
            query,
            params: HashMap::new(),
            session,
            remote_addr: None,
            request_id,
            body_limit: DEFAULT_BODY_LIMIT,
            source: Mutex::new(Some(body)),
            raw: OnceCell::new(),
            decoded: OnceCell::new(),
        }
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup; the first value wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// Query parameters; a repeated key keeps its last value.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Route parameters bound by the router.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn session(&self) -> &ReadSession {
        &self.session
    }

    pub(crate) fn session_snapshot(&self) -> Arc<ReadSession> {
        self.session.clone()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Raw body bytes. The underlying stream is read on the first call only.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        let raw = self
            .raw
            .get_or_init(|| async {
                let source = self.source.lock().await.take();
                match source {
                    Some(stream) => stream::collect(stream, self.body_limit).await,
                    None => Ok(Bytes::new()),
                }
            })
            .await;
        raw.clone().map_err(BodyError::from)
    }

    /// Body decoded by content type. Decoding happens once; later calls return
    /// the cached value or the cached error.
    pub async fn body(&self) -> Result<&DecodedBody, BodyError> {
        let raw = self.bytes().await?;
        let decoded = self
            .decoded
            .get_or_init(|| async { body::decode(self.content_type().unwrap_or_default(), &raw) })
            .await;
        decoded.as_ref().map_err(|err| BodyError::Decode(err.clone()))
    }

    /// Body as text, replacing invalid UTF-8.
    pub async fn text(&self) -> Result<String, BodyError> {
        let raw = self.bytes().await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("params", &self.params)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
