//! Mutable response under construction, and its finalized form.
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{self, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::{
    session::WriteSession,
    stream::{self, ByteStream},
};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Errors raised while building a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseError {
    #[error("response already sent")]
    AlreadySent,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to serialize JSON body: {0}")]
    Serialize(String),
}

/// The single body a response carries.
#[derive(Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(ByteStream),
    Json(Value),
}

impl ResponseBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ResponseBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
            ResponseBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// Outbound response being assembled by a handler chain.
///
/// Status defaults to 200. Setting a body replaces any earlier one. After
/// [`Response::send`] every mutator fails with [`ResponseError::AlreadySent`].
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    session: WriteSession,
    sent: bool,
}

impl Response {
    pub fn new(session: WriteSession) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            session,
            sent: false,
        }
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        if self.sent {
            Err(ResponseError::AlreadySent)
        } else {
            Ok(())
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<&mut Self, ResponseError> {
        self.ensure_open()?;
        self.status = status;
        Ok(self)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Replace every value of `name`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, ResponseError> {
        self.ensure_open()?;
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Add a value to `name`, keeping existing ones.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<&mut Self, ResponseError> {
        self.ensure_open()?;
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn remove_header(&mut self, name: &str) -> Result<&mut Self, ResponseError> {
        self.ensure_open()?;
        self.headers.remove(name);
        Ok(self)
    }

    pub fn text(&mut self, text: impl Into<String>) -> Result<&mut Self, ResponseError> {
        self.set_body(ResponseBody::Text(text.into()))
    }

    pub fn bytes(&mut self, bytes: impl Into<Bytes>) -> Result<&mut Self, ResponseError> {
        self.set_body(ResponseBody::Bytes(bytes.into()))
    }

    /// Stream the body. No content type is added for streams.
    pub fn stream(&mut self, stream: ByteStream) -> Result<&mut Self, ResponseError> {
        self.set_body(ResponseBody::Stream(stream))
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, ResponseError> {
        let value =
            serde_json::to_value(value).map_err(|e| ResponseError::Serialize(e.to_string()))?;
        self.set_body(ResponseBody::Json(value))
    }

    fn set_body(&mut self, body: ResponseBody) -> Result<&mut Self, ResponseError> {
        self.ensure_open()?;
        self.body = body;
        Ok(self)
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Session writes for this response.
    pub fn session(&mut self) -> Result<&mut WriteSession, ResponseError> {
        self.ensure_open()?;
        Ok(&mut self.session)
    }

    /// Read-only view of the session including pending writes.
    pub fn session_view(&self) -> &WriteSession {
        &self.session
    }

    /// Mark the response complete. Remaining handlers in the chain are skipped.
    pub fn send(&mut self) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.sent = true;
        Ok(())
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Turn the response into its wire form.
    ///
    /// Pending session writes become `Set-Cookie` headers; a cookie that fails
    /// to serialize is logged and skipped. Default content types are applied
    /// unless the handler set one.
    pub fn finalize(self) -> Finalized {
        let Response {
            status,
            mut headers,
            body,
            session,
            ..
        } = self;

        if session.is_dirty() {
            for (key, cookie) in session.flush() {
                match cookie.map_err(|e| e.to_string()).and_then(|value| {
                    HeaderValue::from_str(&value).map_err(|e| e.to_string())
                }) {
                    Ok(value) => {
                        headers.append(SET_COOKIE, value);
                    }
                    Err(error) => {
                        tracing::warn!(session_key = %key, %error, "Skipping session cookie");
                    }
                }
            }
        }

        let (default_type, body) = match body {
            ResponseBody::Empty => (None, FinalBody::Full(Bytes::new())),
            ResponseBody::Text(text) => (Some(TEXT_PLAIN), FinalBody::Full(Bytes::from(text))),
            ResponseBody::Bytes(bytes) => (Some(OCTET_STREAM), FinalBody::Full(bytes)),
            ResponseBody::Json(value) => (
                Some(APPLICATION_JSON),
                FinalBody::Full(Bytes::from(value.to_string())),
            ),
            ResponseBody::Stream(stream) => (None, FinalBody::Stream(stream)),
        };

        if let Some(content_type) = default_type {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        if let FinalBody::Full(bytes) = &body {
            if !bytes.is_empty() || status != StatusCode::NO_CONTENT {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            }
        }

        Finalized {
            status,
            headers,
            body,
        }
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ResponseError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ResponseError::InvalidHeader(name.to_string()))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ResponseError::InvalidHeader(format!("{name}: {value}")))?;
    Ok((name, value))
}

/// Body of a finalized response.
pub enum FinalBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl FinalBody {
    pub fn into_stream(self) -> ByteStream {
        match self {
            FinalBody::Full(bytes) => stream::once(bytes),
            FinalBody::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for FinalBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            FinalBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response ready for the wire.
#[derive(Debug)]
pub struct Finalized {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: FinalBody,
}

impl Finalized {
    /// Plain-text response used for errors raised outside a handler.
    pub fn plain(status: StatusCode, message: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(message.len()));
        Self {
            status,
            headers,
            body: FinalBody::Full(Bytes::copy_from_slice(message.as_bytes())),
        }
    }

    pub fn into_http(self) -> http::Response<AxumBody> {
        let body = match self.body {
            FinalBody::Full(bytes) => AxumBody::from(bytes),
            FinalBody::Stream(stream) => stream::into_body(stream),
        };
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::core::cookie::CookieOptions;

    fn response() -> Response {
        Response::new(WriteSession::new(Arc::default(), CookieOptions::default()))
    }

    #[test]
    fn test_defaults() {
        let res = response();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.body().is_empty());
        assert!(!res.is_sent());
    }

    #[test]
    fn test_headers_are_case_insensitive_and_multi_valued() {
        let mut res = response();
        res.append_header("X-Tag", "a").unwrap();
        res.append_header("x-tag", "b").unwrap();
        assert_eq!(res.headers().get_all("X-TAG").iter().count(), 2);

        res.set_header("x-tag", "c").unwrap();
        assert_eq!(res.header("x-tag"), Some("c"));

        res.remove_header("X-Tag").unwrap();
        assert!(res.header("x-tag").is_none());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut res = response();
        assert!(matches!(
            res.set_header("bad header", "v"),
            Err(ResponseError::InvalidHeader(_))
        ));
        assert!(matches!(
            res.set_header("x-ok", "line\nbreak"),
            Err(ResponseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_mutation_after_send_fails() {
        let mut res = response();
        res.text("done").unwrap();
        res.send().unwrap();
        assert_eq!(res.send(), Err(ResponseError::AlreadySent));
        assert!(matches!(res.text("again"), Err(ResponseError::AlreadySent)));
        assert!(matches!(
            res.set_status(StatusCode::CREATED),
            Err(ResponseError::AlreadySent)
        ));
        assert!(res.session().is_err());
        assert_eq!(res.body().as_text(), Some("done"));
    }

    #[tokio::test]
    async fn test_json_body_content_type() {
        let mut res = response();
        res.json(&json!({"ok": true})).unwrap();
        let finalized = res.finalize();
        assert_eq!(finalized.headers[CONTENT_TYPE], "application/json");
        assert_eq!(finalized.headers[CONTENT_LENGTH], "11");

        let body = finalized.into_http().into_body().collect().await.unwrap();
        assert_eq!(body.to_bytes(), Bytes::from_static(br#"{"ok":true}"#));
    }

    #[test]
    fn test_explicit_content_type_is_kept() {
        let mut res = response();
        res.set_header("content-type", "text/html").unwrap();
        res.text("<p>hi</p>").unwrap();
        let finalized = res.finalize();
        assert_eq!(finalized.headers[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_bytes_default_content_type() {
        let mut res = response();
        res.bytes(vec![0u8, 1, 2]).unwrap();
        assert_eq!(res.finalize().headers[CONTENT_TYPE], OCTET_STREAM);
    }

    #[tokio::test]
    async fn test_stream_passes_through_untouched() {
        let mut res = response();
        res.stream(stream::from_chunks(["a", "b"])).unwrap();
        let finalized = res.finalize();
        assert!(finalized.headers.get(CONTENT_TYPE).is_none());
        assert!(finalized.headers.get(CONTENT_LENGTH).is_none());

        let mut sink = Vec::new();
        stream::pipe(finalized.body.into_stream(), &mut sink).await.unwrap();
        assert_eq!(sink.concat(), b"ab");
    }

    #[test]
    fn test_finalize_flushes_session_cookies() {
        let mut res = response();
        res.session().unwrap().set("count", 1);
        res.session().unwrap().set("bad key", 2);
        let finalized = res.finalize();

        let cookies: Vec<_> = finalized.headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].to_str().unwrap().starts_with("count=1;"));
    }

    #[test]
    fn test_clean_session_sets_no_cookie() {
        let mut res = response();
        res.text("hi").unwrap();
        assert!(res.finalize().headers.get(SET_COOKIE).is_none());
    }

    #[test]
    fn test_empty_body_has_zero_length() {
        let finalized = response().finalize();
        assert_eq!(finalized.headers[CONTENT_LENGTH], "0");
        assert!(finalized.headers.get(CONTENT_TYPE).is_none());
    }
}
