//! Cookie-backed session state.
//!
//! Every session key travels as its own cookie whose value is the JSON text of
//! the session value. [`ReadSession`] is the snapshot a request arrived with;
//! [`WriteSession`] records a delta on top of it and turns that delta into
//! `Set-Cookie` header values when the response is finalized.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use http::{HeaderMap, header};
use serde_json::Value;

use crate::core::cookie::{self, CookieError, CookieOptions};

/// Read-only session snapshot taken from the incoming `Cookie` headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSession {
    values: HashMap<String, Value>,
}

impl ReadSession {
    /// Build the snapshot from every `Cookie` header on the request.
    ///
    /// Cookie values that are not valid JSON are exposed as JSON strings.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();
        for header_value in headers.get_all(header::COOKIE) {
            let Ok(raw) = header_value.to_str() else {
                continue;
            };
            for (name, value) in cookie::parse(raw) {
                let value =
                    serde_json::from_str(&value).unwrap_or_else(|_| Value::String(value));
                values.entry(name).or_insert(value);
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Buffered session writes for one response.
#[derive(Debug, Clone)]
pub struct WriteSession {
    snapshot: Arc<ReadSession>,
    delta: BTreeMap<String, Option<Value>>,
    options: CookieOptions,
}

impl WriteSession {
    pub fn new(snapshot: Arc<ReadSession>, options: CookieOptions) -> Self {
        Self {
            snapshot,
            delta: BTreeMap::new(),
            options,
        }
    }

    /// Current value of `key`, with pending writes applied.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.delta.get(key) {
            Some(pending) => pending.as_ref(),
            None => self.snapshot.get(key),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.delta.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.delta.insert(key.into(), None);
    }

    /// True when there are writes to flush.
    pub fn is_dirty(&self) -> bool {
        !self.delta.is_empty()
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Serialize the pending delta, one `Set-Cookie` value per key.
    ///
    /// Deletions expire the cookie with `Max-Age=0`. Failures are returned per
    /// key so one bad name does not block the others.
    pub fn flush(&self) -> Vec<(String, Result<String, CookieError>)> {
        self.delta
            .iter()
            .map(|(key, pending)| {
                let header = match pending {
                    Some(value) => cookie::serialize(key, &value.to_string(), &self.options),
                    None => {
                        let expired = CookieOptions {
                            max_age: Some(0),
                            ..self.options.clone()
                        };
                        cookie::serialize(key, "", &expired)
                    }
                };
                (key.clone(), header)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn snapshot(cookie_header: &'static str) -> Arc<ReadSession> {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static(cookie_header));
        Arc::new(ReadSession::from_headers(&headers))
    }

    #[test]
    fn test_read_session_decodes_json_values() {
        let session = snapshot("count=3; user=%7B%22name%22%3A%22ann%22%7D; plain=hello");
        assert_eq!(session.get("count"), Some(&json!(3)));
        assert_eq!(session.get("user"), Some(&json!({"name": "ann"})));
        assert_eq!(session.get("plain"), Some(&json!("hello")));
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn test_write_session_overlays_snapshot() {
        let mut session = WriteSession::new(snapshot("count=3; theme=dark"), CookieOptions::default());
        session.set("count", 4);
        session.delete("theme");

        assert_eq!(session.get("count"), Some(&json!(4)));
        assert_eq!(session.get("theme"), None);
        assert!(session.is_dirty());
    }

    #[test]
    fn test_clean_session_flushes_nothing() {
        let session = WriteSession::new(snapshot("count=3"), CookieOptions::default());
        assert!(!session.is_dirty());
        assert!(session.flush().is_empty());
    }

    #[test]
    fn test_flush_emits_set_cookie_values() {
        let mut session = WriteSession::new(Arc::default(), CookieOptions::default());
        session.set("user", json!({"id": 7}));
        session.delete("old");

        let flushed = session.flush();
        assert_eq!(flushed.len(), 2);
        let old = flushed[0].1.as_ref().unwrap();
        assert!(old.starts_with("old=;"));
        assert!(old.contains("Max-Age=0"));
        let user = flushed[1].1.as_ref().unwrap();
        assert!(user.starts_with("user=%7B%22id%22%3A7%7D"));
    }

    #[test]
    fn test_flush_reports_bad_key() {
        let mut session = WriteSession::new(Arc::default(), CookieOptions::default());
        session.set("bad key", "x");
        let flushed = session.flush();
        assert!(flushed[0].1.is_err());
    }

    #[test]
    fn test_written_cookie_reads_back() {
        let mut session = WriteSession::new(Arc::default(), CookieOptions::default());
        session.set("cart", json!(["a", "b"]));
        let header = session.flush().remove(0).1.unwrap();
        let pair = header.split(';').next().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());
        let read = ReadSession::from_headers(&headers);
        assert_eq!(read.get("cart"), Some(&json!(["a", "b"])));
    }
}
