//! Modules the binary registers by name.
//!
//! | Identifier | Behavior |
//! |---|---|
//! | `echo` | JSON description of the request, including the decoded body |
//! | `health` | `{"status":"ok"}` |
//! | `session-counter` | counts requests per client in a session cookie |
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::{
    adapters::module_registry::ModuleRegistry,
    core::{
        handler::{Chain, Handler, HandlerError},
        request::Request,
        response::Response,
    },
};

/// Reflects the request back as JSON.
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError> {
        let headers: Map<String, Value> = req
            .headers()
            .keys()
            .filter_map(|name| {
                req.header(name.as_str())
                    .map(|value| (name.to_string(), Value::String(value.to_string())))
            })
            .collect();
        let body = req.body().await?.to_value();

        res.json(&json!({
            "method": req.method().as_str(),
            "url": req.url().as_str(),
            "path": req.path(),
            "params": req.params(),
            "query": req.query(),
            "headers": headers,
            "body": body,
            "request_id": req.request_id(),
        }))?;
        res.send()?;
        Ok(())
    }
}

pub struct Health;

#[async_trait]
impl Handler for Health {
    async fn call(&self, _req: &Request, res: &mut Response) -> Result<(), HandlerError> {
        res.json(&json!({ "status": "ok" }))?;
        res.send()?;
        Ok(())
    }
}

/// Increments the `visits` session value and reports it.
pub struct SessionCounter;

#[async_trait]
impl Handler for SessionCounter {
    async fn call(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError> {
        let visits = req
            .session()
            .get("visits")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        res.session()?.set("visits", visits);
        res.json(&json!({ "visits": visits }))?;
        Ok(())
    }
}

/// Registry with every built-in module.
pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register("echo", || Chain::from(Echo))
        .register("health", || Chain::from(Health))
        .register("session-counter", || Chain::from(SessionCounter));
    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{HeaderMap, HeaderValue, Method, header};
    use url::Url;

    use super::*;
    use crate::{
        core::{cookie::CookieOptions, session::WriteSession, stream},
        ports::module_loader::ModuleLoader,
    };

    fn response() -> Response {
        Response::new(WriteSession::new(Arc::default(), CookieOptions::default()))
    }

    #[tokio::test]
    async fn test_echo_reports_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let url = Url::parse("http://example.com/echo?x=1").unwrap();
        let req = Request::new(Method::POST, url, headers, stream::once(r#"{"k":"v"}"#));
        let mut res = response();

        Echo.call(&req, &mut res).await.unwrap();
        let body = res.body().as_json().unwrap();
        assert_eq!(body["method"], "POST");
        assert_eq!(body["query"], json!({"x": "1"}));
        assert_eq!(body["body"], json!({"k": "v"}));
        assert!(res.is_sent());
    }

    #[tokio::test]
    async fn test_session_counter_increments() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("visits=4"));
        let url = Url::parse("http://example.com/").unwrap();
        let req = Request::new(Method::GET, url, headers, stream::empty());
        let mut res = Response::new(WriteSession::new(
            req.session_snapshot(),
            CookieOptions::default(),
        ));

        SessionCounter.call(&req, &mut res).await.unwrap();
        assert_eq!(res.body().as_json(), Some(&json!({"visits": 5})));
        assert_eq!(res.session_view().get("visits"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_registry_has_builtins() {
        let registry = registry();
        assert_eq!(registry.identifiers(), vec!["echo", "health", "session-counter"]);
        assert!(registry.load("health").await.is_ok());
    }
}
