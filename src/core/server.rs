//! Server facade: one dispatch path behind both execution models.
//!
//! [`Server::handler`] serves the socket-style pair, [`Server::gateway`] serves
//! a Request-object and returns a response object. Both build a [`Request`],
//! run the router, turn failures into error responses, and move the body
//! through the stream bridge. Routers and handlers never see which model is in
//! use.
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::{
    core::{
        cookie::CookieOptions,
        native::{ResponseHead, SocketRequest, SocketResponse},
        request::{DEFAULT_BODY_LIMIT, Request},
        resolver::{self, UrlSource},
        response::{Finalized, Response},
        router::{DispatchError, Router},
        session::WriteSession,
        stream::{self, BoxError},
    },
    tracing_setup,
};

/// Chunks buffered by the request body bridge.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Per-server knobs shared by every call.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Largest request body `Request::body` will buffer.
    pub max_body_bytes: usize,
    /// Capacity of the push -> pull bridge feeding request bodies.
    pub stream_capacity: usize,
    /// Attributes for session cookies.
    pub cookie: CookieOptions,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_BODY_LIMIT,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            cookie: CookieOptions::default(),
        }
    }
}

/// Entry point shared by both server models.
#[derive(Clone)]
pub struct Server {
    router: Arc<dyn Router>,
    settings: Arc<ServerSettings>,
}

impl Server {
    pub fn new(router: Arc<dyn Router>, settings: ServerSettings) -> Self {
        Self {
            router,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    /// Serve a socket-style request into its response sink.
    ///
    /// Never fails: errors before the head become error responses, stream
    /// failures after it are logged.
    pub async fn handler(&self, native: SocketRequest, mut sink: SocketResponse) {
        let SocketRequest {
            method,
            path,
            headers,
            encrypted,
            remote_addr,
            body,
        } = native;

        let url = resolver::resolve(&UrlSource::Socket {
            headers: &headers,
            path: &path,
            encrypted,
        });
        let request = Request::new(method, url, headers, body)
            .with_remote_addr(remote_addr)
            .with_body_limit(self.settings.max_body_bytes);

        let Finalized {
            status,
            headers,
            body,
        } = self.respond(request).await;

        if let Err(err) = sink.write_head(ResponseHead { status, headers }) {
            tracing::debug!(error = %err, "Client gone before the response head was written");
            return;
        }
        match stream::pipe(body.into_stream(), &mut sink).await {
            Ok(written) => tracing::trace!(bytes = written, "Response body sent"),
            Err(err) => tracing::warn!(error = %err, "Response body stream failed"),
        }
    }

    /// Serve a Request-object and return the response object.
    ///
    /// The peer address is taken from a `SocketAddr` (or axum `ConnectInfo`)
    /// request extension when present.
    pub async fn gateway<B>(&self, req: http::Request<B>) -> http::Response<AxumBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let href = parts.uri.to_string();
        let url = resolver::resolve(&UrlSource::Href {
            headers: &parts.headers,
            href: &href,
        });
        let remote_addr = parts.extensions.get::<SocketAddr>().copied().or_else(|| {
            parts
                .extensions
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|info| info.0)
        });

        let request = Request::new(parts.method, url, parts.headers, stream::from_body(body))
            .with_remote_addr(remote_addr)
            .with_body_limit(self.settings.max_body_bytes);

        self.respond(request).await.into_http()
    }

    async fn respond(&self, mut request: Request) -> Finalized {
        let span = tracing_setup::create_request_span(
            request.method().as_str(),
            request.path(),
            request.request_id(),
        );

        async move {
            let started = Instant::now();
            let session = WriteSession::new(request.session_snapshot(), self.settings.cookie.clone());
            let mut response = Response::new(session);

            // A failed dispatch discards whatever the chain wrote so far.
            let finalized = match self.router.dispatch(&mut request, &mut response).await {
                Ok(()) => response.finalize(),
                Err(err) => error_response(&err),
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            let span = tracing::Span::current();
            span.record("http.status_code", finalized.status.as_u16());
            span.record("duration_ms", duration_ms);
            tracing::info!(
                status = finalized.status.as_u16(),
                duration_ms,
                "Request completed"
            );
            finalized
        }
        .instrument(span)
        .await
    }
}

fn error_response(err: &DispatchError) -> Finalized {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(error = ?err, "Request failed");
        Finalized::plain(status, "Internal Server Error")
    } else {
        tracing::debug!(error = %err, status = status.as_u16(), "Request rejected");
        Finalized::plain(status, &err.to_string())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<B> tower::Service<http::Request<B>> for Server
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<AxumBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move { Ok(server.gateway(req).await) })
    }
}
