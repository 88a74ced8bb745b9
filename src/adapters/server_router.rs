//! Router that owns a listening socket.
//!
//! Every accepted connection is served by hyper-util's auto builder (HTTP/1
//! and HTTP/2). Each request is turned into the socket-style pair: its body is
//! pumped through a bounded push channel, its response head and chunks come
//! back through a [`SocketResponse`]. Dispatch goes through
//! [`Server::handler`], so routing behaves exactly as in the Request-object
//! model.
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use http::{HeaderValue, header};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};

use crate::{
    core::{
        native::{SocketRequest, SocketResponse},
        request::Request,
        response::Response,
        router::{DispatchError, Router},
        server::{Server, ServerSettings},
        stream,
    },
    ports::http_server::HttpServer,
    utils::graceful_shutdown::{GracefulShutdown, ShutdownToken},
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the listener and the accept loop for one router.
pub struct ServerRouter {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    server: Server,
    shutdown: Arc<GracefulShutdown>,
}

impl ServerRouter {
    /// Bind `addr`. Port 0 picks a free port; see [`HttpServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<dyn Router>,
        settings: ServerSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to read bound address")?;

        tracing::info!(address = %local_addr, "Server router listening");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            server: Server::new(router, settings),
            shutdown: Arc::new(GracefulShutdown::new()),
        })
    }

    /// Share a shutdown manager with the rest of the application.
    pub fn with_shutdown(mut self, shutdown: Arc<GracefulShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        self.shutdown.clone()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut token = self.shutdown.token();
        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        loop {
            connections.retain(|handle| !handle.is_finished());

            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            accept_backoff(&e).await;
                            continue;
                        }
                    };
                    connections.push(tokio::spawn(serve_connection(
                        self.server.clone(),
                        stream,
                        remote_addr,
                        self.shutdown.token(),
                    )));
                }
                reason = token.wait() => {
                    tracing::info!(
                        ?reason,
                        in_flight = connections.len(),
                        "Shutdown signal received, draining connections"
                    );
                    break;
                }
            }
        }

        drop(listener);
        drain(connections, self.shutdown.drain_timeout()).await;
    }
}

async fn serve_connection(
    server: Server,
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    mut token: ShutdownToken,
) {
    tracing::debug!(%remote_addr, "Connection accepted");

    let service = service_fn(move |req: http::Request<Incoming>| {
        let server = server.clone();
        async move { Ok::<_, Infallible>(serve_request(server, req, remote_addr).await) }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = token.wait() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        tracing::debug!(%remote_addr, error = %e, "Connection closed with error");
    }
}

/// Pause after a failed accept so a persistent error (fd exhaustion) does not spin.
async fn accept_backoff(err: &std::io::Error) {
    tracing::error!(error = %err, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Run one hyper request through the socket-style pair.
async fn serve_request(
    server: Server,
    req: http::Request<Incoming>,
    remote_addr: SocketAddr,
) -> http::Response<AxumBody> {
    let (parts, body) = req.into_parts();
    let capacity = server.settings().stream_capacity;

    // Push the native body into the bridge as chunks arrive.
    let (mut push, request_body) = stream::push_channel(capacity);
    tokio::spawn(async move {
        if let Err(e) = stream::pipe(stream::from_body(body), &mut push).await {
            tracing::trace!(error = %e, "Request body pump stopped");
        }
    });

    let mut headers = parts.headers;
    // HTTP/2 carries the host in the :authority pseudo header.
    if !headers.contains_key(header::HOST) {
        if let Some(value) = parts
            .uri
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        {
            headers.insert(header::HOST, value);
        }
    }
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let native = SocketRequest {
        method: parts.method,
        path,
        headers,
        encrypted: false,
        remote_addr: Some(remote_addr),
        body: request_body,
    };
    let (sink, reply) = SocketResponse::channel(capacity);
    tokio::spawn(async move { server.handler(native, sink).await });

    reply.into_response().await
}

/// Wait for in-flight connections, aborting whatever is left at the deadline.
async fn drain(connections: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for mut handle in connections {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            handle.abort();
            continue;
        }
        tokio::select! {
            _ = &mut handle => {}
            _ = tokio::time::sleep(remaining) => {
                tracing::warn!("Connection drain timeout, aborting");
                handle.abort();
            }
        }
    }
    tracing::info!("All connections drained");
}

impl HttpServer for ServerRouter {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| eyre::eyre!("Server router is already running"))?;
        self.accept_loop(listener).await;
        Ok(())
    }
}

#[async_trait]
impl Router for ServerRouter {
    async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        self.server.router().dispatch_at(path, req, res).await
    }
}

impl std::fmt::Debug for ServerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRouter")
            .field("local_addr", &self.local_addr)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
