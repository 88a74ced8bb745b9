//! switchyard - one routing layer for two HTTP server models.
//!
//! Route handlers are written once against [`core::Request`] and
//! [`core::Response`] and run unchanged whether requests arrive through a
//! callback-style socket server ([`core::Server::handler`]) or through a
//! Request-object runtime ([`core::Server::gateway`], also exposed as a
//! `tower::Service`).
//!
//! # Features
//! - Absolute URL derivation from `Host`, with the scheme taken from
//!   `X-Forwarded-Proto` when present
//! - Streaming request and response bodies with a bounded push/pull bridge
//! - JSON, urlencoded and multipart body decoding with a size limit
//! - Cookie-backed sessions
//! - Ordered route matching with `:name` parameters and trailing wildcards
//! - Nested routers, and an [`core::router::ImportRouter`] that resolves
//!   handler modules by name on first use
//! - A listening [`adapters::ServerRouter`] on hyper with graceful shutdown
//! - File based configuration and structured logging via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchyard::{
//!     HttpServer, ServerRouter,
//!     core::{
//!         handler::{HandlerError, handler_fn},
//!         router::EntryRouter,
//!         server::ServerSettings,
//!     },
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut router = EntryRouter::new();
//! router.get(
//!     "/hello/:name",
//!     handler_fn(|req, res| {
//!         Box::pin(async move {
//!             res.text(format!("hello {}", req.param("name").unwrap_or("you")))?;
//!             Ok::<_, HandlerError>(())
//!         })
//!     }),
//! )?;
//!
//! let server = ServerRouter::bind(
//!     "127.0.0.1:3000".parse()?,
//!     Arc::new(router),
//!     ServerSettings::default(),
//! )
//! .await?;
//! server.run().await
//! # }
//! ```
//!
//! # Architecture
//! `core` holds the request model, routers and the server facade. `ports`
//! declares the traits the core depends on (module loading, serving), and
//! `adapters` implements them on top of tokio and hyper.
//!
//! # Error Handling
//! Library errors are `thiserror` enums per concern. Startup and configuration
//! return `eyre::Result<T>` with `WrapErr` context attached.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{ModuleRegistry, ServerRouter},
    core::{
        EntryRouter, Handler, HandlerError, ImportRouter, Request, Response, Router, Server,
        ServerSettings,
    },
    ports::{HttpServer, ModuleLoader},
    utils::GracefulShutdown,
};
