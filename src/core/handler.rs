//! Route handlers and handler chains.
use std::{error::Error as StdError, sync::Arc};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http::StatusCode;
use thiserror::Error;

use crate::core::{
    request::{BodyError, Request},
    response::{Response, ResponseError},
    stream::StreamError,
};

/// Failure raised by a handler
///
/// Carries an optional status; the server facade answers with 500 when none
/// is declared.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    status: Option<StatusCode>,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    /// Wrap any error as an undeclared (500) failure.
    pub fn internal(err: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            status: None,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BodyError> for HandlerError {
    fn from(err: BodyError) -> Self {
        let status = match &err {
            BodyError::Decode(_) => StatusCode::BAD_REQUEST,
            BodyError::Stream(StreamError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::Stream(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status: Some(status),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<ResponseError> for HandlerError {
    fn from(err: ResponseError) -> Self {
        Self::internal(err)
    }
}

/// A single step of a route's handler chain.
///
/// A handler either finishes the response with [`Response::send`], which stops
/// the chain, or returns and lets the next handler run.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError>;
}

/// Handler built from a closure, see [`handler_fn`].
pub struct FnHandler<F>(F);

/// Build a handler from a closure returning a boxed future.
///
/// ```
/// use switchyard::core::handler::handler_fn;
///
/// let hello = handler_fn(|_req, res| {
///     Box::pin(async move {
///         res.text("hello")?;
///         Ok::<_, switchyard::core::handler::HandlerError>(())
///     })
/// });
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync
        + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync
        + 'static,
{
    async fn call(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError> {
        (self.0)(req, res).await
    }
}

/// Ordered handlers attached to one route.
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn then(mut self, handler: impl Handler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn then_shared(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run handlers in order until one sends the response or fails.
    ///
    /// Errors are returned as-is; converting them is the server facade's job.
    pub async fn run(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError> {
        for handler in &self.handlers {
            if res.is_sent() {
                break;
            }
            handler.call(req, res).await?;
        }
        Ok(())
    }
}

impl<H: Handler> From<H> for Chain {
    fn from(handler: H) -> Self {
        Chain::new().then(handler)
    }
}

impl From<Vec<Arc<dyn Handler>>> for Chain {
    fn from(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
